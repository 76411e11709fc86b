//! Document state and analysis pipeline orchestration for Python language
//! services.
//!
//! The crate implements the coordination half of a [Language Server Protocol (LSP)](https://microsoft.github.io/language-server-protocol/)
//! server: it tracks per-URI document versions, reconciles out-of-order
//! incremental edits, throttles and sequences parse and analyze work, serves
//! read requests against consistent parse snapshots, and publishes
//! diagnostics without ever regressing a published version.
//!
//! Parsing and semantic analysis are performed by external collaborators
//! consumed through the contracts in [`SyntaxParser`] and
//! [`SemanticAnalyzer`]; providers are selected through an
//! [`InterpreterRegistry`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

mod change;
mod config;
mod contracts;
mod counter;
mod diagnostics;
mod document;
mod edit;
mod error;
mod event;
mod handlers;
mod interpreter;
mod keywords;
mod loader;
mod pipeline;
mod queue;
mod rayon;
mod store;
pub mod testing;
mod workspace;

pub use change::DocumentChange;
pub use config::LanguageVersion;
pub use config::ServerConfig;
pub use contracts::AnalysisValue;
pub use contracts::CallContext;
pub use contracts::MemberInfo;
pub use contracts::Overload;
pub use contracts::ParameterInfo;
pub use contracts::Parse;
pub use contracts::ReferenceKind;
pub use contracts::SemanticAnalyzer;
pub use contracts::SyntaxParser;
pub use contracts::SyntaxTree;
pub use contracts::ValueKind;
pub use contracts::VariableReference;
pub use counter::CounterGuard;
pub use counter::VolatileCounter;
pub use diagnostics::DiagnosticPublisher;
pub use document::DISK_VERSION;
pub use document::Entry;
pub use document::EntryKind;
pub use document::ParseCookie;
pub use document::ParseSnapshot;
pub use document::TextDocument;
pub use edit::SourceEdit;
pub use edit::SourcePosition;
pub use edit::SourcePositionEncoding;
pub use error::Error;
pub use error::Result;
pub use event::AnalysisEvent;
pub use event::EventBus;
pub use handlers::CompletionOptions;
pub use interpreter::AnalyzerHandle;
pub use interpreter::Interpreter;
pub use interpreter::InterpreterConfig;
pub use interpreter::InterpreterFactory;
pub use interpreter::InterpreterRegistry;
pub use queue::AnalysisQueue;
pub use queue::ParseQueue;
pub use queue::Priority;
pub use store::DocumentStore;
pub use workspace::Workspace;
