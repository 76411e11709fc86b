//! Contracts between the analysis core and its language collaborators.
//!
//! The core coordinates a syntax parser and a semantic analyzer but does not
//! implement either; both are consumed through the narrow trait surfaces in
//! this module.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use lsp_types::Diagnostic;
use lsp_types::Location;
use url::Url;

use crate::document::ParseCookie;
use crate::document::TextDocument;
use crate::edit::SourcePosition;
use crate::error::Result;

/// The semantic kind of an analyzed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A module.
    Module,
    /// A class.
    Class,
    /// A function.
    Function,
    /// A method bound to a class.
    Method,
    /// A variable.
    Variable,
    /// A function or method parameter.
    Parameter,
    /// A language keyword.
    Keyword,
    /// A named argument suggestion in a call.
    NamedArgument,
    /// A constant value.
    Constant,
}

/// The kind of a variable reference.
///
/// The declaration order is significant: when references are deduplicated,
/// ties are broken by keeping the reference with the lowest kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceKind {
    /// The reference could not be classified.
    None,
    /// The reference is a definition of the variable.
    Definition,
    /// The reference is a use of the variable.
    Reference,
    /// The reference is a value assigned to the variable.
    Value,
}

/// An analyzed value produced by the semantic analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisValue {
    /// The display name of the value.
    pub name: String,
    /// The semantic kind of the value.
    pub kind: ValueKind,
    /// The text to insert when the value is accepted as a completion.
    ///
    /// Defaults to the name when `None`.
    pub insert_text: Option<String>,
    /// The documentation of the value, if any.
    pub documentation: Option<String>,
    /// A one-line description of the value.
    pub short_description: String,
    /// A detailed, possibly multi-line description of the value.
    pub long_description: Option<String>,
}

impl AnalysisValue {
    /// Creates a new analysis value with the given name and kind.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        Self {
            short_description: name.clone(),
            name,
            kind,
            insert_text: None,
            documentation: None,
            long_description: None,
        }
    }

    /// Sets the documentation of the value.
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    /// Sets the short description of the value.
    pub fn with_short_description(mut self, description: impl Into<String>) -> Self {
        self.short_description = description.into();
        self
    }

    /// Sets the long description of the value.
    pub fn with_long_description(mut self, description: impl Into<String>) -> Self {
        self.long_description = Some(description.into());
        self
    }
}

/// A parameter of a callable overload.
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    /// The name of the parameter.
    pub name: String,
    /// The documentation of the parameter, if any.
    pub documentation: Option<String>,
    /// The default value of the parameter, if any.
    pub default_value: Option<String>,
}

/// A callable overload known to the semantic analyzer.
#[derive(Debug, Clone)]
pub struct Overload {
    /// The name of the callable.
    pub name: String,
    /// The documentation of the overload, if any.
    pub documentation: Option<String>,
    /// The parameters of the overload.
    pub parameters: Vec<ParameterInfo>,
}

/// A reference to a variable reported by the semantic analyzer.
#[derive(Debug, Clone)]
pub struct VariableReference {
    /// The kind of the reference.
    pub kind: ReferenceKind,
    /// The location of the reference, if it has one.
    pub location: Option<Location>,
}

/// A member declared by a module.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// The name of the member.
    pub name: String,
    /// The semantic kind of the member.
    pub kind: ValueKind,
    /// The declaration location of the member.
    pub location: Location,
}

/// A call expression enclosing a position.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The text of the call target.
    pub callee: String,
    /// The zero-based index of the argument slot containing the position.
    pub argument_index: u32,
    /// The names of keyword arguments already present in the call.
    pub argument_names: Vec<String>,
}

/// The finder surface of a parsed syntax tree.
///
/// Positions are relative to the document part they were reported against.
pub trait SyntaxTree: Send + Sync {
    /// Finds the member-access expression enclosing the given position,
    /// tuned for member evaluation.
    ///
    /// Returns the expression text to the left of the member access operator.
    fn find_member_expression(&self, part: u32, position: SourcePosition) -> Option<String>;

    /// Finds the expression at the given position.
    fn find_expression(&self, part: u32, position: SourcePosition) -> Option<String>;

    /// Finds the call expression enclosing the given position.
    ///
    /// Returns `None` when the position is not within the argument list of a
    /// call.
    fn find_call(&self, part: u32, position: SourcePosition) -> Option<CallContext>;

    /// Finds the module import name at the given position.
    fn find_import_name(&self, part: u32, position: SourcePosition) -> Option<String>;
}

/// The result of parsing a document.
#[derive(Clone)]
pub struct Parse {
    /// The parsed syntax tree.
    pub tree: Arc<dyn SyntaxTree>,
    /// The cookie identifying the parse generation.
    pub cookie: ParseCookie,
}

impl std::fmt::Debug for Parse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parse")
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

/// Parses document sources into syntax trees.
pub trait SyntaxParser: Send + Sync {
    /// Parses every part of the given document.
    ///
    /// Parts without an in-memory buffer are read from the file system.
    ///
    /// Returns [`Error::BadSource`](crate::Error::BadSource) when the source
    /// is rejected by the parser.
    fn parse(&self, uri: &Url, document: &TextDocument) -> Result<Parse>;
}

/// The semantic analyzer the core coordinates.
///
/// The analyzer owns all derived module state and refers back to documents by
/// URI only; the core remains the exclusive owner of document entries.
///
/// Implementations must be internally synchronized.
pub trait SemanticAnalyzer: Send + Sync {
    /// Adds a module to the analyzer.
    fn add_module(
        &self,
        name: &str,
        path: Option<&Path>,
        uri: &Url,
        cookie: &ParseCookie,
    ) -> Result<()>;

    /// Registers an additional import name for a module.
    fn add_module_alias(&self, uri: &Url, alias: &str);

    /// Removes a module and its aliases from the analyzer.
    fn remove_module(&self, uri: &Url);

    /// Gets the URIs of modules that import the given module name.
    fn entries_importing(&self, name: &str, recursive: bool) -> Vec<Url>;

    /// Gets the module search paths of the analyzer.
    fn search_paths(&self) -> Vec<PathBuf>;

    /// Gets the current diagnostics for a module, keyed by document part.
    fn diagnostics(&self, uri: &Url) -> HashMap<u32, Vec<Diagnostic>>;

    /// Discards derived module state and rebuilds it from the search paths.
    fn reload_modules(&self);

    /// Analyzes a parsed module.
    fn analyze(&self, uri: &Url, tree: &Arc<dyn SyntaxTree>, cookie: &ParseCookie) -> Result<()>;

    /// Gets the members of the given expression at a position.
    ///
    /// When `intersect` is set and the expression has multiple possible
    /// types, only members common to every type are returned.
    fn members(
        &self,
        uri: &Url,
        expression: &str,
        position: SourcePosition,
        intersect: bool,
    ) -> Vec<AnalysisValue>;

    /// Gets all names available at the given position.
    fn available_names(
        &self,
        uri: &Url,
        position: SourcePosition,
        include_all_modules: bool,
    ) -> Vec<AnalysisValue>;

    /// Gets the overloads of the given callable at a position.
    fn overloads(&self, uri: &Url, callee: &str, position: SourcePosition) -> Vec<Overload>;

    /// Gets the variable references for the given expression at a position.
    fn variables(
        &self,
        uri: &Url,
        expression: &str,
        position: SourcePosition,
    ) -> Vec<VariableReference>;

    /// Gets the analyzed values of the given expression at a position.
    fn values(&self, uri: &Url, expression: &str, position: SourcePosition) -> Vec<AnalysisValue>;

    /// Gets the declaration locations of the module with the given name.
    fn module_definitions(&self, name: &str) -> Vec<Location>;

    /// Gets the members declared by the module at the given URI.
    fn module_members(&self, uri: &Url) -> Vec<MemberInfo>;
}
