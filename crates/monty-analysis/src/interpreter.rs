//! The interpreter provider registry.
//!
//! Language services (the syntax parser and semantic analyzer) are supplied
//! by an interpreter provider selected through configuration. Providers
//! register a factory keyed by identifier; out-of-tree builds register their
//! factories before the server starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::config::LanguageVersion;
use crate::contracts::SemanticAnalyzer;
use crate::contracts::SyntaxParser;

/// Interpreter selection options supplied by the client at initialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterpreterConfig {
    /// The provider location requested by the client.
    ///
    /// Recorded for diagnostics; the registry is the loading path.
    #[serde(default)]
    pub assembly: Option<String>,
    /// The identifier of the interpreter factory to use.
    #[serde(default, rename = "typeName")]
    pub type_name: Option<String>,
    /// Provider specific properties.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// The language version of the interpreter.
    #[serde(default)]
    pub version: Option<LanguageVersion>,
}

/// The language services produced by an interpreter factory.
#[derive(Clone)]
pub struct Interpreter {
    /// The syntax parser.
    pub parser: Arc<dyn SyntaxParser>,
    /// The semantic analyzer.
    pub analyzer: Arc<dyn SemanticAnalyzer>,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter").finish_non_exhaustive()
    }
}

/// Creates language services for a configured interpreter.
pub trait InterpreterFactory: Send + Sync {
    /// The identifier the factory is registered under.
    fn identifier(&self) -> &str;

    /// Creates the language services for the given configuration.
    fn create(&self, config: &InterpreterConfig) -> Result<Interpreter>;
}

/// A registry of interpreter factories keyed by identifier.
#[derive(Default)]
pub struct InterpreterRegistry {
    /// The registered factories.
    factories: RwLock<HashMap<String, Arc<dyn InterpreterFactory>>>,
}

impl InterpreterRegistry {
    /// Constructs a new, empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a factory under its identifier.
    ///
    /// A factory with the same identifier replaces the previous registration.
    pub fn register(&self, factory: Arc<dyn InterpreterFactory>) {
        let id = factory.identifier().to_string();
        self.factories.write().insert(id, factory);
    }

    /// Creates language services for the given configuration.
    ///
    /// Returns an error when no factory is registered under the configured
    /// identifier.
    pub fn create(&self, config: &InterpreterConfig) -> Result<Interpreter> {
        let id = config.type_name.as_deref().unwrap_or("default");
        if let Some(assembly) = &config.assembly {
            debug!("interpreter assembly `{assembly}` requested; resolving `{id}` from registry");
        }

        let factory = self
            .factories
            .read()
            .get(id)
            .cloned()
            .with_context(|| format!("no interpreter factory is registered for `{id}`"))?;

        factory.create(config)
    }
}

impl fmt::Debug for InterpreterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterRegistry")
            .field("factories", &self.factories.read().len())
            .finish()
    }
}

/// A shared, clearable handle to the active language services.
///
/// The handle is set at initialization and atomically cleared at shutdown;
/// in-flight work that observes a cleared handle returns without effect.
#[derive(Clone, Default)]
pub struct AnalyzerHandle {
    /// The active language services.
    inner: Arc<RwLock<Option<Arc<Interpreter>>>>,
}

impl AnalyzerHandle {
    /// Constructs a new, empty handle.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the active language services, if any.
    pub fn get(&self) -> Option<Arc<Interpreter>> {
        self.inner.read().clone()
    }

    /// Sets the active language services.
    pub fn set(&self, interpreter: Interpreter) {
        *self.inner.write() = Some(Arc::new(interpreter));
    }

    /// Atomically clears the handle, returning the services it held.
    pub fn clear(&self) -> Option<Arc<Interpreter>> {
        self.inner.write().take()
    }
}

impl fmt::Debug for AnalyzerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerHandle")
            .field("active", &self.inner.read().is_some())
            .finish()
    }
}
