//! Client-supplied initialization options and capability flags.

use std::path::PathBuf;

use monty_analysis::InterpreterConfig;
use serde::Deserialize;
use serde_json::Value;

/// Options supplied by the client at initialization.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct InitializationOptions {
    /// Interpreter selection options.
    pub interpreter: InterpreterConfig,
    /// Additional module search paths.
    #[serde(rename = "searchPaths")]
    pub search_paths: Vec<PathBuf>,
}

impl InitializationOptions {
    /// Parses initialization options, tolerating absent or malformed values.
    pub fn parse(value: Option<&Value>) -> Self {
        value
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// Capability flags the client may set.
///
/// Flags are looked up by their dotted names in both the initialization
/// options and the client's experimental capabilities.
#[derive(Debug, Clone)]
pub(crate) struct ClientFlags {
    /// Whether verbose request tracing is enabled.
    pub trace_logging: bool,
    /// Whether diagnostics are published as documents change.
    pub live_linting: bool,
    /// Whether workspace files are loaded only on explicit request.
    pub manual_file_load: bool,
    /// How long read requests wait for the current parse, in milliseconds.
    pub completions_timeout: Option<i64>,
    /// Whether analysis progress updates are reported to the client.
    pub analysis_updates: bool,
}

impl Default for ClientFlags {
    fn default() -> Self {
        Self {
            trace_logging: false,
            live_linting: true,
            manual_file_load: false,
            completions_timeout: None,
            analysis_updates: false,
        }
    }
}

impl ClientFlags {
    /// Parses the flags from the given sources, earliest source wins.
    pub fn parse(sources: &[Option<&Value>]) -> Self {
        let mut flags = Self::default();
        if let Some(value) = flag(sources, "python.traceLogging").and_then(Value::as_bool) {
            flags.trace_logging = value;
        }
        if let Some(value) = flag(sources, "python.liveLinting").and_then(Value::as_bool) {
            flags.live_linting = value;
        }
        if let Some(value) = flag(sources, "python.manualFileLoad").and_then(Value::as_bool) {
            flags.manual_file_load = value;
        }
        if let Some(value) = flag(sources, "python.completionsTimeout").and_then(Value::as_i64) {
            flags.completions_timeout = Some(value);
        }
        if let Some(value) = flag(sources, "python.analysisUpdates").and_then(Value::as_bool) {
            flags.analysis_updates = value;
        }

        flags
    }
}

/// Looks a flag up by name in the given sources.
fn flag<'a>(sources: &[Option<&'a Value>], name: &str) -> Option<&'a Value> {
    sources.iter().flatten().find_map(|source| source.get(name))
}
