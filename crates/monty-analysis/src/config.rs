//! Configuration for the analysis core.

use std::path::PathBuf;

use serde::Deserialize;

/// The version of the Python language being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LanguageVersion {
    /// The major version.
    pub major: u32,
    /// The minor version.
    pub minor: u32,
}

impl LanguageVersion {
    /// Constructs a new language version.
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether this version requires packages to contain an `__init__.py`.
    ///
    /// Namespace packages removed the requirement in 3.3.
    pub fn requires_init_file(&self) -> bool {
        *self < Self::new(3, 3)
    }

    /// Parses a version from a `major.minor` string.
    ///
    /// Trailing components are ignored; returns `None` when the string does
    /// not start with two integer components.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
        Some(Self { major, minor })
    }
}

impl Default for LanguageVersion {
    fn default() -> Self {
        Self::new(3, 7)
    }
}

impl std::fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{major}.{minor}", major = self.major, minor = self.minor)
    }
}

impl<'de> Deserialize<'de> for LanguageVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid language version `{s}`")))
    }
}

/// Configuration of the analysis core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long read requests wait for the current parse, in milliseconds.
    ///
    /// A negative value waits indefinitely; zero does not wait at all.
    pub completions_timeout: i64,
    /// The language version being analyzed.
    pub language_version: LanguageVersion,
    /// Additional module search paths.
    pub search_paths: Vec<PathBuf>,
    /// Whether verbose request tracing is enabled.
    pub trace_logging: bool,
    /// Whether diagnostics are published as documents change.
    pub live_linting: bool,
    /// Whether workspace files are loaded only on explicit request.
    pub manual_file_load: bool,
    /// Whether analysis progress updates are reported to the client.
    pub analysis_updates: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            completions_timeout: -1,
            language_version: Default::default(),
            search_paths: Default::default(),
            trace_logging: false,
            live_linting: true,
            manual_file_load: false,
            analysis_updates: false,
        }
    }
}

impl ServerConfig {
    /// Sets the completions timeout in milliseconds.
    pub fn with_completions_timeout(mut self, timeout: i64) -> Self {
        self.completions_timeout = timeout;
        self
    }

    /// Sets the language version being analyzed.
    pub fn with_language_version(mut self, version: LanguageVersion) -> Self {
        self.language_version = version;
        self
    }

    /// Sets the additional module search paths.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn it_parses_versions() {
        assert_eq!(LanguageVersion::parse("3.7"), Some(LanguageVersion::new(3, 7)));
        assert_eq!(
            LanguageVersion::parse("2.7.18"),
            Some(LanguageVersion::new(2, 7))
        );
        assert_eq!(LanguageVersion::parse("3"), Some(LanguageVersion::new(3, 0)));
        assert_eq!(LanguageVersion::parse("dev"), None);
    }

    #[test]
    fn it_requires_init_files_before_namespace_packages() {
        assert!(LanguageVersion::new(2, 7).requires_init_file());
        assert!(LanguageVersion::new(3, 2).requires_init_file());
        assert!(!LanguageVersion::new(3, 3).requires_init_file());
        assert!(!LanguageVersion::new(3, 11).requires_init_file());
    }
}
