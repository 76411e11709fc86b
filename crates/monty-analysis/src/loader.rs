//! Initial workspace enumeration.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::config::ServerConfig;
use crate::document::Entry;
use crate::document::EntryKind;
use crate::event::AnalysisEvent;
use crate::event::EventBus;
use crate::store::DocumentStore;

/// The file extensions of Python source files.
const SOURCE_EXTENSIONS: &[&str] = &["py", "pyw", "pyi"];

/// The file that marks a directory as a package.
const INIT_FILE: &str = "__init__.py";

/// Whether the given path names a Python source file.
fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Gets the module name for a source file path.
///
/// An `__init__.py` takes the name of its containing package directory.
pub(crate) fn module_name_for(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem == "__init__" {
        return Some(path.parent()?.file_name()?.to_str()?.to_string());
    }

    Some(stem.to_string())
}

/// Computes every importable name for a source file.
///
/// One dotted name is produced per search path that contains the file; when
/// no search path applies, the bare module name is used. The first name is
/// the primary module name.
pub(crate) fn module_names(path: &Path, search_paths: &[PathBuf]) -> Vec<String> {
    let mut names = Vec::new();

    for search_path in search_paths {
        let relative = match path.strip_prefix(search_path) {
            Ok(relative) => relative,
            Err(_) => continue,
        };

        let mut components: Vec<String> = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .map(|c| c.to_string())
            .collect();

        let last = match components.last_mut() {
            Some(last) => last,
            None => continue,
        };

        let stem = SOURCE_EXTENSIONS
            .iter()
            .find_map(|extension| last.strip_suffix(&format!(".{extension}")))
            .map(|stem| stem.to_string());
        match stem {
            Some(stem) => *last = stem,
            None => continue,
        }

        if components.last().map(String::as_str) == Some("__init__") {
            components.pop();
        }

        if components.is_empty() {
            continue;
        }

        let name = components.join(".");
        if !names.contains(&name) {
            names.push(name);
        }
    }

    if names.is_empty()
        && let Some(name) = module_name_for(path)
    {
        names.push(name);
    }

    names
}

/// Enumerates workspace directories for source files.
///
/// Each directory level is enumerated non-recursively: files first, then
/// subdirectories. When the configured language version requires packages to
/// carry an init file, subdirectories without one are skipped entirely.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryLoader {
    /// The document store entries are created in.
    store: Arc<DocumentStore>,
    /// The event bus `FileFound` events are emitted on.
    events: Arc<EventBus>,
    /// The configuration of the core.
    config: Arc<RwLock<ServerConfig>>,
}

impl DirectoryLoader {
    /// Constructs a new loader.
    pub fn new(
        store: Arc<DocumentStore>,
        events: Arc<EventBus>,
        config: Arc<RwLock<ServerConfig>>,
    ) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Loads every source file under the given root.
    ///
    /// An entry is created for each discovered file and a `FileFound` event
    /// is emitted. Returns the entries that were newly created, in discovery
    /// order.
    pub fn load(&self, root: &Path) -> Result<Vec<Arc<Entry>>> {
        let requires_init = self.config.read().language_version.requires_init_file();
        let mut found = Vec::new();
        self.load_level(root, requires_init, &mut found)
            .with_context(|| format!("failed to load directory `{root}`", root = root.display()))?;

        debug!(
            "loaded {count} source file(s) from `{root}`",
            count = found.len(),
            root = root.display()
        );
        Ok(found)
    }

    /// Loads one directory level.
    fn load_level(
        &self,
        directory: &Path,
        requires_init: bool,
        found: &mut Vec<Arc<Entry>>,
    ) -> Result<()> {
        let mut files = Vec::new();
        let mut subdirectories = Vec::new();

        for result in std::fs::read_dir(directory).with_context(|| {
            format!(
                "failed to read directory `{directory}`",
                directory = directory.display()
            )
        })? {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "error while enumerating `{directory}`: {e}",
                        directory = directory.display()
                    );
                    continue;
                }
            };

            let path = entry.path();
            if path.is_dir() {
                subdirectories.push(path);
            } else if is_source_file(&path) {
                files.push(path);
            }
        }

        files.sort();
        subdirectories.sort();

        for file in files {
            let uri = match Url::from_file_path(&file) {
                Ok(uri) => uri,
                Err(()) => {
                    warn!("skipping `{file}`: not a valid file URI", file = file.display());
                    continue;
                }
            };

            let entry = self
                .store
                .get_or_add(Arc::new(Entry::new(uri.clone(), EntryKind::Source)));
            self.events.emit(AnalysisEvent::FileFound { uri });
            found.push(entry);
        }

        for subdirectory in subdirectories {
            if requires_init && !subdirectory.join(INIT_FILE).is_file() {
                debug!(
                    "skipping `{subdirectory}`: no `{INIT_FILE}` present",
                    subdirectory = subdirectory.display()
                );
                continue;
            }

            self.load_level(&subdirectory, requires_init, found)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    /// Creates a loader over fresh state with the given language version.
    fn loader(version: crate::LanguageVersion) -> DirectoryLoader {
        let config = ServerConfig::default().with_language_version(version);
        DirectoryLoader::new(
            Arc::new(DocumentStore::new()),
            Arc::new(EventBus::new()),
            Arc::new(RwLock::new(config)),
        )
    }

    #[test]
    fn it_computes_module_names() {
        let search = PathBuf::from("/src");
        assert_eq!(
            module_names(Path::new("/src/m.py"), std::slice::from_ref(&search)),
            vec!["m"]
        );
        assert_eq!(
            module_names(Path::new("/src/pkg/mod.py"), std::slice::from_ref(&search)),
            vec!["pkg.mod"]
        );
        assert_eq!(
            module_names(Path::new("/src/pkg/__init__.py"), &[search]),
            vec!["pkg"]
        );
        // Without a containing search path, the bare stem is used
        assert_eq!(module_names(Path::new("/other/m.py"), &[]), vec!["m"]);
    }

    #[test]
    fn it_loads_files_and_recurses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("b.py"), "").unwrap();

        let loader = loader(crate::LanguageVersion::new(3, 7));
        let mut events = loader.events.subscribe();
        let found = loader.load(dir.path()).unwrap();

        let mut names: Vec<_> = found
            .iter()
            .filter_map(|e| e.path().and_then(|p| module_name_for(p)))
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        // One FileFound event per discovered file
        for _ in 0..2 {
            assert!(matches!(
                events.try_recv(),
                Ok(AnalysisEvent::FileFound { .. })
            ));
        }
    }

    #[test]
    fn it_skips_packages_without_init_files_on_old_versions() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("b.py"), "").unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::write(dir.path().join("real").join(INIT_FILE), "").unwrap();
        fs::write(dir.path().join("real").join("c.py"), "").unwrap();

        let loader = loader(crate::LanguageVersion::new(2, 7));
        let found = loader.load(dir.path()).unwrap();

        let mut names: Vec<_> = found
            .iter()
            .filter_map(|e| e.path().and_then(|p| module_name_for(p)))
            .collect();
        names.sort();
        assert_eq!(names, vec!["c", "real"]);
    }
}
