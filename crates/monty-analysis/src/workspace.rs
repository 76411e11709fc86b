//! The workspace facade coordinating document state and analysis.

use std::path::Path;
use std::sync::Arc;

use lsp_types::CompletionItem;
use lsp_types::Hover;
use lsp_types::Location;
use lsp_types::SignatureHelp;
use lsp_types::SymbolInformation;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;
use url::Url;

use crate::change::ChangeReconciler;
use crate::change::DocumentChange;
use crate::config::ServerConfig;
use crate::document::DISK_VERSION;
use crate::document::Entry;
use crate::document::EntryKind;
use crate::document::ParseCookie;
use crate::edit::SourcePosition;
use crate::error::Error;
use crate::error::Result;
use crate::event::AnalysisEvent;
use crate::event::EventBus;
use crate::handlers;
use crate::handlers::CompletionOptions;
use crate::handlers::Snapshot;
use crate::interpreter::AnalyzerHandle;
use crate::interpreter::Interpreter;
use crate::interpreter::InterpreterConfig;
use crate::interpreter::InterpreterRegistry;
use crate::loader;
use crate::loader::DirectoryLoader;
use crate::pipeline::ParseAnalyzePipeline;
use crate::queue::Priority;
use crate::rayon::RayonHandle;
use crate::store::DocumentStore;

/// Coordinates the document store, the parse and analysis queues, and the
/// read request handlers.
///
/// A workspace is created without language services; `initialize` (or
/// `set_services`) supplies them, and `shutdown` drains outstanding work and
/// atomically releases them. Work that observes released services returns
/// without effect.
#[derive(Debug)]
pub struct Workspace {
    /// The configuration of the core.
    config: Arc<RwLock<ServerConfig>>,
    /// The document store.
    store: Arc<DocumentStore>,
    /// The parse and analyze pipeline.
    pipeline: Arc<ParseAnalyzePipeline>,
    /// The incremental change reconciler.
    reconciler: ChangeReconciler,
    /// The directory loader.
    loader: DirectoryLoader,
    /// The active language services.
    services: AnalyzerHandle,
    /// The event bus.
    events: Arc<EventBus>,
    /// Cancelled on shutdown.
    cancel: CancellationToken,
}

impl Workspace {
    /// Constructs a new workspace with the given configuration.
    ///
    /// Must be called from the context of a Tokio runtime.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let config = Arc::new(RwLock::new(config));
        let store = Arc::new(DocumentStore::new());
        let events = Arc::new(EventBus::new());
        let services = AnalyzerHandle::new();
        let cancel = CancellationToken::new();
        let pipeline = ParseAnalyzePipeline::new(
            store.clone(),
            services.clone(),
            events.clone(),
            config.clone(),
            cancel.child_token(),
        );

        let workspace = Arc::new(Self {
            reconciler: ChangeReconciler::new(store.clone()),
            loader: DirectoryLoader::new(store.clone(), events.clone(), config.clone()),
            config,
            store,
            pipeline,
            services,
            events,
            cancel,
        });

        // Surface unhandled analysis errors in the log
        let mut errors = workspace.pipeline.unhandled_errors();
        tokio::spawn(async move {
            while errors.changed().await.is_ok() {
                let message = errors.borrow_and_update().clone();
                if let Some(message) = message {
                    error!("unhandled analysis error: {message}");
                }
            }
        });

        workspace
    }

    /// Gets a copy of the current configuration.
    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Updates the configuration in place.
    pub fn update_config(&self, update: impl FnOnce(&mut ServerConfig)) {
        update(&mut self.config.write());
    }

    /// Gets the document store.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Subscribes to events emitted by the workspace.
    pub fn subscribe(&self) -> UnboundedReceiver<AnalysisEvent> {
        self.events.subscribe()
    }

    /// Creates language services from the registry and activates them.
    pub fn initialize(
        &self,
        registry: &InterpreterRegistry,
        interpreter: &InterpreterConfig,
    ) -> anyhow::Result<()> {
        let services = registry.create(interpreter)?;
        if let Some(version) = interpreter.version {
            self.config.write().language_version = version;
        }

        self.services.set(services);
        Ok(())
    }

    /// Activates the given language services directly.
    pub fn set_services(&self, services: Interpreter) {
        self.services.set(services);
    }

    /// Drains outstanding work and releases the language services.
    ///
    /// Work still in flight observes the released services and returns
    /// without effect.
    pub async fn shutdown(&self) {
        self.pipeline.wait_for_complete().await;
        self.cancel.cancel();
        self.services.clear();
    }

    /// Completes when all enqueued parse and analysis work has drained.
    pub async fn wait_for_complete(&self) {
        self.pipeline.wait_for_complete().await;
    }

    /// Adds a file to the workspace, creating its entry if needed.
    ///
    /// The file's module names are registered with the analyzer and every
    /// entry importing one of them is re-enqueued at low priority.
    pub fn add_file(&self, uri: &Url) -> Arc<Entry> {
        let canonical = DocumentStore::canonical(uri);
        let kind = entry_kind(&canonical);
        let entry = self.store.get_or_add(Arc::new(Entry::new(canonical, kind)));
        self.register_module(&entry);
        entry
    }

    /// Opens a document with the given initial text.
    ///
    /// Opening an already present URI resets the part to the supplied text
    /// and version; no duplicate entry is created.
    pub fn open_document(&self, uri: &Url, version: i32, text: String) -> Arc<Entry> {
        let part = DocumentStore::get_part(uri);
        let entry = self.add_file(uri);
        entry.document().reset(part, version, Some(text));
        self.pipeline.enqueue(entry.clone(), Priority::High, true);
        entry
    }

    /// Applies an incremental change notification.
    ///
    /// Applied changes enqueue the document for reparse and analysis unless
    /// `enqueue` is unset.
    pub fn change_document(&self, uri: &Url, change: DocumentChange, enqueue: bool) -> Result<()> {
        let applied = self.reconciler.apply(uri, change)?;
        if applied && enqueue {
            let entry = self.store.get(uri)?;
            self.pipeline.enqueue(entry, Priority::Normal, true);
        }

        Ok(())
    }

    /// Closes a document part, reverting it to its file system contents.
    ///
    /// Entries without a file system backing are unloaded once closed.
    pub fn close_document(&self, uri: &Url) -> Result<()> {
        let entry = self.store.get(uri)?;
        let part = DocumentStore::get_part(uri);
        entry.document().reset(part, DISK_VERSION, None);

        let on_disk = entry.path().map(|path| path.is_file()).unwrap_or(false);
        if on_disk {
            // Reparse from disk so diagnostics reflect the saved contents
            self.pipeline.enqueue(entry, Priority::Normal, true);
        } else {
            let any_open = entry
                .document()
                .parts()
                .into_iter()
                .any(|part| entry.document().is_open(part));
            if !any_open {
                self.unload_document(uri)?;
            }
        }

        Ok(())
    }

    /// Unloads a document, removing it from the store and the analyzer.
    ///
    /// Every entry importing one of the document's module names is
    /// re-enqueued at low priority. Returns `false` when the URI was not in
    /// the store.
    pub fn unload_document(&self, uri: &Url) -> Result<bool> {
        let removed = match self.store.remove(uri) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        self.pipeline.forget(removed.uri());

        let names = removed.aliases();
        if let Some(services) = self.services.get() {
            services.analyzer.remove_module(removed.uri());
        }

        self.requeue_importers(&names);
        Ok(true)
    }

    /// Handles creation of a watched file.
    pub fn file_created(&self, uri: &Url) {
        if self.config.read().manual_file_load {
            return;
        }

        let entry = self.add_file(uri);
        self.pipeline.enqueue(entry, Priority::Low, true);
    }

    /// Handles deletion of a watched file.
    pub fn file_deleted(&self, uri: &Url) {
        if let Err(e) = self.unload_document(uri) {
            warn!("failed to unload deleted file `{uri}`: {e}");
        }
    }

    /// Handles a change to a watched file.
    ///
    /// Documents with in-memory buffer state are ignored; the buffer wins
    /// over the file system.
    pub fn file_changed(&self, uri: &Url) {
        let entry = match self.store.try_get(uri) {
            Some(entry) => entry,
            None => return,
        };

        let in_memory = entry
            .document()
            .parts()
            .into_iter()
            .any(|part| entry.document().is_open(part));
        if in_memory {
            return;
        }

        self.pipeline.enqueue(entry, Priority::Low, true);
    }

    /// Handles a configuration change.
    ///
    /// Module state is reloaded and every known document is re-enqueued at
    /// normal priority.
    pub fn configuration_changed(&self) {
        if let Some(services) = self.services.get() {
            services.analyzer.reload_modules();
        }

        for entry in self.store.entries() {
            self.pipeline.enqueue(entry, Priority::Normal, true);
        }
    }

    /// Loads every source file under the given directory root.
    ///
    /// The root becomes a module search path. Returns the newly discovered
    /// entries.
    pub async fn load_directory(&self, root: &Path) -> Result<Vec<Arc<Entry>>> {
        {
            let mut config = self.config.write();
            if !config.search_paths.iter().any(|p| p == root) {
                config.search_paths.push(root.to_path_buf());
            }
        }

        let loader = self.loader.clone();
        let root = root.to_path_buf();
        let found = RayonHandle::spawn(move || loader.load(&root))
            .await
            .map_err(Error::Internal)?;

        let manual = self.config.read().manual_file_load;
        for entry in &found {
            self.register_module(entry);
            if !manual {
                self.pipeline.enqueue(entry.clone(), Priority::Low, true);
            }
        }

        Ok(found)
    }

    /// Enqueues an entry for reparse and, optionally, analysis.
    pub fn enqueue(&self, entry: Arc<Entry>, priority: Priority, analyze: bool) {
        self.pipeline.enqueue(entry, priority, analyze);
    }

    /// Registers a file's module names with the analyzer.
    fn register_module(&self, entry: &Arc<Entry>) {
        if !entry.is_analyzable() {
            return;
        }

        let services = match self.services.get() {
            Some(services) => services,
            None => return,
        };

        let path = match entry.path() {
            Some(path) => path.clone(),
            None => return,
        };

        let mut search_paths = services.analyzer.search_paths();
        search_paths.extend(self.config.read().search_paths.clone());
        let names = loader::module_names(&path, &search_paths);
        let (primary, aliases) = match names.split_first() {
            Some(split) => split,
            None => return,
        };

        let cookie = ParseCookie::snapshot(entry.document());
        if let Err(e) = services
            .analyzer
            .add_module(primary, Some(&path), entry.uri(), &cookie)
        {
            warn!(
                "failed to add module `{primary}` for `{uri}`: {e:#}",
                uri = entry.uri()
            );
            return;
        }

        for alias in aliases {
            services.analyzer.add_module_alias(entry.uri(), alias);
        }

        entry.set_module_names(Some(primary.clone()), names.clone());
        self.requeue_importers(&names);
    }

    /// Re-enqueues every entry importing one of the given names at low
    /// priority.
    fn requeue_importers(&self, names: &[String]) {
        let services = match self.services.get() {
            Some(services) => services,
            None => return,
        };

        for name in names {
            for uri in services.analyzer.entries_importing(name, false) {
                if let Some(entry) = self.store.try_get(&uri) {
                    self.pipeline.enqueue(entry, Priority::Low, true);
                }
            }
        }
    }

    /// Captures a consistent snapshot of a document for a read request.
    ///
    /// Waits for the current parse, bounded by the configured completions
    /// timeout (a negative timeout waits indefinitely). Returns `Ok(None)`
    /// when no analysis is available; read requests then produce empty but
    /// well-formed results.
    async fn snapshot(&self, uri: &Url, expected_version: Option<i32>) -> Result<Option<Snapshot>> {
        let entry = self.store.get(uri)?;
        if !entry.is_analyzable() {
            return Err(Error::UnsupportedDocumentType(entry.uri().clone()));
        }

        let services = match self.services.get() {
            Some(services) => services,
            None => return Ok(None),
        };

        let timeout = self.config.read().completions_timeout;
        self.pipeline.wait_for_parse(entry.uri(), timeout).await;

        let parse = match entry.parse_snapshot() {
            Some(parse) => parse,
            None => return Ok(None),
        };

        let snapshot = Snapshot {
            part: DocumentStore::get_part(uri),
            entry,
            tree: parse.tree,
            cookie: parse.cookie,
            services,
        };

        if let Some(expected) = expected_version {
            let actual = snapshot.cookie.version(snapshot.part).unwrap_or(0);
            if actual != expected {
                return Err(Error::MismatchedVersion { expected, actual });
            }
        }

        Ok(Some(snapshot))
    }

    /// Serves a completion request.
    pub async fn completion(
        &self,
        uri: &Url,
        position: SourcePosition,
        expected_version: Option<i32>,
        options: &CompletionOptions,
    ) -> Result<Vec<CompletionItem>> {
        match self.snapshot(uri, expected_version).await? {
            Some(snapshot) => Ok(handlers::completion(
                &snapshot,
                position,
                options,
                self.config.read().language_version,
            )),
            None => Ok(Vec::new()),
        }
    }

    /// Serves a signature help request.
    pub async fn signature_help(
        &self,
        uri: &Url,
        position: SourcePosition,
        expected_version: Option<i32>,
    ) -> Result<Option<SignatureHelp>> {
        match self.snapshot(uri, expected_version).await? {
            Some(snapshot) => Ok(handlers::signature_help(&snapshot, position)),
            None => Ok(None),
        }
    }

    /// Serves a references request.
    pub async fn references(
        &self,
        uri: &Url,
        position: SourcePosition,
        expected_version: Option<i32>,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        match self.snapshot(uri, expected_version).await? {
            Some(snapshot) => Ok(handlers::references(&snapshot, position, include_declaration)),
            None => Ok(Vec::new()),
        }
    }

    /// Serves a hover request.
    pub async fn hover(
        &self,
        uri: &Url,
        position: SourcePosition,
        expected_version: Option<i32>,
    ) -> Result<Option<Hover>> {
        match self.snapshot(uri, expected_version).await? {
            Some(snapshot) => Ok(handlers::hover(&snapshot, position)),
            None => Ok(None),
        }
    }

    /// Serves a workspace symbol request.
    pub fn workspace_symbols(&self, query: &str) -> Vec<SymbolInformation> {
        match self.services.get() {
            Some(services) => {
                handlers::workspace_symbol(&self.store, services.analyzer.as_ref(), query)
            }
            None => Vec::new(),
        }
    }
}

/// Determines the kind of entry to create for a URI.
///
/// Files with an extension that is not a Python source extension are tracked
/// but not analyzed.
fn entry_kind(uri: &Url) -> EntryKind {
    let path = uri.path();
    match path.rsplit_once('.').map(|(_, extension)| extension) {
        Some("py" | "pyw" | "pyi" | "ipynb") => EntryKind::Source,
        Some(extension) if !extension.contains('/') => EntryKind::External,
        _ => EntryKind::Source,
    }
}
