//! A Language Server Protocol implementation for Python.
//!
//! The server wires the analysis core to a `tower-lsp` transport: document
//! lifecycle notifications feed the core's change reconciler and pipeline,
//! read requests are served from parse snapshots, and published diagnostics
//! are forwarded to the client as they are emitted.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use anyhow::Result;
use monty_analysis::AnalysisEvent;
use monty_analysis::CompletionOptions;
use monty_analysis::InterpreterRegistry;
use monty_analysis::ServerConfig;
use monty_analysis::Workspace;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::jsonrpc::Result as RpcResult;
use tower_lsp::lsp_types::*;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::options::ClientFlags;
use crate::options::InitializationOptions;

mod options;
mod proto;

/// Represents options for running the LSP server.
#[derive(Debug, Default, Clone)]
pub struct ServerOptions {
    /// The name of the server.
    ///
    /// Defaults to the `monty-lsp` crate name.
    pub name: Option<String>,

    /// The version of the server.
    ///
    /// Defaults to the version of the `monty-lsp` crate.
    pub version: Option<String>,
}

/// An LSP server for analyzing Python documents.
#[derive(Debug)]
pub struct Server {
    /// The LSP client connected to the server.
    client: Client,
    /// The options for the server.
    options: ServerOptions,
    /// The registry interpreter providers are resolved from.
    registry: Arc<InterpreterRegistry>,
    /// The workspace managed by the server.
    workspace: Arc<Workspace>,
}

impl Server {
    /// Creates a new server for the given client.
    pub fn new(client: Client, options: ServerOptions, registry: Arc<InterpreterRegistry>) -> Self {
        let workspace = Workspace::new(ServerConfig::default());

        // Forward published diagnostics to the client as they are emitted
        let mut events = workspace.subscribe();
        let diagnostics_client = client.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let AnalysisEvent::PublishDiagnostics {
                    uri,
                    part,
                    version,
                    diagnostics,
                } = event
                {
                    diagnostics_client
                        .publish_diagnostics(proto::part_uri(&uri, part), diagnostics, Some(version))
                        .await;
                }
            }
        });

        Self {
            client,
            options,
            registry,
            workspace,
        }
    }

    /// Runs the server over stdio until a request is received to shut down.
    pub async fn run(options: ServerOptions, registry: Arc<InterpreterRegistry>) -> Result<()> {
        debug!("running LSP server: {options:#?}");

        let (service, socket) =
            LspService::new(|client| Self::new(client, options.clone(), registry.clone()));

        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        tower_lsp::Server::new(stdin, stdout, socket)
            .serve(service)
            .await;

        Ok(())
    }

    /// Gets the workspace managed by the server.
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Gets the name of the server.
    fn name(&self) -> &str {
        self.options
            .name
            .as_deref()
            .unwrap_or(env!("CARGO_CRATE_NAME"))
    }

    /// Gets the version of the server.
    fn version(&self) -> &str {
        self.options
            .version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION"))
    }

    /// Whether verbose request tracing is enabled.
    fn tracing_enabled(&self) -> bool {
        self.workspace.config().trace_logging
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Server {
    async fn initialize(&self, params: InitializeParams) -> RpcResult<InitializeResult> {
        debug!("received `initialize` request");

        let options = InitializationOptions::parse(params.initialization_options.as_ref());
        let flags = ClientFlags::parse(&[
            params.initialization_options.as_ref(),
            params.capabilities.experimental.as_ref(),
        ]);

        self.workspace.update_config(|config| {
            config.search_paths = options.search_paths.clone();
            config.trace_logging = flags.trace_logging;
            config.live_linting = flags.live_linting;
            config.manual_file_load = flags.manual_file_load;
            config.analysis_updates = flags.analysis_updates;
            if let Some(timeout) = flags.completions_timeout {
                config.completions_timeout = timeout;
            }
        });

        // A missing provider leaves the server serving empty results rather
        // than failing the handshake
        if let Err(e) = self.workspace.initialize(&self.registry, &options.interpreter) {
            error!("failed to create interpreter: {e:#}");
        }

        if !flags.manual_file_load {
            let mut roots = Vec::new();
            if let Some(folders) = &params.workspace_folders {
                roots.extend(folders.iter().filter_map(|f| f.uri.to_file_path().ok()));
            }
            #[allow(deprecated)]
            let root_uri = params.root_uri.clone();
            if roots.is_empty()
                && let Some(root) = root_uri.as_ref().and_then(|u| u.to_file_path().ok())
            {
                roots.push(root);
            }

            for root in roots {
                let workspace = self.workspace.clone();
                tokio::spawn(async move {
                    if let Err(e) = workspace.load_directory(&root).await {
                        error!(
                            "failed to load workspace directory `{root}`: {e:#}",
                            root = root.display()
                        );
                    }
                });
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::INCREMENTAL),
                        ..Default::default()
                    },
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(completion_capabilities()),
                signature_help_provider: Some(SignatureHelpOptions {
                    trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
                    retrigger_characters: None,
                    work_done_progress_options: Default::default(),
                }),
                references_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: self.name().to_string(),
                version: Some(self.version().to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(
                MessageType::INFO,
                format!(
                    "{name} (v{version}) server initialized",
                    name = self.name(),
                    version = self.version()
                ),
            )
            .await;

        info!(
            "{name} (v{version}) server initialized",
            name = self.name(),
            version = self.version()
        );
    }

    async fn shutdown(&self) -> RpcResult<()> {
        debug!("received `shutdown` request");
        self.workspace.shutdown().await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        if self.tracing_enabled() {
            debug!("received `textDocument/didOpen` request: {params:#?}");
        }

        self.workspace.open_document(
            &params.text_document.uri,
            params.text_document.version,
            params.text_document.text,
        );
    }

    async fn did_change(&self, mut params: DidChangeTextDocumentParams) {
        if self.tracing_enabled() {
            debug!("received `textDocument/didChange` request: {params:#?}");
        }

        let uri = params.text_document.uri.clone();
        let change = proto::document_change(&mut params);
        if let Err(e) = self.workspace.change_document(&uri, change, true) {
            warn!("failed to apply change to `{uri}`: {e}");
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        if self.tracing_enabled() {
            debug!("received `textDocument/didClose` request: {params:#?}");
        }

        let uri = params.text_document.uri;
        if let Err(e) = self.workspace.close_document(&uri) {
            warn!("failed to close `{uri}`: {e}");
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        debug!("received `workspace/didChangeWatchedFiles` request: {params:#?}");

        for event in params.changes {
            match event.typ {
                FileChangeType::CREATED => self.workspace.file_created(&event.uri),
                FileChangeType::DELETED => self.workspace.file_deleted(&event.uri),
                FileChangeType::CHANGED => self.workspace.file_changed(&event.uri),
                _ => {}
            }
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        debug!("received `workspace/didChangeConfiguration` request");

        let flags = ClientFlags::parse(&[Some(&params.settings)]);
        self.workspace.update_config(|config| {
            config.trace_logging = flags.trace_logging;
            config.live_linting = flags.live_linting;
            config.manual_file_load = flags.manual_file_load;
            if let Some(timeout) = flags.completions_timeout {
                config.completions_timeout = timeout;
            }
        });

        self.workspace.configuration_changed();
    }

    async fn completion(&self, params: CompletionParams) -> RpcResult<Option<CompletionResponse>> {
        if self.tracing_enabled() {
            debug!("received `textDocument/completion` request: {params:#?}");
        }

        let items = self
            .workspace
            .completion(
                &params.text_document_position.text_document.uri,
                proto::source_position(params.text_document_position.position),
                None,
                &CompletionOptions {
                    include_argument_names: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(proto::rpc_error)?;

        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn completion_resolve(&self, item: CompletionItem) -> RpcResult<CompletionItem> {
        // Items are fully rendered at completion time
        Ok(item)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> RpcResult<Option<SignatureHelp>> {
        if self.tracing_enabled() {
            debug!("received `textDocument/signatureHelp` request: {params:#?}");
        }

        self.workspace
            .signature_help(
                &params.text_document_position_params.text_document.uri,
                proto::source_position(params.text_document_position_params.position),
                None,
            )
            .await
            .map_err(proto::rpc_error)
    }

    async fn references(&self, params: ReferenceParams) -> RpcResult<Option<Vec<Location>>> {
        if self.tracing_enabled() {
            debug!("received `textDocument/references` request: {params:#?}");
        }

        let locations = self
            .workspace
            .references(
                &params.text_document_position.text_document.uri,
                proto::source_position(params.text_document_position.position),
                None,
                params.context.include_declaration,
            )
            .await
            .map_err(proto::rpc_error)?;

        Ok(Some(locations))
    }

    async fn hover(&self, params: HoverParams) -> RpcResult<Option<Hover>> {
        if self.tracing_enabled() {
            debug!("received `textDocument/hover` request: {params:#?}");
        }

        self.workspace
            .hover(
                &params.text_document_position_params.text_document.uri,
                proto::source_position(params.text_document_position_params.position),
                None,
            )
            .await
            .map_err(proto::rpc_error)
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> RpcResult<Option<Vec<SymbolInformation>>> {
        if self.tracing_enabled() {
            debug!("received `workspace/symbol` request: {params:#?}");
        }

        Ok(Some(self.workspace.workspace_symbols(&params.query)))
    }
}

/// The completion capabilities advertised to the client.
fn completion_capabilities() -> tower_lsp::lsp_types::CompletionOptions {
    tower_lsp::lsp_types::CompletionOptions {
        resolve_provider: Some(true),
        trigger_characters: Some(vec![".".to_string()]),
        ..Default::default()
    }
}
