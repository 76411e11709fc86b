//! Implementation of the language server protocol (LSP) subcommand.

use std::sync::Arc;

use anyhow::Result;
use anyhow::ensure;
use clap::Parser;
use monty_analysis::InterpreterRegistry;
use monty_lsp::Server;
use monty_lsp::ServerOptions;

/// Arguments for the `lsp` subcommand.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Use stdin and stdout for the RPC transport.
    #[clap(long, required = true)]
    pub stdio: bool,
}

/// Runs the `lsp` command.
pub async fn lsp(args: Args, registry: Arc<InterpreterRegistry>) -> Result<()> {
    ensure!(args.stdio, "only the stdio transport is supported");

    Server::run(
        ServerOptions {
            name: Some("Monty".into()),
            version: Some(env!("CARGO_PKG_VERSION").into()),
        },
        registry,
    )
    .await
}
