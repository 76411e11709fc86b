//! The Monty command line binary.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

mod commands;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use clap_verbosity_flag::WarnLevel;
use monty_analysis::InterpreterRegistry;
use tracing_subscriber::EnvFilter;

/// A language server for Python.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// The verbosity flags.
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

/// The supported subcommands.
#[derive(Subcommand)]
enum Command {
    /// Runs the language server.
    Lsp(commands::lsp::Args),
    /// Analyzes a directory and prints its diagnostics.
    Check(commands::check::Args),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the RPC transport
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity.tracing_level_filter().to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Out-of-tree interpreter providers register here before the server runs
    let registry = Arc::new(InterpreterRegistry::new());

    match cli.command {
        Command::Lsp(args) => commands::lsp::lsp(args, registry).await,
        Command::Check(args) => commands::check::check(args, registry).await,
    }
}
