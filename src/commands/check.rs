//! Implementation of the `check` subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use monty_analysis::AnalysisEvent;
use monty_analysis::InterpreterConfig;
use monty_analysis::InterpreterRegistry;
use monty_analysis::ServerConfig;
use monty_analysis::Workspace;

/// Arguments for the `check` subcommand.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// The directory to analyze.
    #[clap(value_name = "DIR")]
    pub dir: PathBuf,

    /// The identifier of the interpreter provider to use.
    #[clap(long, value_name = "NAME")]
    pub interpreter: Option<String>,
}

/// Runs the `check` command.
pub async fn check(args: Args, registry: Arc<InterpreterRegistry>) -> Result<()> {
    let workspace = Workspace::new(ServerConfig::default());
    workspace
        .initialize(
            &registry,
            &InterpreterConfig {
                type_name: args.interpreter,
                ..Default::default()
            },
        )
        .context("failed to create an interpreter")?;

    let mut events = workspace.subscribe();
    let found = workspace
        .load_directory(&args.dir)
        .await
        .with_context(|| format!("failed to load `{dir}`", dir = args.dir.display()))?;
    workspace.wait_for_complete().await;

    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if let AnalysisEvent::PublishDiagnostics {
            uri, diagnostics, ..
        } = event
        {
            for diagnostic in diagnostics {
                count += 1;
                println!(
                    "{uri}:{line}:{column}: {message}",
                    line = diagnostic.range.start.line + 1,
                    column = diagnostic.range.start.character + 1,
                    message = diagnostic.message
                );
            }
        }
    }

    println!(
        "checked {files} file(s), found {count} diagnostic(s)",
        files = found.len()
    );
    Ok(())
}
