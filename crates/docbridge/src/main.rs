//! docbridge CLI - extension runtime for the document-processing bridge
//!
//! This is the main entry point for the docbridge command-line interface.

mod cli;
mod commands;
mod output;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Must happen before any TLS operation
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let state = cli.state.as_deref();
    match cli.command {
        Commands::Source(cmd) => commands::source::run(cmd, state).await,
        Commands::Extension(cmd) => commands::extension::run(cmd, state).await,
        Commands::Instance(cmd) => commands::instance::run(cmd, state).await,
        Commands::Deps(cmd) => commands::deps::run(cmd, state).await,
        Commands::Logs(args) => commands::logs::run(args, state).await,
        Commands::Ledger(args) => commands::ledger::run(args, state).await,
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            // Lifecycle milestones are logged at info
            0 => EnvFilter::new("warn,docbridge=info,docbridge_extensions=info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(filter)
        .init();
}
