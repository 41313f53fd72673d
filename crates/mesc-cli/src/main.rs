//! # mesc CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mesc_cli::ledger::{run_ledger, LedgerArgs};
use mesc_cli::template::{run_template, TemplateArgs};
use mesc_cli::terms::{run_terms, TermsArgs};

/// Milestone escrow operator CLI
///
/// Verifies exported audit ledgers, previews milestone templates, and
/// computes agreement hashes without a running API server.
#[derive(Parser, Debug)]
#[command(name = "mesc", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify or inspect a JSON-lines audit ledger.
    Ledger(LedgerArgs),

    /// List milestone templates and preview allocations.
    Template(TemplateArgs),

    /// Agreement-terms utilities.
    Terms(TermsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // Logs go to stderr so that stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "mesc CLI starting");

    let result = match cli.command {
        Commands::Ledger(args) => run_ledger(&args),
        Commands::Template(args) => run_template(&args),
        Commands::Terms(args) => run_terms(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
