//! # Ledger Subcommand
//!
//! Offline checks against a JSON-lines audit ledger export, the same file
//! format the API server writes when `LEDGER_PATH` is set.
//!
//! `verify` recomputes every hash from genesis and reports the first broken
//! link. `show` prints entries, optionally filtered, one JSON object per line.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mesc_ledger::{read_jsonl, verify_chain, AuditLogEntry, EventType, LedgerError, LedgerFilter};

/// Arguments for the `mesc ledger` subcommand.
#[derive(Args, Debug)]
pub struct LedgerArgs {
    #[command(subcommand)]
    pub command: LedgerCommand,
}

/// Ledger subcommands.
#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Verify the hash chain of a ledger export.
    Verify {
        /// Path to the JSONL ledger file.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print ledger entries as JSON lines.
    Show {
        /// Path to the JSONL ledger file.
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Only entries for this entity (escrow id).
        #[arg(long, value_name = "ID")]
        entity: Option<String>,
        /// Only entries of this event type (e.g. PAYMENT_SETTLED).
        #[arg(long, value_name = "TYPE")]
        event_type: Option<String>,
        /// Only entries recorded by this actor.
        #[arg(long, value_name = "ACTOR")]
        actor: Option<String>,
    },
}

/// Execute the ledger subcommand.
pub fn run_ledger(args: &LedgerArgs) -> Result<u8> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &args.command {
        LedgerCommand::Verify { file } => cmd_verify(file, &mut out),
        LedgerCommand::Show {
            file,
            entity,
            event_type,
            actor,
        } => {
            let filter = build_filter(entity.as_deref(), event_type.as_deref(), actor.as_deref())?;
            cmd_show(file, &filter, &mut out)
        }
    }
}

fn load(file: &Path) -> Result<Vec<AuditLogEntry>> {
    if !file.exists() {
        anyhow::bail!("file not found: {}", file.display());
    }
    read_jsonl(file).with_context(|| format!("failed to load ledger: {}", file.display()))
}

/// Verify a ledger export. Exit code 0 when intact, 1 on tamper.
pub fn cmd_verify(file: &Path, out: &mut impl Write) -> Result<u8> {
    let entries = load(file)?;
    tracing::debug!(entries = entries.len(), file = %file.display(), "verifying ledger");
    match verify_chain(&entries) {
        Ok(report) => {
            writeln!(out, "OK: {} entries, tail {}", report.entries, report.tail_hash)?;
            Ok(0)
        }
        Err(LedgerError::TamperDetected {
            at_index,
            expected,
            actual,
        }) => {
            tracing::info!(at_index, %expected, %actual, "chain mismatch");
            writeln!(out, "FAIL: tamper detected at index {at_index}")?;
            Ok(1)
        }
        Err(e) => Err(e).context("ledger verification failed"),
    }
}

/// Print every entry passing `filter` as one JSON line.
pub fn cmd_show(file: &Path, filter: &LedgerFilter, out: &mut impl Write) -> Result<u8> {
    let entries = load(file)?;
    let mut shown = 0usize;
    for entry in entries.iter().filter(|e| filter.matches(e)) {
        writeln!(out, "{}", serde_json::to_string(entry)?)?;
        shown += 1;
    }
    tracing::debug!(shown, total = entries.len(), "ledger entries printed");
    Ok(0)
}

fn build_filter(
    entity: Option<&str>,
    event_type: Option<&str>,
    actor: Option<&str>,
) -> Result<LedgerFilter> {
    let mut filter = LedgerFilter::all();
    if let Some(entity) = entity {
        filter = filter.entity(entity);
    }
    if let Some(raw) = event_type {
        let event_type: EventType = raw.parse()?;
        filter = filter.event_type(event_type);
    }
    if let Some(actor) = actor {
        filter = filter.actor(actor);
    }
    Ok(filter)
}
