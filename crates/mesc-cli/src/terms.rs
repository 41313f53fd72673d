//! # Terms Subcommand
//!
//! Computes the agreement hash an escrow created from the given terms would
//! carry. Counterparties can hash their copy of the terms offline and compare
//! it with the `agreement_hash` returned by the API.
//!
//! Terms files are YAML or JSON:
//!
//! ```yaml
//! buyer_id: buyer-7
//! provider_id: contractor-pat
//! total_amount: 5000000
//! milestones:
//!   - name: Foundation
//!     amount: 1000000
//!     required_evidence_types: [PHOTO, INSPECTION]
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mesc_core::PartyId;
use mesc_escrow::AgreementTerms;

/// Arguments for the `mesc terms` subcommand.
#[derive(Args, Debug)]
pub struct TermsArgs {
    #[command(subcommand)]
    pub command: TermsCommand,
}

/// Terms subcommands.
#[derive(Subcommand, Debug)]
pub enum TermsCommand {
    /// Print the agreement hash of a terms file.
    Hash {
        /// Path to a YAML or JSON terms file.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Execute the terms subcommand.
pub fn run_terms(args: &TermsArgs) -> Result<u8> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match &args.command {
        TermsCommand::Hash { file } => cmd_hash(file, &mut out),
    }
}

/// Validate the terms in `file` and print their agreement hash.
pub fn cmd_hash(file: &Path, out: &mut impl Write) -> Result<u8> {
    let terms: AgreementTerms = crate::load_document(file)?;
    // Deserialization does not trim or check party ids.
    PartyId::new("buyer_id", terms.buyer_id.as_str())?;
    PartyId::new("provider_id", terms.provider_id.as_str())?;
    terms
        .validate()
        .with_context(|| format!("invalid terms: {}", file.display()))?;
    let hash = terms.agreement_hash()?;
    tracing::debug!(milestones = terms.milestones.len(), "terms hashed");
    writeln!(out, "{hash}")?;
    Ok(0)
}
