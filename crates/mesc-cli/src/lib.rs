//! # mesc-cli: Operator CLI for Milestone Escrow
//!
//! Provides the `mesc` command-line interface for work that does not need a
//! running API server.
//!
//! ## Subcommands
//!
//! - `mesc ledger`: verify or inspect a JSON-lines audit ledger export.
//! - `mesc template`: list the seeded catalog and preview allocations.
//! - `mesc terms`: compute the agreement hash of escrow terms.
//!
//! ```bash
//! mesc ledger verify /var/lib/mesc/ledger.jsonl
//! mesc ledger show ledger.jsonl --event-type PAYMENT_SETTLED
//! mesc template preview "Residential Remodel – Standard" --total 5000000
//! mesc terms hash terms.yaml
//! ```
//!
//! Every handler returns `anyhow::Result<u8>`: `Ok(code)` is the process exit
//! code for a check that ran to completion, `Err` is an operational failure
//! (unreadable file, malformed input) and exits with 1.

pub mod ledger;
pub mod template;
pub mod terms;

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Output encoding for structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    /// Render `value` in this format.
    pub fn render<T: serde::Serialize>(&self, value: &T) -> Result<String> {
        Ok(match self {
            Self::Json => serde_json::to_string_pretty(value)?,
            Self::Yaml => serde_yaml::to_string(value)?,
        })
    }
}

/// Load a YAML or JSON document. `.json` files are parsed strictly as JSON;
/// anything else goes through the YAML parser, which also accepts JSON.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read file: {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON: {}", path.display()))
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML: {}", path.display()))
    }
}
