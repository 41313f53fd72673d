//! # Durable Ledger Sinks
//!
//! A [`LedgerSink`] receives each sealed batch before it becomes visible in
//! the in-memory chain. [`JsonlFileSink`] stores one entry per line.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::entry::AuditLogEntry;
use crate::error::LedgerError;

/// Durable storage for sealed ledger entries.
pub trait LedgerSink: Send + 'static {
    /// Persist a batch of freshly sealed entries.
    ///
    /// Must be all-or-nothing: on error, none of `entries` may remain in
    /// durable storage.
    fn persist(&mut self, entries: &[AuditLogEntry]) -> Result<(), LedgerError>;
}

/// JSON-lines file sink.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    file: File,
}

impl JsonlFileSink {
    /// Open `path` for appending, creating it if missing, and return the
    /// entries already stored there.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StorageUnavailable`] on I/O failure and
    /// [`LedgerError::Malformed`] if an existing line does not parse.
    pub fn open(path: &Path) -> Result<(Self, Vec<AuditLogEntry>), LedgerError> {
        let existing = if path.exists() {
            read_jsonl(path)?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| storage(path, e))?;
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            existing,
        ))
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerSink for JsonlFileSink {
    fn persist(&mut self, entries: &[AuditLogEntry]) -> Result<(), LedgerError> {
        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| LedgerError::StorageUnavailable(e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let original_len = self
            .file
            .metadata()
            .map_err(|e| storage(&self.path, e))?
            .len();
        let written = self
            .file
            .write_all(buf.as_bytes())
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            // Drop whatever part of the batch reached the file.
            if let Err(trunc) = self.file.set_len(original_len) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %trunc,
                    "failed to roll back partial ledger write"
                );
            }
            return Err(storage(&self.path, e));
        }
        Ok(())
    }
}

/// Read every entry from a JSON-lines ledger file. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`LedgerError::StorageUnavailable`] if the file cannot be read and
/// [`LedgerError::Malformed`] (with a one-based line number) if a line does
/// not parse.
pub fn read_jsonl(path: &Path) -> Result<Vec<AuditLogEntry>, LedgerError> {
    let raw = std::fs::read_to_string(path).map_err(|e| storage(path, e))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| LedgerError::Malformed {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn storage(path: &Path, e: std::io::Error) -> LedgerError {
    LedgerError::StorageUnavailable(format!("{}: {e}", path.display()))
}
