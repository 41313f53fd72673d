//! Ledger error types.

use thiserror::Error;

/// Errors raised by the audit ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A stored entry does not match its recomputed hash or its predecessor.
    #[error("ledger tamper detected at index {at_index}: expected {expected}, found {actual}")]
    TamperDetected {
        /// Zero-based index of the first bad entry.
        at_index: usize,
        /// What verification expected at that position.
        expected: String,
        /// What was actually stored.
        actual: String,
    },

    /// The durable sink could not be read or written.
    #[error("ledger storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The event payload could not be canonicalized (e.g., contains floats).
    #[error("ledger canonicalization error: {0}")]
    Canonicalization(#[from] mesc_core::CanonicalizationError),

    /// A persisted line could not be parsed as an entry.
    #[error("malformed ledger line {line}: {reason}")]
    Malformed {
        /// One-based line number in the JSONL file.
        line: usize,
        /// Parser message.
        reason: String,
    },
}

impl LedgerError {
    /// True when the error indicates a broken chain rather than an I/O problem.
    pub fn is_tamper(&self) -> bool {
        matches!(self, Self::TamperDetected { .. })
    }
}
