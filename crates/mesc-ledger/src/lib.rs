//! # mesc-ledger: Tamper-Evident Audit Ledger
//!
//! Every accepted state transition in the escrow protocol is recorded here as
//! an [`AuditLogEntry`]. Entries form a single SHA-256 hash chain:
//!
//! ```text
//! current_hash[i] = SHA256(JCS({previous_hash, entity_id, event_type,
//!                              actor_id, actor_role, timestamp, event_data}))
//! previous_hash[i] = current_hash[i-1]   (GENESIS_HASH for i = 0)
//! ```
//!
//! - **Entries** ([`entry`]): the entry record, event types, hash computation.
//! - **Ledger** ([`ledger`]): the shared append-only log, verification, and
//!   filtered read-only views.
//! - **Sinks** ([`sink`]): durable persistence. [`JsonlFileSink`] writes one
//!   JSON object per line and is reloaded (and verified) on startup.
//!
//! ## Security Invariant
//!
//! Nothing outside this crate can mutate a stored entry. The only write path
//! is [`AuditLedger::append_batch`], which computes hashes itself from the
//! current tail; callers never supply `previous_hash`, `current_hash`,
//! `sequence`, or `timestamp`.

pub mod entry;
pub mod error;
pub mod ledger;
pub mod sink;

pub use entry::{AuditLogEntry, EventType, NewEvent, UnknownEventType, GENESIS_HASH};
pub use error::LedgerError;
pub use ledger::{verify_chain, AuditLedger, ChainReport, LedgerFilter, LedgerView};
pub use sink::{read_jsonl, JsonlFileSink, LedgerSink};
