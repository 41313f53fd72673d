//! # mesc-core: Foundational Types for the Milestone Escrow Stack
//!
//! Every other crate in the workspace depends on `mesc-core`; it depends on
//! nothing internal. It owns the primitives that make escrow state and the
//! audit ledger reproducible byte-for-byte.
//!
//! ## Key Design Principles
//!
//! 1. **`CanonicalBytes` newtype.** Every digest (agreement hashes, ledger
//!    entry hashes) flows through `CanonicalBytes::new()`. No raw
//!    `serde_json::to_vec()` for digests.
//!
//! 2. **`sha256_digest()` accepts only `&CanonicalBytes`.** Compile-time
//!    enforcement that every digest path goes through canonicalization.
//!
//! 3. **Integer money.** [`Amount`] holds minor currency units as `i64`.
//!    Floats are rejected by canonicalization, so they cannot leak into a hash.
//!
//! 4. **UTC-only timestamps.** [`Timestamp`] is UTC with a `Z` suffix and
//!    seconds precision, so its canonical string never varies.
//!
//! 5. **Newtype identifiers.** `EscrowId`, `MilestoneId`, `EvidenceId`,
//!    `InstructionId`, `TemplateId`, and `PartyId` cannot be swapped for one
//!    another.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `mesc-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

#![deny(missing_docs)]

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use canonical::CanonicalBytes;
pub use digest::{sha256_digest, sha256_hex, ContentDigest, DigestAlgorithm};
pub use error::{CanonicalizationError, MescError, ValidationError};
pub use identity::{EscrowId, EvidenceId, InstructionId, MilestoneId, PartyId, TemplateId};
pub use money::Amount;
pub use temporal::Timestamp;
