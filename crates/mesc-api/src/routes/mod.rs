//! # API Route Modules
//!
//! - `escrows`: creation, funding, budget changes, template application,
//!   and escrow-scoped reads.
//! - `milestones`: evidence, submission, approval, payment instruction,
//!   and disputes.
//! - `payments`: custodian-driven payment instruction status.
//! - `templates`: the milestone template catalog.
//! - `audit_log`: ledger queries and chain verification.

pub mod audit_log;
pub mod escrows;
pub mod milestones;
pub mod payments;
pub mod templates;
