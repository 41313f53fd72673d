//! # mesc-escrow: Milestone Escrow Lifecycle
//!
//! The protocol core. Funds held against a scope of work are released
//! milestone by milestone, only after evidence is submitted and approved.
//!
//! - **Policy** ([`policy`]): the static `(role, action)` table.
//! - **Milestones** ([`milestone`]): the per-milestone state machine.
//! - **Escrows** ([`escrow`]): funding, budget changes, FIFO unlocking,
//!   and escrow state.
//! - **Evidence** ([`evidence`]): link and upload evidence records.
//! - **Templates** ([`template`]): percentage-based milestone schedules.
//! - **Payments** ([`payment`]): payment instructions and their
//!   custodian-driven status.
//! - **Service** ([`service`]): the only mutation entry point. Authorizes,
//!   checks the version token, applies the transition to a working copy, and
//!   commits it only after the audit ledger has accepted the entries.
//!
//! ## Security Invariant
//!
//! Status fields are written only by the transition methods in
//! [`milestone`], [`escrow`], and [`payment`], and those are `pub(crate)`:
//! outside this crate the only way to change an escrow is through
//! [`EscrowService`], which records every accepted change on the ledger.

pub mod error;
pub mod escrow;
pub mod evidence;
pub mod milestone;
pub mod payment;
pub mod policy;
pub mod service;
pub mod store;
pub mod template;

pub use error::{ErrorKind, EscrowError};
pub use escrow::{AgreementTerms, Escrow, EscrowState, MilestoneSpec, DEFAULT_CURRENCY};
pub use evidence::{Evidence, EvidenceOrigin, EvidenceSource, EvidenceType, UploadSourceType};
pub use milestone::{Approval, DisputeResolution, Milestone, MilestoneStatus};
pub use payment::{PaymentInstruction, PaymentMethod, PaymentStatus};
pub use policy::{authorize, Action, Actor, Role, UnknownRole};
pub use service::{entity_id, BudgetChange, EscrowService, FundingConfirmation, MilestoneUpdate};
pub use store::EscrowStore;
pub use template::{
    residential_remodel_standard, MilestoneTemplate, TemplateCatalog, TemplateMilestone,
    RESIDENTIAL_REMODEL_STANDARD,
};
