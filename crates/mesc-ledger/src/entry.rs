//! # Audit Log Entries
//!
//! The entry record and the hash that links it into the chain.
//!
//! ## Security Invariant
//!
//! The hash input is a fixed seven-field object canonicalized with JCS, so
//! field order in `event_data` and in the Rust struct cannot change the hash.
//! `sequence` and `current_hash` are deliberately outside the input: the
//! sequence is checked positionally and the hash cannot cover itself.

use mesc_core::{sha256_hex, CanonicalBytes, CanonicalizationError, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `previous_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// The kind of state transition an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// An escrow agreement was created.
    EscrowCreated,
    /// The custodian confirmed (full or partial) funding.
    FundsConfirmed,
    /// The total was increased and a milestone added for the delta.
    BudgetChanged,
    /// A milestone template was expanded into an escrow.
    TemplateApplied,
    /// One milestone generated by a template.
    MilestoneCreated,
    /// Evidence was attached to a milestone.
    EvidenceAttached,
    /// The contractor submitted a milestone for review.
    MilestoneSubmitted,
    /// An inspector approved a milestone.
    MilestoneApproved,
    /// A payment instruction was generated for an approved milestone.
    PaymentInstructed,
    /// The custodian marked an instruction as sent.
    PaymentSent,
    /// The custodian marked an instruction as settled.
    PaymentSettled,
    /// A dispute was raised on a milestone.
    DisputeRaised,
    /// A dispute was resolved (resumed or cancelled).
    DisputeResolved,
}

impl EventType {
    /// Every event type, in lifecycle order.
    pub const ALL: [EventType; 13] = [
        Self::EscrowCreated,
        Self::FundsConfirmed,
        Self::BudgetChanged,
        Self::TemplateApplied,
        Self::MilestoneCreated,
        Self::EvidenceAttached,
        Self::MilestoneSubmitted,
        Self::MilestoneApproved,
        Self::PaymentInstructed,
        Self::PaymentSent,
        Self::PaymentSettled,
        Self::DisputeRaised,
        Self::DisputeResolved,
    ];

    /// Wire name, e.g. `FUNDS_CONFIRMED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EscrowCreated => "ESCROW_CREATED",
            Self::FundsConfirmed => "FUNDS_CONFIRMED",
            Self::BudgetChanged => "BUDGET_CHANGED",
            Self::TemplateApplied => "TEMPLATE_APPLIED",
            Self::MilestoneCreated => "MILESTONE_CREATED",
            Self::EvidenceAttached => "EVIDENCE_ATTACHED",
            Self::MilestoneSubmitted => "MILESTONE_SUBMITTED",
            Self::MilestoneApproved => "MILESTONE_APPROVED",
            Self::PaymentInstructed => "PAYMENT_INSTRUCTED",
            Self::PaymentSent => "PAYMENT_SENT",
            Self::PaymentSettled => "PAYMENT_SETTLED",
            Self::DisputeRaised => "DISPUTE_RAISED",
            Self::DisputeResolved => "DISPUTE_RESOLVED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event type name that is not part of the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl std::str::FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == wanted)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// NewEvent
// ---------------------------------------------------------------------------

/// What a caller supplies to append an entry. The ledger fills in the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// The aggregate the event belongs to (the escrow id for every
    /// protocol event).
    pub entity_id: String,
    /// What happened.
    pub event_type: EventType,
    /// Who did it.
    pub actor_id: String,
    /// In which role.
    pub actor_role: String,
    /// Structured details; must not contain floats.
    pub event_data: Value,
}

impl NewEvent {
    /// Build an event.
    pub fn new(
        entity_id: impl Into<String>,
        event_type: EventType,
        actor_id: impl Into<String>,
        actor_role: impl Into<String>,
        event_data: Value,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            event_type,
            actor_id: actor_id.into(),
            actor_role: actor_role.into(),
            event_data,
        }
    }
}

// ---------------------------------------------------------------------------
// AuditLogEntry
// ---------------------------------------------------------------------------

/// One immutable link in the audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Zero-based position in the chain.
    pub sequence: u64,
    /// The aggregate the event belongs to.
    pub entity_id: String,
    /// What happened.
    pub event_type: EventType,
    /// Who did it.
    pub actor_id: String,
    /// The role the actor acted in.
    pub actor_role: String,
    /// Structured event details.
    pub event_data: Value,
    /// When the ledger accepted the entry.
    pub timestamp: Timestamp,
    /// `current_hash` of the preceding entry, or [`GENESIS_HASH`].
    pub previous_hash: String,
    /// SHA-256 hex of this entry's canonical hash input.
    pub current_hash: String,
}

/// The canonical hash input. Field names are part of the wire contract.
#[derive(Serialize)]
struct HashInput<'a> {
    previous_hash: &'a str,
    entity_id: &'a str,
    event_type: EventType,
    actor_id: &'a str,
    actor_role: &'a str,
    timestamp: &'a Timestamp,
    event_data: &'a Value,
}

impl AuditLogEntry {
    /// Seal an event onto a chain whose tail hash is `previous_hash`.
    pub(crate) fn seal(
        event: NewEvent,
        sequence: u64,
        previous_hash: String,
        timestamp: Timestamp,
    ) -> Result<Self, CanonicalizationError> {
        let mut entry = Self {
            sequence,
            entity_id: event.entity_id,
            event_type: event.event_type,
            actor_id: event.actor_id,
            actor_role: event.actor_role,
            event_data: event.event_data,
            timestamp,
            previous_hash,
            current_hash: String::new(),
        };
        entry.current_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute the hash from the entry's own fields.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError`] if `event_data` holds a float.
    pub fn compute_hash(&self) -> Result<String, CanonicalizationError> {
        let input = HashInput {
            previous_hash: &self.previous_hash,
            entity_id: &self.entity_id,
            event_type: self.event_type,
            actor_id: &self.actor_id,
            actor_role: &self.actor_role,
            timestamp: &self.timestamp,
            event_data: &self.event_data,
        };
        Ok(sha256_hex(&CanonicalBytes::new(&input)?))
    }
}
