//! # Milestone State Machine
//!
//! ```text
//! CREATED ─unlock()─▶ PENDING ─submit()─▶ EVIDENCE_SUBMITTED ─approve()─▶ APPROVED ─mark_paid()─▶ PAID
//!                        │                       │
//!                        └──── raise_dispute() ──┘
//!                                   │
//!                                   ▼
//!                               DISPUTED ─resolve(RESUME)─▶ remembered status
//!                                   │
//!                                   └──resolve(CANCEL)──▶ CANCELLED
//! ```
//!
//! Guards live on the transition methods; nothing outside this module writes
//! `status`. Every guard failure is an [`EscrowError::InvalidTransition`]
//! naming the status that blocked it.
//!
//! ## Invariant
//!
//! APPROVED and PAID are only reachable through `submit()`, which refuses
//! while any required evidence type lacks a matching [`Evidence`] entry.

use std::collections::BTreeSet;

use mesc_core::{Amount, InstructionId, MilestoneId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::evidence::{Evidence, EvidenceType};
use crate::policy::Action;

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle status of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    /// Defined but not yet covered by funds.
    Created,
    /// Funded; accepting evidence.
    Pending,
    /// Submitted for inspection.
    EvidenceSubmitted,
    /// Approved by an inspector.
    Approved,
    /// Payment instruction issued. Terminal.
    Paid,
    /// Frozen pending dispute resolution.
    Disputed,
    /// Cancelled through dispute resolution. Terminal.
    Cancelled,
}

impl MilestoneStatus {
    /// Wire name, e.g. `EVIDENCE_SUBMITTED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Pending => "PENDING",
            Self::EvidenceSubmitted => "EVIDENCE_SUBMITTED",
            Self::Approved => "APPROVED",
            Self::Paid => "PAID",
            Self::Disputed => "DISPUTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transitions exist.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }

    /// Whether the milestone holds funds against the escrow. Every unlocked
    /// status does, CANCELLED included: cancelled funds are never reused.
    pub fn commits_funds(&self) -> bool {
        !matches!(self, Self::Created)
    }

    /// Target states reachable from this state.
    pub fn valid_transitions(&self) -> &'static [MilestoneStatus] {
        match self {
            Self::Created => &[Self::Pending],
            Self::Pending => &[Self::EvidenceSubmitted, Self::Disputed],
            Self::EvidenceSubmitted => &[Self::Approved, Self::Disputed],
            Self::Approved => &[Self::Paid],
            Self::Disputed => &[Self::Pending, Self::EvidenceSubmitted, Self::Cancelled],
            Self::Paid | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome chosen when resolving a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    /// Return to the status held when the dispute was raised.
    Resume,
    /// Cancel the milestone.
    Cancel,
}

/// An inspector's sign-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Approver identity as attested on the signature.
    pub approver_id: String,
    /// Opaque signature over the approval.
    pub signature: String,
    /// When the approval was recorded.
    pub approved_at: Timestamp,
}

// ── Milestone ────────────────────────────────────────────────────────

/// A single deliverable with its own release amount and evidence rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Identifier.
    pub id: MilestoneId,
    /// Display name.
    pub name: String,
    /// Release amount in minor units (always > 0).
    pub amount: Amount,
    /// Evidence categories that must each be covered before submission.
    pub required_evidence_types: BTreeSet<EvidenceType>,
    /// Current status.
    pub status: MilestoneStatus,
    /// Attached evidence in attachment order.
    pub evidence: Vec<Evidence>,
    /// Status to return to when a dispute is resumed. Present only while
    /// DISPUTED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_status: Option<MilestoneStatus>,
    /// Reason given when the current dispute was raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_reason: Option<String>,
    /// Inspector approval, once APPROVED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    /// Instruction issued on payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_instruction_id: Option<InstructionId>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last transition time.
    pub updated_at: Timestamp,
}

impl Milestone {
    pub(crate) fn new(
        name: String,
        amount: Amount,
        required_evidence_types: BTreeSet<EvidenceType>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: MilestoneId::new(),
            name,
            amount,
            required_evidence_types,
            status: MilestoneStatus::Created,
            evidence: Vec::new(),
            resume_status: None,
            dispute_reason: None,
            approval: None,
            payment_instruction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Required evidence types that have no matching evidence yet.
    pub fn missing_evidence_types(&self) -> Vec<&EvidenceType> {
        self.required_evidence_types
            .iter()
            .filter(|t| !self.evidence.iter().any(|e| &e.evidence_type == *t))
            .collect()
    }

    fn move_to(&mut self, status: MilestoneStatus, now: Timestamp) {
        self.status = status;
        self.updated_at = now;
    }

    /// CREATED → PENDING, once funds cover the milestone.
    pub(crate) fn unlock(&mut self, now: Timestamp) {
        if self.status == MilestoneStatus::Created {
            self.move_to(MilestoneStatus::Pending, now);
        }
    }

    /// Attach evidence. Never changes status.
    pub(crate) fn attach(&mut self, evidence: Evidence, action: Action) -> Result<(), EscrowError> {
        if !matches!(
            self.status,
            MilestoneStatus::Pending | MilestoneStatus::EvidenceSubmitted
        ) {
            return Err(EscrowError::transition(
                self.status,
                self.status,
                action,
                "evidence is accepted only while PENDING or EVIDENCE_SUBMITTED",
            ));
        }
        self.evidence.push(evidence);
        Ok(())
    }

    /// PENDING → EVIDENCE_SUBMITTED.
    pub(crate) fn submit(&mut self, now: Timestamp) -> Result<(), EscrowError> {
        let to = MilestoneStatus::EvidenceSubmitted;
        if self.status != MilestoneStatus::Pending {
            return Err(EscrowError::transition(
                self.status,
                to,
                Action::SubmitMilestone,
                "milestone must be PENDING to submit",
            ));
        }
        let missing = self.missing_evidence_types();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|t| t.as_str()).collect();
            return Err(EscrowError::transition(
                self.status,
                to,
                Action::SubmitMilestone,
                format!("missing required evidence: {}", names.join(", ")),
            ));
        }
        self.move_to(to, now);
        Ok(())
    }

    /// EVIDENCE_SUBMITTED → APPROVED.
    pub(crate) fn approve(&mut self, approval: Approval) -> Result<(), EscrowError> {
        if self.status != MilestoneStatus::EvidenceSubmitted {
            return Err(EscrowError::transition(
                self.status,
                MilestoneStatus::Approved,
                Action::ApproveMilestone,
                "milestone must be EVIDENCE_SUBMITTED to approve",
            ));
        }
        let now = approval.approved_at;
        self.approval = Some(approval);
        self.move_to(MilestoneStatus::Approved, now);
        Ok(())
    }

    /// APPROVED → PAID.
    pub(crate) fn mark_paid(
        &mut self,
        instruction_id: InstructionId,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if self.status != MilestoneStatus::Approved {
            return Err(EscrowError::transition(
                self.status,
                MilestoneStatus::Paid,
                Action::GenerateInstruction,
                "milestone must be APPROVED to generate a payment instruction",
            ));
        }
        self.payment_instruction_id = Some(instruction_id);
        self.move_to(MilestoneStatus::Paid, now);
        Ok(())
    }

    /// PENDING | EVIDENCE_SUBMITTED → DISPUTED, remembering the prior status.
    pub(crate) fn raise_dispute(
        &mut self,
        reason: Option<String>,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if !matches!(
            self.status,
            MilestoneStatus::Pending | MilestoneStatus::EvidenceSubmitted
        ) {
            return Err(EscrowError::transition(
                self.status,
                MilestoneStatus::Disputed,
                Action::RaiseDispute,
                "only PENDING or EVIDENCE_SUBMITTED milestones can be disputed",
            ));
        }
        self.resume_status = Some(self.status);
        self.dispute_reason = reason;
        self.move_to(MilestoneStatus::Disputed, now);
        Ok(())
    }

    /// DISPUTED → remembered status (RESUME) or CANCELLED (CANCEL).
    pub(crate) fn resolve_dispute(
        &mut self,
        resolution: DisputeResolution,
        now: Timestamp,
    ) -> Result<MilestoneStatus, EscrowError> {
        let target = match resolution {
            DisputeResolution::Resume => self.resume_status.unwrap_or(MilestoneStatus::Pending),
            DisputeResolution::Cancel => MilestoneStatus::Cancelled,
        };
        if self.status != MilestoneStatus::Disputed {
            return Err(EscrowError::transition(
                self.status,
                target,
                Action::ResolveDispute,
                "milestone is not DISPUTED",
            ));
        }
        self.resume_status = None;
        self.move_to(target, now);
        Ok(target)
    }
}
