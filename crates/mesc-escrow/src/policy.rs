//! # Authorization Policy
//!
//! A static table from [`Action`] to the [`Role`]s allowed to perform it.
//! The service consults it before reading any state, so a forbidden caller
//! learns nothing about the target entity's status.
//!
//! ```text
//! CREATE_ESCROW                 Agent
//! CONFIRM_FUNDS                 Custodian
//! CHANGE_BUDGET                 Agent
//! APPLY_TEMPLATE                Agent
//! ATTACH_EVIDENCE               Contractor, Inspector, Agent
//! ATTACH_THIRD_PARTY_EVIDENCE   Inspector, Agent, Custodian
//! SUBMIT_MILESTONE              Contractor
//! APPROVE_MILESTONE             Inspector
//! GENERATE_INSTRUCTION          Agent, Custodian
//! RAISE_DISPUTE                 Agent, Inspector, Custodian
//! RESOLVE_DISPUTE               Agent, Inspector, Custodian
//! UPDATE_PAYMENT_STATUS         Custodian
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EscrowError;

// ── Roles ────────────────────────────────────────────────────────────

/// A party's role in the escrow protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Originates funds and manages the agreement.
    Agent,
    /// Performs the work and attests to it.
    Contractor,
    /// Verifies completed work.
    Inspector,
    /// Holds the funds and executes payments.
    Custodian,
}

impl Role {
    /// All roles.
    pub const ALL: [Role; 4] = [Self::Agent, Self::Contractor, Self::Inspector, Self::Custodian];

    /// Wire name, e.g. `INSPECTOR`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::Contractor => "CONTRACTOR",
            Self::Inspector => "INSPECTOR",
            Self::Custodian => "CUSTODIAN",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name outside the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0} (expected agent, contractor, inspector, or custodian)")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "contractor" => Ok(Self::Contractor),
            "inspector" => Ok(Self::Inspector),
            "custodian" => Ok(Self::Custodian),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// The verified identity making a call. Supplied per request; the core never
/// looks identity up on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Opaque actor identifier.
    pub id: String,
    /// The role the actor holds.
    pub role: Role,
}

impl Actor {
    /// Build an actor.
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

// ── Actions ──────────────────────────────────────────────────────────

/// Every operation gated by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Create an escrow agreement.
    CreateEscrow,
    /// Confirm full or partial funding.
    ConfirmFunds,
    /// Increase the budget with a new milestone.
    ChangeBudget,
    /// Expand a milestone template into an escrow.
    ApplyTemplate,
    /// Attach evidence to a milestone.
    AttachEvidence,
    /// Attach evidence attested by someone other than the contractor.
    AttachThirdPartyEvidence,
    /// Submit a milestone for review.
    SubmitMilestone,
    /// Approve a submitted milestone.
    ApproveMilestone,
    /// Generate the payment instruction for an approved milestone.
    GenerateInstruction,
    /// Raise a dispute on a milestone.
    RaiseDispute,
    /// Resolve a milestone dispute.
    ResolveDispute,
    /// Mark a payment instruction sent or settled.
    UpdatePaymentStatus,
}

impl Action {
    /// Wire name, e.g. `APPROVE_MILESTONE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateEscrow => "CREATE_ESCROW",
            Self::ConfirmFunds => "CONFIRM_FUNDS",
            Self::ChangeBudget => "CHANGE_BUDGET",
            Self::ApplyTemplate => "APPLY_TEMPLATE",
            Self::AttachEvidence => "ATTACH_EVIDENCE",
            Self::AttachThirdPartyEvidence => "ATTACH_THIRD_PARTY_EVIDENCE",
            Self::SubmitMilestone => "SUBMIT_MILESTONE",
            Self::ApproveMilestone => "APPROVE_MILESTONE",
            Self::GenerateInstruction => "GENERATE_INSTRUCTION",
            Self::RaiseDispute => "RAISE_DISPUTE",
            Self::ResolveDispute => "RESOLVE_DISPUTE",
            Self::UpdatePaymentStatus => "UPDATE_PAYMENT_STATUS",
        }
    }

    /// Roles permitted to perform this action.
    pub fn allowed_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            Self::CreateEscrow | Self::ChangeBudget | Self::ApplyTemplate => &[Agent],
            Self::ConfirmFunds | Self::UpdatePaymentStatus => &[Custodian],
            Self::AttachEvidence => &[Contractor, Inspector, Agent],
            Self::AttachThirdPartyEvidence => &[Inspector, Agent, Custodian],
            Self::SubmitMilestone => &[Contractor],
            Self::ApproveMilestone => &[Inspector],
            Self::GenerateInstruction => &[Agent, Custodian],
            Self::RaiseDispute | Self::ResolveDispute => &[Agent, Inspector, Custodian],
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check `actor` against the table.
///
/// # Errors
///
/// Returns [`EscrowError::Forbidden`] if the actor's role is not listed for
/// `action`.
pub fn authorize(actor: &Actor, action: Action) -> Result<(), EscrowError> {
    if action.allowed_roles().contains(&actor.role) {
        Ok(())
    } else {
        tracing::debug!(actor = %actor.id, role = %actor.role, %action, "action forbidden for role");
        Err(EscrowError::Forbidden {
            role: actor.role,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [Action; 12] = [
        Action::CreateEscrow,
        Action::ConfirmFunds,
        Action::ChangeBudget,
        Action::ApplyTemplate,
        Action::AttachEvidence,
        Action::AttachThirdPartyEvidence,
        Action::SubmitMilestone,
        Action::ApproveMilestone,
        Action::GenerateInstruction,
        Action::RaiseDispute,
        Action::ResolveDispute,
        Action::UpdatePaymentStatus,
    ];

    #[test]
    fn every_action_has_at_least_one_role() {
        for action in ACTIONS {
            assert!(!action.allowed_roles().is_empty(), "{action} has no roles");
        }
    }

    #[test]
    fn contractor_cannot_attest_for_third_parties() {
        let pat = Actor::new("pat", Role::Contractor);
        assert!(authorize(&pat, Action::AttachEvidence).is_ok());
        assert!(matches!(
            authorize(&pat, Action::AttachThirdPartyEvidence),
            Err(EscrowError::Forbidden { role: Role::Contractor, .. })
        ));
    }

    #[test]
    fn only_inspector_approves_and_only_contractor_submits() {
        for role in Role::ALL {
            let actor = Actor::new("x", role);
            assert_eq!(
                authorize(&actor, Action::ApproveMilestone).is_ok(),
                role == Role::Inspector
            );
            assert_eq!(
                authorize(&actor, Action::SubmitMilestone).is_ok(),
                role == Role::Contractor
            );
        }
    }

    #[test]
    fn custodian_only_money_movements() {
        for role in Role::ALL {
            let actor = Actor::new("x", role);
            assert_eq!(
                authorize(&actor, Action::ConfirmFunds).is_ok(),
                role == Role::Custodian
            );
            assert_eq!(
                authorize(&actor, Action::UpdatePaymentStatus).is_ok(),
                role == Role::Custodian
            );
        }
    }

    #[test]
    fn contractor_cannot_dispute() {
        let pat = Actor::new("pat", Role::Contractor);
        assert!(authorize(&pat, Action::RaiseDispute).is_err());
        assert!(authorize(&pat, Action::ResolveDispute).is_err());
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Inspector".parse::<Role>().unwrap(), Role::Inspector);
        assert_eq!("CUSTODIAN".parse::<Role>().unwrap(), Role::Custodian);
        assert!("auditor".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Agent).unwrap(), "\"AGENT\"");
    }
}
