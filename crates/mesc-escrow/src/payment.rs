//! # Payment Instructions
//!
//! The artifact handed to the custodian's payment rail once a milestone is
//! approved. The core never moves money; it only records that an
//! instruction was issued and, later, the custodian's reports that it was
//! sent and settled.
//!
//! ```text
//! INSTRUCTED ─mark_sent()─▶ SENT ─mark_settled()─▶ SETTLED
//! ```

use mesc_core::{Amount, EscrowId, InstructionId, MilestoneId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::escrow::Escrow;
use crate::milestone::{Approval, Milestone};
use crate::policy::{Action, Role};

/// Settlement status reported by the custodian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Issued, not yet sent to the rail.
    Instructed,
    /// Sent to the rail.
    Sent,
    /// Confirmed settled. Terminal.
    Settled,
}

impl PaymentStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instructed => "INSTRUCTED",
            Self::Sent => "SENT",
            Self::Settled => "SETTLED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Domestic or international wire.
    Wire,
}

/// An irrevocable instruction to pay one milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstruction {
    /// Identifier.
    pub id: InstructionId,
    /// Owning escrow.
    pub escrow_id: EscrowId,
    /// Milestone being paid.
    pub milestone_id: MilestoneId,
    /// Agreement hash the payment is made under.
    pub agreement_hash: String,
    /// `v{escrow.version}` at generation time.
    pub agreement_version: String,
    /// Payee (the escrow's provider).
    pub payee: PartyId,
    /// Role of the payee.
    pub payee_role: Role,
    /// Amount in minor units.
    pub amount: Amount,
    /// ISO-4217 currency.
    pub currency: String,
    /// Payment rail.
    pub method: PaymentMethod,
    /// Remittance memo.
    pub memo: String,
    /// Approvals backing the payment.
    pub approvals: Vec<Approval>,
    /// Statement that the agreement's conditions are met.
    pub attestation: String,
    /// Settlement status.
    pub status: PaymentStatus,
    /// Actor who generated the instruction.
    pub created_by: String,
    /// Generation time.
    pub created_at: Timestamp,
    /// When the custodian marked it sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<Timestamp>,
    /// When the custodian marked it settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<Timestamp>,
}

impl PaymentInstruction {
    /// Build the instruction for `milestone` of `escrow`. The escrow version
    /// recorded is the one the instruction is issued against.
    pub(crate) fn issue(escrow: &Escrow, milestone: &Milestone, created_by: &str, now: Timestamp) -> Self {
        let short_id: String = escrow.id.as_uuid().simple().to_string().chars().take(8).collect();
        Self {
            id: InstructionId::new(),
            escrow_id: escrow.id,
            milestone_id: milestone.id,
            agreement_hash: escrow.agreement_hash.clone(),
            agreement_version: format!("v{}", escrow.version),
            payee: escrow.provider_id.clone(),
            payee_role: Role::Contractor,
            amount: milestone.amount,
            currency: escrow.currency.clone(),
            method: PaymentMethod::Wire,
            memo: format!("Escrow #{short_id} - Milestone {}", milestone.name),
            approvals: milestone.approval.iter().cloned().collect(),
            attestation: format!(
                "All conditions defined in Agreement v{} have been satisfied.",
                escrow.version
            ),
            status: PaymentStatus::Instructed,
            created_by: created_by.to_string(),
            created_at: now,
            sent_at: None,
            settled_at: None,
        }
    }

    /// INSTRUCTED → SENT.
    pub(crate) fn mark_sent(&mut self, now: Timestamp) -> Result<(), EscrowError> {
        if self.status != PaymentStatus::Instructed {
            return Err(EscrowError::transition(
                self.status,
                PaymentStatus::Sent,
                Action::UpdatePaymentStatus,
                "only INSTRUCTED payments can be marked sent",
            ));
        }
        self.status = PaymentStatus::Sent;
        self.sent_at = Some(now);
        Ok(())
    }

    /// SENT → SETTLED.
    pub(crate) fn mark_settled(&mut self, now: Timestamp) -> Result<(), EscrowError> {
        if self.status != PaymentStatus::Sent {
            return Err(EscrowError::transition(
                self.status,
                PaymentStatus::Settled,
                Action::UpdatePaymentStatus,
                "only SENT payments can be marked settled",
            ));
        }
        self.status = PaymentStatus::Settled;
        self.settled_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::{AgreementTerms, MilestoneSpec};

    fn instruction() -> PaymentInstruction {
        let terms = AgreementTerms {
            buyer_id: PartyId::new("buyer_id", "bob").unwrap(),
            provider_id: PartyId::new("provider_id", "pat").unwrap(),
            total_amount: Amount::new("t", 5_000).unwrap(),
            milestones: vec![MilestoneSpec::new("Framing", Amount::new("a", 5_000).unwrap(), ["PHOTO"]).unwrap()],
        };
        let mut escrow = Escrow::create(terms, None).unwrap();
        escrow.version = 7;
        let milestone = escrow.milestones[0].clone();
        PaymentInstruction::issue(&escrow, &milestone, "carol", Timestamp::now())
    }

    #[test]
    fn issue_fills_agreement_fields() {
        let pi = instruction();
        assert_eq!(pi.agreement_version, "v7");
        assert_eq!(pi.payee.as_str(), "pat");
        assert_eq!(pi.payee_role, Role::Contractor);
        assert_eq!(pi.currency, "USD");
        assert_eq!(pi.method, PaymentMethod::Wire);
        assert_eq!(
            pi.attestation,
            "All conditions defined in Agreement v7 have been satisfied."
        );
        assert!(pi.memo.ends_with("Milestone Framing"));
        assert_eq!(pi.status, PaymentStatus::Instructed);
    }

    #[test]
    fn status_moves_forward_only() {
        let mut pi = instruction();
        assert!(pi.mark_settled(Timestamp::now()).is_err());
        pi.mark_sent(Timestamp::now()).unwrap();
        assert!(pi.mark_sent(Timestamp::now()).is_err());
        pi.mark_settled(Timestamp::now()).unwrap();
        assert_eq!(pi.status, PaymentStatus::Settled);
        assert!(pi.sent_at.is_some() && pi.settled_at.is_some());
        assert!(pi.mark_settled(Timestamp::now()).is_err());
    }
}
