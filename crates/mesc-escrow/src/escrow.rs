//! # Escrow Aggregate
//!
//! Funding, budget, and milestone bookkeeping for one agreement. Methods here
//! mutate a working copy; the service decides whether to commit it (after
//! the version check and the ledger append succeed).
//!
//! ## Funding and Unlocking
//!
//! `committed` is the sum of amounts of milestones that hold funds: every
//! status except CREATED. A CANCELLED milestone keeps its funds committed;
//! they stay in `funded_amount` but are never paid out or reallocated.
//!
//! Unlocking happens only when funds are confirmed. CREATED milestones move
//! to PENDING in creation order while `committed + amount ≤ funded_amount`;
//! the first milestone that does not fit stops the scan, so later (smaller)
//! milestones never jump the queue. Milestones added by a budget change or a
//! template stay CREATED until the next confirmation.
//!
//! ## Escrow State
//!
//! ```text
//! CREATED ──funded > 0──▶ FUNDED ──funded == total ∧ a milestone unlocked──▶ ACTIVE
//!    every milestone PAID/CANCELLED, ≥ 1 PAID ──▶ COMPLETED
//!    every milestone CANCELLED ──▶ CANCELLED
//! ```
//!
//! States never move backwards: a budget increase on an ACTIVE escrow leaves
//! it ACTIVE while it waits for the additional funds.

use std::collections::BTreeSet;

use mesc_core::{sha256_hex, Amount, CanonicalBytes, EscrowId, MilestoneId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::EscrowError;
use crate::evidence::EvidenceType;
use crate::milestone::{Milestone, MilestoneStatus};
use crate::policy::Action;

/// Default settlement currency.
pub const DEFAULT_CURRENCY: &str = "USD";

// ── State ────────────────────────────────────────────────────────────

/// Lifecycle state of an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    /// Agreement recorded, no funds yet.
    Created,
    /// Some funds confirmed.
    Funded,
    /// Fully funded with work under way.
    Active,
    /// Every milestone settled with at least one paid. Terminal.
    Completed,
    /// Every milestone cancelled. Terminal.
    Cancelled,
}

impl EscrowState {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Funded => "FUNDED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further mutation is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for EscrowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Terms ────────────────────────────────────────────────────────────

/// Terms of one milestone as agreed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    /// Display name.
    pub name: String,
    /// Release amount in minor units.
    pub amount: Amount,
    /// Evidence categories required before submission.
    pub required_evidence_types: BTreeSet<EvidenceType>,
}

impl MilestoneSpec {
    /// Build a spec from raw evidence type names.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Validation`] for a blank type name.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        amount: Amount,
        evidence_types: impl IntoIterator<Item = S>,
    ) -> Result<Self, EscrowError> {
        let required_evidence_types = evidence_types
            .into_iter()
            .map(EvidenceType::new)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            amount,
            required_evidence_types,
        })
    }

    fn validate(&self, index: usize) -> Result<(), EscrowError> {
        if self.name.trim().is_empty() {
            return Err(EscrowError::Validation(format!(
                "milestone {index}: name must be non-empty"
            )));
        }
        if self.amount.is_zero() {
            return Err(EscrowError::Validation(format!(
                "milestone {index} ({}): amount must be greater than zero",
                self.name
            )));
        }
        if self.required_evidence_types.is_empty() {
            return Err(EscrowError::Validation(format!(
                "milestone {index} ({}): at least one required evidence type",
                self.name
            )));
        }
        Ok(())
    }
}

/// The immutable terms an escrow's `agreement_hash` commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementTerms {
    /// Buyer party.
    pub buyer_id: PartyId,
    /// Provider (contractor) party.
    pub provider_id: PartyId,
    /// Contract total in minor units.
    pub total_amount: Amount,
    /// Initial milestone terms in order.
    pub milestones: Vec<MilestoneSpec>,
}

impl AgreementTerms {
    /// Check amounts and milestone terms.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Validation`] when the total is zero, a milestone
    /// is malformed, or milestone amounts exceed the total.
    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.total_amount.is_zero() {
            return Err(EscrowError::Validation(
                "total_amount must be greater than zero".into(),
            ));
        }
        for (i, spec) in self.milestones.iter().enumerate() {
            spec.validate(i)?;
        }
        let sum = Amount::checked_sum(self.milestones.iter().map(|m| m.amount))?;
        if sum > self.total_amount {
            return Err(EscrowError::Validation(format!(
                "milestone amounts ({sum}) exceed total_amount ({})",
                self.total_amount
            )));
        }
        Ok(())
    }

    /// SHA-256 hex over the JCS encoding of the terms.
    ///
    /// # Errors
    ///
    /// Propagates canonicalization failure (cannot occur for these types).
    pub fn agreement_hash(&self) -> Result<String, EscrowError> {
        let canonical = CanonicalBytes::new(self)
            .map_err(|e| EscrowError::Validation(format!("terms not canonicalizable: {e}")))?;
        Ok(sha256_hex(&canonical))
    }
}

// ── Escrow ───────────────────────────────────────────────────────────

/// An escrow agreement instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    /// Identifier.
    pub id: EscrowId,
    /// Buyer party.
    pub buyer_id: PartyId,
    /// Provider (contractor) party.
    pub provider_id: PartyId,
    /// Lifecycle state.
    pub state: EscrowState,
    /// Optimistic-concurrency token; starts at 0, +1 per accepted mutation.
    pub version: u64,
    /// SHA-256 hex of the canonical creation terms.
    pub agreement_hash: String,
    /// Contract total in minor units.
    pub total_amount: Amount,
    /// Funds confirmed by the custodian so far.
    pub funded_amount: Amount,
    /// ISO-4217 currency code.
    pub currency: String,
    /// Milestones in creation order.
    pub milestones: Vec<Milestone>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl Escrow {
    /// Build a new escrow in CREATED at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Validation`] if the terms are invalid.
    pub fn create(terms: AgreementTerms, currency: Option<String>) -> Result<Self, EscrowError> {
        terms.validate()?;
        let agreement_hash = terms.agreement_hash()?;
        let currency = currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(EscrowError::Validation(format!(
                "currency must be a three-letter ISO-4217 code, got {currency}"
            )));
        }
        let now = Timestamp::now();
        let milestones = terms
            .milestones
            .into_iter()
            .map(|s| Milestone::new(s.name.trim().to_string(), s.amount, s.required_evidence_types, now))
            .collect();
        Ok(Self {
            id: EscrowId::new(),
            buyer_id: terms.buyer_id,
            provider_id: terms.provider_id,
            state: EscrowState::Created,
            version: 0,
            agreement_hash,
            total_amount: terms.total_amount,
            funded_amount: Amount::ZERO,
            currency,
            milestones,
            created_at: now,
            updated_at: now,
        })
    }

    /// Look up a milestone.
    pub fn milestone(&self, id: MilestoneId) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    pub(crate) fn milestone_mut(&mut self, id: MilestoneId) -> Result<&mut Milestone, EscrowError> {
        self.milestones
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| EscrowError::not_found("milestone", id.as_uuid()))
    }

    /// Sum of milestone amounts currently holding funds.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Validation`] if the sum overflows.
    pub fn committed_amount(&self) -> Result<Amount, EscrowError> {
        Ok(Amount::checked_sum(
            self.milestones
                .iter()
                .filter(|m| m.status.commits_funds())
                .map(|m| m.amount),
        )?)
    }

    /// Whether confirmed funds cover the full total.
    pub fn is_fully_funded(&self) -> bool {
        self.funded_amount >= self.total_amount
    }

    pub(crate) fn ensure_open(&self, action: Action) -> Result<(), EscrowError> {
        if self.state.is_terminal() {
            return Err(EscrowError::transition(
                self.state,
                self.state,
                action,
                "escrow is closed",
            ));
        }
        Ok(())
    }

    /// Record custodian funding: `None` funds the remainder in full,
    /// `Some(amount)` adds a partial tranche. Returns the amount added and
    /// the milestones the new funds unlocked.
    pub(crate) fn confirm_funds(
        &mut self,
        amount: Option<Amount>,
        now: Timestamp,
    ) -> Result<(Amount, Vec<MilestoneId>), EscrowError> {
        let target = if self.state == EscrowState::Created {
            EscrowState::Funded
        } else {
            self.state
        };
        if self.state.is_terminal() {
            return Err(EscrowError::transition(
                self.state,
                target,
                Action::ConfirmFunds,
                "escrow is closed",
            ));
        }
        if self.is_fully_funded() {
            return Err(EscrowError::transition(
                self.state,
                target,
                Action::ConfirmFunds,
                "escrow is already fully funded",
            ));
        }
        let added = match amount {
            None => self.total_amount.saturating_sub(self.funded_amount),
            Some(a) if a.is_zero() => {
                return Err(EscrowError::Validation(
                    "funding amount must be greater than zero".into(),
                ))
            }
            Some(a) => a,
        };
        let funded = self.funded_amount.checked_add(added)?;
        if funded > self.total_amount {
            return Err(EscrowError::Validation(format!(
                "funding {added} would bring funded_amount to {funded}, above total_amount {}",
                self.total_amount
            )));
        }
        self.funded_amount = funded;
        let unlocked = self.unlock_funded_milestones(now)?;
        Ok((added, unlocked))
    }

    /// Increase the total and append a CREATED milestone for the delta.
    pub(crate) fn change_budget(
        &mut self,
        amount_delta: i64,
        milestone_name: &str,
        evidence_type: EvidenceType,
        now: Timestamp,
    ) -> Result<MilestoneId, EscrowError> {
        self.ensure_open(Action::ChangeBudget)?;
        if amount_delta < 0 {
            return Err(EscrowError::Validation(format!(
                "budget decreases are not supported (amount_delta {amount_delta})"
            )));
        }
        let delta = Amount::positive("amount_delta", amount_delta)?;
        let name = milestone_name.trim();
        if name.is_empty() {
            return Err(EscrowError::Validation("milestone_name must be non-empty".into()));
        }
        self.total_amount = self.total_amount.checked_add(delta)?;
        let milestone = Milestone::new(name.to_string(), delta, BTreeSet::from([evidence_type]), now);
        let id = milestone.id;
        self.milestones.push(milestone);
        Ok(id)
    }

    /// Append generated milestones (template application).
    pub(crate) fn append_milestones(&mut self, specs: Vec<MilestoneSpec>, now: Timestamp) -> Vec<MilestoneId> {
        specs
            .into_iter()
            .map(|s| {
                let m = Milestone::new(s.name, s.amount, s.required_evidence_types, now);
                let id = m.id;
                self.milestones.push(m);
                id
            })
            .collect()
    }

    /// Advance the escrow state after a mutation. Never unlocks funds.
    pub(crate) fn refresh(&mut self, now: Timestamp) {
        self.refresh_state();
        self.updated_at = now;
    }

    fn unlock_funded_milestones(&mut self, now: Timestamp) -> Result<Vec<MilestoneId>, EscrowError> {
        let mut committed = self.committed_amount()?;
        let funded = self.funded_amount;
        let mut unlocked = Vec::new();
        for m in self
            .milestones
            .iter_mut()
            .filter(|m| m.status == MilestoneStatus::Created)
        {
            let needed = committed.checked_add(m.amount)?;
            if needed > funded {
                break;
            }
            m.unlock(now);
            committed = needed;
            unlocked.push(m.id);
        }
        Ok(unlocked)
    }

    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let settled = !self.milestones.is_empty()
            && self.milestones.iter().all(|m| m.status.is_terminal());
        if settled {
            self.state = if self.milestones.iter().any(|m| m.status == MilestoneStatus::Paid) {
                EscrowState::Completed
            } else {
                EscrowState::Cancelled
            };
            return;
        }
        if self.state == EscrowState::Created && !self.funded_amount.is_zero() {
            self.state = EscrowState::Funded;
        }
        let work_started = self
            .milestones
            .iter()
            .any(|m| m.status != MilestoneStatus::Created);
        if self.state == EscrowState::Funded && self.is_fully_funded() && work_started {
            self.state = EscrowState::Active;
        }
    }
}
