//! # Escrow Service
//!
//! Orchestrates every protocol operation. Each mutation runs as one unit:
//!
//! ```text
//! authorize(role, action)
//!   → resolve target escrow (milestone → owning escrow)
//!   → lock escrow
//!   → compare expected version
//!   → apply transition to a working copy
//!   → refresh escrow state
//!   → version + 1
//!   → append ledger entries
//!   → commit working copy
//! ```
//!
//! Any error before the commit drops the working copy, so a rejected
//! mutation leaves both the escrow and the ledger exactly as they were.
//!
//! ## Ledger Entries
//!
//! Every entry's `entity_id` is the escrow's bare UUID, and every
//! `event_data` produced by an escrow mutation carries the `version` and
//! `escrow_state` the mutation produced. Only `FUNDS_CONFIRMED` unlocks
//! milestones; its entry lists them under `unlocked_milestones`.

use mesc_core::{Amount, EscrowId, InstructionId, MilestoneId, TemplateId, Timestamp};
use mesc_ledger::{AuditLedger, ChainReport, EventType, NewEvent};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::EscrowError;
use crate::escrow::{AgreementTerms, Escrow, EscrowState};
use crate::evidence::{Evidence, EvidenceOrigin, EvidenceType, UploadSourceType};
use crate::milestone::{Approval, DisputeResolution, Milestone};
use crate::payment::PaymentInstruction;
use crate::policy::{authorize, Action, Actor};
use crate::store::EscrowStore;
use crate::template::{MilestoneTemplate, TemplateCatalog};

/// Ledger `entity_id` for an escrow.
pub fn entity_id(id: EscrowId) -> String {
    id.as_uuid().to_string()
}

/// Custodian's funding confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingConfirmation {
    /// Custodian account confirming the funds.
    pub custodian_id: String,
    /// Custodian's reference for the deposit.
    pub confirmation_code: String,
    /// Partial tranche; `None` confirms the full remaining amount.
    pub amount: Option<Amount>,
}

/// An increase of the contract total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetChange {
    /// Positive increase in minor units.
    pub amount_delta: i64,
    /// Name of the milestone created for the delta.
    pub milestone_name: String,
    /// Evidence the new milestone requires (default `INVOICE`).
    pub evidence_type: Option<String>,
}

/// A milestone after an accepted mutation, with the owning escrow's new
/// version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneUpdate {
    /// Owning escrow.
    pub escrow_id: EscrowId,
    /// Escrow version after the mutation.
    pub escrow_version: u64,
    /// The milestone as committed.
    pub milestone: Milestone,
}

impl MilestoneUpdate {
    fn from_escrow(escrow: &Escrow, milestone_id: MilestoneId) -> Result<Self, EscrowError> {
        let milestone = escrow
            .milestone(milestone_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found("milestone", milestone_id.as_uuid()))?;
        Ok(Self {
            escrow_id: escrow.id,
            escrow_version: escrow.version,
            milestone,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Escrow(EscrowId),
    Milestone(MilestoneId),
}

/// An event produced by a transition, before the ledger seals it.
#[derive(Debug)]
struct Recorded {
    event_type: EventType,
    data: Value,
}

impl Recorded {
    fn new(event_type: EventType, data: Value) -> Self {
        Self { event_type, data }
    }

    fn into_event(self, entity: &str, actor: &Actor, escrow: &Escrow) -> NewEvent {
        let mut data = self.data;
        if let Value::Object(map) = &mut data {
            map.insert("version".into(), json!(escrow.version));
            map.insert("escrow_state".into(), json!(escrow.state));
        }
        NewEvent::new(entity, self.event_type, actor.id.clone(), actor.role.as_str(), data)
    }
}

/// Entry point for every escrow operation. Cheap to clone; clones share the
/// same store, template catalog, and ledger.
#[derive(Debug, Clone)]
pub struct EscrowService {
    store: EscrowStore,
    templates: TemplateCatalog,
    ledger: AuditLedger,
}

impl EscrowService {
    /// Service over an existing ledger and template catalog.
    pub fn new(ledger: AuditLedger, templates: TemplateCatalog) -> Self {
        Self {
            store: EscrowStore::new(),
            templates,
            ledger,
        }
    }

    /// In-memory ledger and the seeded template catalog.
    ///
    /// # Errors
    ///
    /// Only fails if the built-in templates are malformed.
    pub fn in_memory() -> Result<Self, EscrowError> {
        Ok(Self::new(AuditLedger::in_memory(), TemplateCatalog::seeded()?))
    }

    /// The audit ledger every mutation is recorded on.
    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    /// The template catalog.
    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Number of escrows held.
    pub fn escrow_count(&self) -> usize {
        self.store.len()
    }

    // ── Core mutation path ───────────────────────────────────────────

    fn resolve(&self, target: Target) -> Result<EscrowId, EscrowError> {
        match target {
            Target::Escrow(id) => Ok(id),
            Target::Milestone(id) => self
                .store
                .escrow_for_milestone(id)
                .ok_or_else(|| EscrowError::not_found("milestone", id.as_uuid())),
        }
    }

    fn mutate<R>(
        &self,
        actor: &Actor,
        action: Action,
        target: Target,
        expected_version: Option<u64>,
        apply: impl FnOnce(&mut Escrow, Timestamp) -> Result<(R, Vec<Recorded>), EscrowError>,
    ) -> Result<(Escrow, R), EscrowError> {
        self.mutate_and_then(actor, action, target, expected_version, apply, |_, _| {})
    }

    /// `on_commit` runs after the ledger append, while the escrow lock is
    /// still held.
    fn mutate_and_then<R>(
        &self,
        actor: &Actor,
        action: Action,
        target: Target,
        expected_version: Option<u64>,
        apply: impl FnOnce(&mut Escrow, Timestamp) -> Result<(R, Vec<Recorded>), EscrowError>,
        on_commit: impl FnOnce(&Escrow, &R),
    ) -> Result<(Escrow, R), EscrowError> {
        authorize(actor, action)?;
        let escrow_id = self.resolve(target)?;
        let handle = self
            .store
            .handle(escrow_id)
            .ok_or_else(|| EscrowError::not_found("escrow", escrow_id.as_uuid()))?;

        let mut guard = handle.lock();
        if let Some(expected) = expected_version {
            if expected != guard.version {
                tracing::debug!(
                    escrow_id = %escrow_id,
                    expected,
                    actual = guard.version,
                    %action,
                    "stale version"
                );
                return Err(EscrowError::VersionConflict {
                    escrow_id,
                    expected,
                    actual: guard.version,
                });
            }
        }

        let now = Timestamp::now();
        let mut working = guard.clone();
        let (output, recorded) = apply(&mut working, now)?;
        working.refresh(now);
        working.version += 1;

        let entity = entity_id(working.id);
        let events = recorded
            .into_iter()
            .map(|r| r.into_event(&entity, actor, &working))
            .collect();
        self.ledger.append_batch(events)?;

        *guard = working.clone();
        self.store.index_milestones(&working);
        on_commit(&working, &output);
        drop(guard);

        tracing::info!(
            escrow_id = %working.id,
            %action,
            actor = %actor.id,
            version = working.version,
            state = %working.state,
            "escrow mutation committed"
        );
        Ok((working, output))
    }

    // ── Escrow-scoped operations ─────────────────────────────────────

    /// Create an escrow in CREATED at version 0 and record `ESCROW_CREATED`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless the actor is an Agent,
    /// [`EscrowError::Validation`] for malformed terms, or a ledger error.
    pub fn create_escrow(
        &self,
        actor: &Actor,
        terms: AgreementTerms,
        currency: Option<String>,
    ) -> Result<Escrow, EscrowError> {
        authorize(actor, Action::CreateEscrow)?;
        let escrow = Escrow::create(terms, currency)?;
        let milestones: Vec<Value> = escrow
            .milestones
            .iter()
            .map(|m| json!({ "milestone_id": m.id, "name": m.name, "amount": m.amount }))
            .collect();
        let data = json!({
            "buyer_id": escrow.buyer_id,
            "provider_id": escrow.provider_id,
            "total_amount": escrow.total_amount,
            "currency": escrow.currency,
            "agreement_hash": escrow.agreement_hash,
            "milestones": milestones,
            "version": escrow.version,
            "escrow_state": escrow.state,
        });
        self.ledger.append(NewEvent::new(
            entity_id(escrow.id),
            EventType::EscrowCreated,
            actor.id.clone(),
            actor.role.as_str(),
            data,
        ))?;
        self.store.insert(escrow.clone());
        tracing::info!(
            escrow_id = %escrow.id,
            actor = %actor.id,
            total = %escrow.total_amount,
            milestones = escrow.milestones.len(),
            "escrow created"
        );
        Ok(escrow)
    }

    /// Confirm full (`amount: None`) or partial funding.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Custodian,
    /// [`EscrowError::VersionConflict`] on a stale `version`,
    /// [`EscrowError::InvalidTransition`] when already fully funded or closed,
    /// [`EscrowError::Validation`] for a zero or over-funding tranche.
    pub fn confirm_funds(
        &self,
        actor: &Actor,
        escrow_id: EscrowId,
        version: u64,
        confirmation: FundingConfirmation,
    ) -> Result<Escrow, EscrowError> {
        let (escrow, ()) = self.mutate(
            actor,
            Action::ConfirmFunds,
            Target::Escrow(escrow_id),
            Some(version),
            |escrow, now| {
                let custodian_id = non_empty("custodian_id", &confirmation.custodian_id)?;
                let confirmation_code =
                    non_empty("confirmation_code", &confirmation.confirmation_code)?;
                let (added, unlocked) = escrow.confirm_funds(confirmation.amount, now)?;
                let data = json!({
                    "custodian_id": custodian_id,
                    "confirmation_code": confirmation_code,
                    "amount": added,
                    "partial": confirmation.amount.is_some(),
                    "funded_amount": escrow.funded_amount,
                    "total_amount": escrow.total_amount,
                    "unlocked_milestones": unlocked,
                });
                Ok(((), vec![Recorded::new(EventType::FundsConfirmed, data)]))
            },
        )?;
        Ok(escrow)
    }

    /// Increase the total and append a CREATED milestone for the delta.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Agent,
    /// [`EscrowError::VersionConflict`] on a stale `version`,
    /// [`EscrowError::Validation`] for a non-positive delta or blank name.
    pub fn change_budget(
        &self,
        actor: &Actor,
        escrow_id: EscrowId,
        version: u64,
        change: BudgetChange,
    ) -> Result<(Escrow, MilestoneId), EscrowError> {
        self.mutate(
            actor,
            Action::ChangeBudget,
            Target::Escrow(escrow_id),
            Some(version),
            |escrow, now| {
                let evidence_type = EvidenceType::new(
                    change
                        .evidence_type
                        .as_deref()
                        .unwrap_or(EvidenceType::DEFAULT_BUDGET_CHANGE),
                )?;
                let previous_total = escrow.total_amount;
                let milestone_id = escrow.change_budget(
                    change.amount_delta,
                    &change.milestone_name,
                    evidence_type.clone(),
                    now,
                )?;
                let data = json!({
                    "amount_delta": change.amount_delta,
                    "previous_total": previous_total,
                    "total_amount": escrow.total_amount,
                    "funded_amount": escrow.funded_amount,
                    "milestone_id": milestone_id,
                    "milestone_name": change.milestone_name.trim(),
                    "evidence_type": evidence_type,
                });
                Ok((milestone_id, vec![Recorded::new(EventType::BudgetChanged, data)]))
            },
        )
    }

    /// Expand a template into a CREATED escrow with no milestones. Records
    /// one `MILESTONE_CREATED` per generated milestone and a closing
    /// `TEMPLATE_APPLIED`, atomically.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Agent,
    /// [`EscrowError::NotFound`] for an unknown template,
    /// [`EscrowError::InvalidTransition`] unless the escrow is CREATED and
    /// empty, [`EscrowError::TemplateOverAllocation`] or
    /// [`EscrowError::Validation`] from allocation.
    pub fn apply_template(
        &self,
        actor: &Actor,
        escrow_id: EscrowId,
        version: u64,
        template_id: TemplateId,
    ) -> Result<(Escrow, Vec<MilestoneId>), EscrowError> {
        self.mutate(
            actor,
            Action::ApplyTemplate,
            Target::Escrow(escrow_id),
            Some(version),
            |escrow, now| {
                let template = self
                    .templates
                    .get(template_id)
                    .ok_or_else(|| EscrowError::not_found("template", template_id.as_uuid()))?;
                if escrow.state != EscrowState::Created {
                    return Err(EscrowError::transition(
                        escrow.state,
                        escrow.state,
                        Action::ApplyTemplate,
                        "templates apply only to CREATED escrows",
                    ));
                }
                if !escrow.milestones.is_empty() {
                    return Err(EscrowError::transition(
                        escrow.state,
                        escrow.state,
                        Action::ApplyTemplate,
                        "escrow already has milestones",
                    ));
                }
                let specs = template.allocate(escrow.total_amount)?;
                let ids = escrow.append_milestones(specs, now);

                let mut recorded = Vec::with_capacity(ids.len() + 1);
                let mut allocated = Amount::ZERO;
                for m in escrow.milestones.iter().filter(|m| ids.contains(&m.id)) {
                    allocated = allocated.checked_add(m.amount)?;
                    recorded.push(Recorded::new(
                        EventType::MilestoneCreated,
                        json!({
                            "milestone_id": m.id,
                            "name": m.name,
                            "amount": m.amount,
                            "required_evidence_types": m.required_evidence_types,
                            "template_id": template.id,
                        }),
                    ));
                }
                recorded.push(Recorded::new(
                    EventType::TemplateApplied,
                    json!({
                        "template_id": template.id,
                        "template_name": template.name,
                        "milestone_count": ids.len(),
                        "allocated_amount": allocated,
                        "total_amount": escrow.total_amount,
                    }),
                ));
                Ok((ids, recorded))
            },
        )
    }

    // ── Milestone-scoped operations ──────────────────────────────────

    fn attach(
        &self,
        actor: &Actor,
        action: Action,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        build: impl FnOnce() -> Result<Evidence, EscrowError>,
    ) -> Result<MilestoneUpdate, EscrowError> {
        let (escrow, ()) = self.mutate(
            actor,
            action,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, _now| {
                let evidence = build()?;
                let data = json!({
                    "milestone_id": milestone_id,
                    "evidence_id": evidence.id,
                    "evidence_type": evidence.evidence_type,
                    "url": evidence.url,
                    "source": evidence.source,
                    "origin": evidence.origin,
                    "content_digest": evidence.content_digest,
                    "size_bytes": evidence.size_bytes,
                });
                escrow.milestone_mut(milestone_id)?.attach(evidence, action)?;
                Ok(((), vec![Recorded::new(EventType::EvidenceAttached, data)]))
            },
        )?;
        MilestoneUpdate::from_escrow(&escrow, milestone_id)
    }

    /// Attach URL evidence. Origin is SELF_ATTESTED for a Contractor and
    /// THIRD_PARTY for anyone else.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`], [`EscrowError::NotFound`],
    /// [`EscrowError::VersionConflict`], [`EscrowError::Validation`] for a
    /// blank type or URL, [`EscrowError::InvalidTransition`] unless the
    /// milestone is PENDING or EVIDENCE_SUBMITTED.
    pub fn attach_evidence(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        evidence_type: &str,
        url: &str,
    ) -> Result<MilestoneUpdate, EscrowError> {
        self.attach(actor, Action::AttachEvidence, milestone_id, expected_version, || {
            let evidence_type = EvidenceType::new(evidence_type)?;
            let origin = EvidenceOrigin::for_role(actor.role);
            Ok(Evidence::link(evidence_type, url, actor, origin)?)
        })
    }

    /// Attach evidence attested by someone other than the contractor.
    ///
    /// # Errors
    ///
    /// As [`EscrowService::attach_evidence`]; Contractors are forbidden.
    pub fn attach_third_party_evidence(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        evidence_type: &str,
        url: &str,
    ) -> Result<MilestoneUpdate, EscrowError> {
        self.attach(
            actor,
            Action::AttachThirdPartyEvidence,
            milestone_id,
            expected_version,
            || {
                let evidence_type = EvidenceType::new(evidence_type)?;
                Ok(Evidence::link(evidence_type, url, actor, EvidenceOrigin::ThirdParty)?)
            },
        )
    }

    /// Attach an uploaded payload. Only its digest, size, and a
    /// content-addressed reference are kept.
    ///
    /// # Errors
    ///
    /// As [`EscrowService::attach_evidence`], plus
    /// [`EscrowError::Validation`] for an empty payload.
    pub fn attach_uploaded_evidence(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        evidence_type: &str,
        source_type: UploadSourceType,
        payload: &[u8],
    ) -> Result<MilestoneUpdate, EscrowError> {
        self.attach(actor, Action::AttachEvidence, milestone_id, expected_version, || {
            let evidence_type = EvidenceType::new(evidence_type)?;
            let origin = EvidenceOrigin::for_role(actor.role);
            Ok(Evidence::upload(evidence_type, source_type, payload, actor, origin)?)
        })
    }

    /// PENDING → EVIDENCE_SUBMITTED once every required type is covered.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Contractor,
    /// [`EscrowError::InvalidTransition`] when not PENDING or evidence is
    /// missing.
    pub fn submit(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
    ) -> Result<MilestoneUpdate, EscrowError> {
        let (escrow, ()) = self.mutate(
            actor,
            Action::SubmitMilestone,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, now| {
                let milestone = escrow.milestone_mut(milestone_id)?;
                milestone.submit(now)?;
                let data = json!({
                    "milestone_id": milestone_id,
                    "evidence_count": milestone.evidence.len(),
                    "status": milestone.status,
                });
                Ok(((), vec![Recorded::new(EventType::MilestoneSubmitted, data)]))
            },
        )?;
        MilestoneUpdate::from_escrow(&escrow, milestone_id)
    }

    /// EVIDENCE_SUBMITTED → APPROVED with the inspector's signature.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Inspector,
    /// [`EscrowError::Validation`] for a blank approver or signature,
    /// [`EscrowError::InvalidTransition`] unless EVIDENCE_SUBMITTED.
    pub fn approve(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        approver_id: &str,
        signature: &str,
    ) -> Result<MilestoneUpdate, EscrowError> {
        let (escrow, ()) = self.mutate(
            actor,
            Action::ApproveMilestone,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, now| {
                let approval = Approval {
                    approver_id: non_empty("approver_id", approver_id)?,
                    signature: non_empty("signature", signature)?,
                    approved_at: now,
                };
                let data = json!({
                    "milestone_id": milestone_id,
                    "approver_id": approval.approver_id,
                    "signature": approval.signature,
                });
                escrow.milestone_mut(milestone_id)?.approve(approval)?;
                Ok(((), vec![Recorded::new(EventType::MilestoneApproved, data)]))
            },
        )?;
        MilestoneUpdate::from_escrow(&escrow, milestone_id)
    }

    /// APPROVED → PAID, issuing the payment instruction. The instruction
    /// records the escrow version it was issued against.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Agent or Custodian,
    /// [`EscrowError::InvalidTransition`] unless APPROVED (including a
    /// second generation for an already PAID milestone).
    pub fn generate_instruction(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
    ) -> Result<PaymentInstruction, EscrowError> {
        let (_, instruction) = self.mutate_and_then(
            actor,
            Action::GenerateInstruction,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, now| {
                let milestone = escrow
                    .milestone(milestone_id)
                    .cloned()
                    .ok_or_else(|| EscrowError::not_found("milestone", milestone_id.as_uuid()))?;
                let instruction = PaymentInstruction::issue(escrow, &milestone, &actor.id, now);
                escrow
                    .milestone_mut(milestone_id)?
                    .mark_paid(instruction.id, now)?;
                let data = json!({
                    "milestone_id": milestone_id,
                    "instruction_id": instruction.id,
                    "amount": instruction.amount,
                    "currency": instruction.currency,
                    "payee": instruction.payee,
                    "agreement_version": instruction.agreement_version,
                });
                Ok((instruction, vec![Recorded::new(EventType::PaymentInstructed, data)]))
            },
            |_, instruction| self.store.insert_instruction(instruction.clone()),
        )?;
        Ok(instruction)
    }

    /// PENDING | EVIDENCE_SUBMITTED → DISPUTED.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] for Contractors,
    /// [`EscrowError::InvalidTransition`] from any other status.
    pub fn raise_dispute(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        reason: Option<String>,
    ) -> Result<MilestoneUpdate, EscrowError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let (escrow, ()) = self.mutate(
            actor,
            Action::RaiseDispute,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, now| {
                let milestone = escrow.milestone_mut(milestone_id)?;
                let previous_status = milestone.status;
                milestone.raise_dispute(reason.clone(), now)?;
                let data = json!({
                    "milestone_id": milestone_id,
                    "reason": reason,
                    "previous_status": previous_status,
                });
                Ok(((), vec![Recorded::new(EventType::DisputeRaised, data)]))
            },
        )?;
        MilestoneUpdate::from_escrow(&escrow, milestone_id)
    }

    /// Resume a dispute to the remembered status or cancel the milestone.
    /// A cancelled milestone's funds stay in the funded total and are never
    /// paid out or reallocated.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] for Contractors,
    /// [`EscrowError::InvalidTransition`] unless DISPUTED.
    pub fn resolve_dispute(
        &self,
        actor: &Actor,
        milestone_id: MilestoneId,
        expected_version: Option<u64>,
        resolution: DisputeResolution,
    ) -> Result<MilestoneUpdate, EscrowError> {
        let (escrow, ()) = self.mutate(
            actor,
            Action::ResolveDispute,
            Target::Milestone(milestone_id),
            expected_version,
            |escrow, now| {
                let status = escrow
                    .milestone_mut(milestone_id)?
                    .resolve_dispute(resolution, now)?;
                let data = json!({
                    "milestone_id": milestone_id,
                    "resolution": resolution,
                    "status": status,
                });
                Ok(((), vec![Recorded::new(EventType::DisputeResolved, data)]))
            },
        )?;
        MilestoneUpdate::from_escrow(&escrow, milestone_id)
    }

    // ── Payment status ───────────────────────────────────────────────

    fn update_payment(
        &self,
        actor: &Actor,
        instruction_id: InstructionId,
        event_type: EventType,
        transition: impl FnOnce(&mut PaymentInstruction, Timestamp) -> Result<(), EscrowError>,
    ) -> Result<PaymentInstruction, EscrowError> {
        authorize(actor, Action::UpdatePaymentStatus)?;
        let not_found = || EscrowError::not_found("payment instruction", instruction_id.as_uuid());
        let escrow_id = self
            .store
            .instruction(instruction_id)
            .ok_or_else(not_found)?
            .escrow_id;
        let handle = self
            .store
            .handle(escrow_id)
            .ok_or_else(|| EscrowError::not_found("escrow", escrow_id.as_uuid()))?;
        let _escrow = handle.lock();

        let updated = self
            .store
            .with_instruction(instruction_id, |current| {
                let now = Timestamp::now();
                let mut working = current.clone();
                transition(&mut working, now)?;
                self.ledger.append(NewEvent::new(
                    entity_id(escrow_id),
                    event_type,
                    actor.id.clone(),
                    actor.role.as_str(),
                    json!({
                        "instruction_id": working.id,
                        "milestone_id": working.milestone_id,
                        "status": working.status,
                        "amount": working.amount,
                    }),
                ))?;
                *current = working.clone();
                Ok::<_, EscrowError>(working)
            })
            .ok_or_else(not_found)??;

        tracing::info!(
            escrow_id = %escrow_id,
            instruction_id = %updated.id,
            status = %updated.status,
            actor = %actor.id,
            "payment status updated"
        );
        Ok(updated)
    }

    /// INSTRUCTED → SENT.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Forbidden`] unless Custodian,
    /// [`EscrowError::NotFound`], or [`EscrowError::InvalidTransition`].
    pub fn mark_sent(
        &self,
        actor: &Actor,
        instruction_id: InstructionId,
    ) -> Result<PaymentInstruction, EscrowError> {
        self.update_payment(actor, instruction_id, EventType::PaymentSent, |pi, now| {
            pi.mark_sent(now)
        })
    }

    /// SENT → SETTLED.
    ///
    /// # Errors
    ///
    /// As [`EscrowService::mark_sent`].
    pub fn mark_settled(
        &self,
        actor: &Actor,
        instruction_id: InstructionId,
    ) -> Result<PaymentInstruction, EscrowError> {
        self.update_payment(actor, instruction_id, EventType::PaymentSettled, |pi, now| {
            pi.mark_settled(now)
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Fetch an escrow.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`] for an unknown id.
    pub fn get_escrow(&self, id: EscrowId) -> Result<Escrow, EscrowError> {
        self.store
            .get(id)
            .ok_or_else(|| EscrowError::not_found("escrow", id.as_uuid()))
    }

    /// Escrows in creation order.
    pub fn list_escrows(&self, skip: usize, limit: usize) -> Vec<Escrow> {
        self.store.list(skip, limit)
    }

    /// Fetch one milestone with its escrow's current version.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`] for an unknown id.
    pub fn get_milestone(&self, id: MilestoneId) -> Result<MilestoneUpdate, EscrowError> {
        let escrow_id = self.resolve(Target::Milestone(id))?;
        MilestoneUpdate::from_escrow(&self.get_escrow(escrow_id)?, id)
    }

    /// Payment instructions of one escrow, oldest first.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`] for an unknown escrow.
    pub fn instructions_for_escrow(
        &self,
        escrow_id: EscrowId,
    ) -> Result<Vec<PaymentInstruction>, EscrowError> {
        if self.store.handle(escrow_id).is_none() {
            return Err(EscrowError::not_found("escrow", escrow_id.as_uuid()));
        }
        Ok(self.store.instructions_for(escrow_id))
    }

    /// Fetch a payment instruction.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`] for an unknown id.
    pub fn get_instruction(&self, id: InstructionId) -> Result<PaymentInstruction, EscrowError> {
        self.store
            .instruction(id)
            .ok_or_else(|| EscrowError::not_found("payment instruction", id.as_uuid()))
    }

    /// All templates.
    pub fn list_templates(&self) -> Vec<MilestoneTemplate> {
        self.templates.list()
    }

    /// Fetch a template.
    ///
    /// # Errors
    ///
    /// [`EscrowError::NotFound`] for an unknown id.
    pub fn get_template(&self, id: TemplateId) -> Result<MilestoneTemplate, EscrowError> {
        self.templates
            .get(id)
            .ok_or_else(|| EscrowError::not_found("template", id.as_uuid()))
    }

    /// Add a template to the catalog.
    ///
    /// # Errors
    ///
    /// See [`TemplateCatalog::register`].
    pub fn register_template(&self, template: MilestoneTemplate) -> Result<TemplateId, EscrowError> {
        let id = self.templates.register(template)?;
        tracing::info!(template_id = %id, "template registered");
        Ok(id)
    }

    /// Verify the audit chain.
    ///
    /// # Errors
    ///
    /// [`EscrowError::Ledger`] wrapping `TamperDetected`.
    pub fn verify_ledger(&self) -> Result<ChainReport, EscrowError> {
        Ok(self.ledger.verify()?)
    }
}

fn non_empty(field: &'static str, raw: &str) -> Result<String, EscrowError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(mesc_core::ValidationError::EmptyField { field }.into());
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::MilestoneSpec;
    use crate::policy::Role;
    use mesc_core::PartyId;

    fn agent() -> Actor {
        Actor::new("alice", Role::Agent)
    }

    fn custodian() -> Actor {
        Actor::new("carol", Role::Custodian)
    }

    fn terms(total: i64, milestones: &[(&str, i64)]) -> AgreementTerms {
        AgreementTerms {
            buyer_id: PartyId::new("buyer_id", "bob").unwrap(),
            provider_id: PartyId::new("provider_id", "pat").unwrap(),
            total_amount: Amount::new("total", total).unwrap(),
            milestones: milestones
                .iter()
                .map(|(n, a)| MilestoneSpec::new(*n, Amount::new("a", *a).unwrap(), ["PHOTO"]).unwrap())
                .collect(),
        }
    }

    fn full_funding() -> FundingConfirmation {
        FundingConfirmation {
            custodian_id: "acct-1".into(),
            confirmation_code: "WIRE-1".into(),
            amount: None,
        }
    }

    #[test]
    fn create_records_escrow_created() {
        let svc = EscrowService::in_memory().unwrap();
        let e = svc.create_escrow(&agent(), terms(10_000, &[("A", 10_000)]), None).unwrap();
        let log = svc.ledger().snapshot();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, EventType::EscrowCreated);
        assert_eq!(log[0].entity_id, entity_id(e.id));
        assert_eq!(log[0].actor_role, "AGENT");
        assert_eq!(log[0].event_data["agreement_hash"], json!(e.agreement_hash));
    }

    #[test]
    fn create_forbidden_for_non_agents() {
        let svc = EscrowService::in_memory().unwrap();
        let err = svc
            .create_escrow(&custodian(), terms(10_000, &[]), None)
            .unwrap_err();
        assert!(matches!(err, EscrowError::Forbidden { .. }));
        assert!(svc.ledger().is_empty());
        assert_eq!(svc.escrow_count(), 0);
    }

    #[test]
    fn version_is_checked_and_bumped() {
        let svc = EscrowService::in_memory().unwrap();
        let e = svc.create_escrow(&agent(), terms(10_000, &[("A", 10_000)]), None).unwrap();
        let funded = svc.confirm_funds(&custodian(), e.id, 0, full_funding()).unwrap();
        assert_eq!(funded.version, 1);
        assert_eq!(svc.ledger().snapshot()[1].event_data["version"], json!(1));

        let err = svc.confirm_funds(&custodian(), e.id, 0, full_funding()).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::VersionConflict { expected: 0, actual: 1, .. }
        ));
    }

    #[test]
    fn forbidden_is_checked_before_lookup() {
        let svc = EscrowService::in_memory().unwrap();
        let err = svc
            .submit(&agent(), MilestoneId::new(), None)
            .unwrap_err();
        assert!(matches!(err, EscrowError::Forbidden { .. }));
        let err = svc
            .submit(&Actor::new("pat", Role::Contractor), MilestoneId::new(), None)
            .unwrap_err();
        assert!(matches!(err, EscrowError::NotFound { kind: "milestone", .. }));
    }

    #[test]
    fn blank_confirmation_code_rejected_without_side_effects() {
        let svc = EscrowService::in_memory().unwrap();
        let e = svc.create_escrow(&agent(), terms(1_000, &[]), None).unwrap();
        let err = svc
            .confirm_funds(
                &custodian(),
                e.id,
                0,
                FundingConfirmation {
                    confirmation_code: " ".into(),
                    ..full_funding()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
        assert_eq!(svc.get_escrow(e.id).unwrap().version, 0);
        assert_eq!(svc.ledger().len(), 1);
    }

    #[test]
    fn unknown_template_is_not_found() {
        let svc = EscrowService::in_memory().unwrap();
        let e = svc.create_escrow(&agent(), terms(1_000, &[]), None).unwrap();
        let err = svc
            .apply_template(&agent(), e.id, 0, TemplateId::new())
            .unwrap_err();
        assert!(matches!(err, EscrowError::NotFound { kind: "template", .. }));
    }
}
