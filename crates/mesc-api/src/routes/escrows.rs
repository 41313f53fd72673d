//! # Escrow Routes
//!
//! Escrow creation, funding, budget changes, template application, and the
//! escrow-scoped reads. Every mutating handler requires a
//! [`CallerIdentity`] and, except for creation, the caller's current
//! `version` token.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mesc_core::{Amount, EscrowId, MilestoneId, PartyId, TemplateId};
use mesc_escrow::{
    AgreementTerms, BudgetChange, Escrow, FundingConfirmation, MilestoneSpec, PaymentInstruction,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_path, extract_query, extract_validated_json, Validate};
use crate::state::AppState;

/// Default page size for escrow listings.
const DEFAULT_LIMIT: usize = 50;
/// Largest page a caller may request.
const MAX_LIMIT: usize = 500;

// -- DTOs ---------------------------------------------------------------------

/// One milestone in a create request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MilestoneInput {
    pub name: String,
    /// Release amount in minor units.
    pub amount: i64,
    pub required_evidence_types: Vec<String>,
}

/// Create an escrow. `milestones` may be empty when a template will be
/// applied afterwards.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEscrowRequest {
    pub buyer_id: String,
    pub provider_id: String,
    /// Contract total in minor units.
    pub total_amount: i64,
    /// ISO 4217 code, default `USD`.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub milestones: Vec<MilestoneInput>,
}

impl Validate for CreateEscrowRequest {
    fn validate(&self) -> Result<(), String> {
        if self.buyer_id.trim().is_empty() {
            return Err("buyer_id must not be empty".into());
        }
        if self.provider_id.trim().is_empty() {
            return Err("provider_id must not be empty".into());
        }
        if self.total_amount <= 0 {
            return Err("total_amount must be greater than zero".into());
        }
        Ok(())
    }
}

impl CreateEscrowRequest {
    fn into_terms(self) -> Result<(AgreementTerms, Option<String>), AppError> {
        let milestones = self
            .milestones
            .into_iter()
            .map(|m| {
                let amount = Amount::new("milestones.amount", m.amount)?;
                Ok(MilestoneSpec::new(m.name, amount, m.required_evidence_types)?)
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        let terms = AgreementTerms {
            buyer_id: PartyId::new("buyer_id", &self.buyer_id)?,
            provider_id: PartyId::new("provider_id", &self.provider_id)?,
            total_amount: Amount::new("total_amount", self.total_amount)?,
            milestones,
        };
        Ok((terms, self.currency))
    }
}

/// Paging parameters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<usize>,
    /// Page size (default 50, maximum 500).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    pub(crate) fn window(&self) -> (usize, usize) {
        (
            self.skip.unwrap_or(0),
            self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        )
    }
}

/// Confirm full (`amount` omitted) or partial funding.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmFundsRequest {
    pub version: u64,
    pub custodian_id: String,
    pub confirmation_code: String,
    /// Partial tranche in minor units.
    #[serde(default)]
    pub amount: Option<i64>,
}

impl Validate for ConfirmFundsRequest {
    fn validate(&self) -> Result<(), String> {
        match self.amount {
            Some(a) if a <= 0 => Err("amount must be greater than zero".into()),
            _ => Ok(()),
        }
    }
}

/// Increase the contract total by adding a milestone.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeBudgetRequest {
    pub version: u64,
    /// Increase in minor units. Decreases are rejected.
    pub amount_delta: i64,
    pub milestone_name: String,
    /// Evidence the new milestone requires (default `INVOICE`).
    #[serde(default)]
    pub evidence_type: Option<String>,
}

impl Validate for ChangeBudgetRequest {
    fn validate(&self) -> Result<(), String> {
        if self.amount_delta <= 0 {
            return Err("amount_delta must be greater than zero; budget decreases are not supported".into());
        }
        Ok(())
    }
}

/// Result of a budget change.
#[derive(Debug, Serialize)]
pub struct BudgetChangeResponse {
    pub escrow: Escrow,
    pub milestone_id: MilestoneId,
}

/// Expand a template into the escrow's milestones.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyTemplateRequest {
    pub version: u64,
    pub template_id: Uuid,
}

impl Validate for ApplyTemplateRequest {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Result of applying a template.
#[derive(Debug, Serialize)]
pub struct ApplyTemplateResponse {
    pub escrow: Escrow,
    pub milestone_ids: Vec<MilestoneId>,
}

// -- Router -------------------------------------------------------------------

/// Build the escrow router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/escrows", post(create_escrow).get(list_escrows))
        .route("/v1/escrows/{id}", get(get_escrow))
        .route("/v1/escrows/{id}/confirm-funds", post(confirm_funds))
        .route("/v1/escrows/{id}/change-budget", post(change_budget))
        .route("/v1/escrows/{id}/apply-template", post(apply_template))
        .route(
            "/v1/escrows/{id}/payment-instructions",
            get(list_payment_instructions),
        )
}

fn escrow_id(path: Result<Path<Uuid>, PathRejection>) -> Result<EscrowId, AppError> {
    extract_path(path).map(EscrowId::from_uuid)
}

// -- Handlers -----------------------------------------------------------------

/// POST /v1/escrows: Create an escrow at version 0.
#[utoipa::path(
    post,
    path = "/v1/escrows",
    request_body = CreateEscrowRequest,
    responses(
        (status = 201, description = "Escrow created"),
        (status = 401, description = "No caller identity", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an agent", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid terms", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn create_escrow(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateEscrowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Escrow>), AppError> {
    let req = extract_validated_json(body)?;
    let (terms, currency) = req.into_terms()?;
    let escrow = state.service.create_escrow(caller.actor(), terms, currency)?;
    Ok((StatusCode::CREATED, Json(escrow)))
}

/// GET /v1/escrows: List escrows in creation order.
#[utoipa::path(
    get,
    path = "/v1/escrows",
    params(ListQuery),
    responses((status = 200, description = "Page of escrows")),
    tag = "escrows"
)]
async fn list_escrows(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Escrow>>, AppError> {
    let (skip, limit) = extract_query(query)?.window();
    Ok(Json(state.service.list_escrows(skip, limit)))
}

/// GET /v1/escrows/{id}: Fetch one escrow with its milestones.
#[utoipa::path(
    get,
    path = "/v1/escrows/{id}",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    responses(
        (status = 200, description = "Escrow found"),
        (status = 404, description = "Escrow not found", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn get_escrow(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Escrow>, AppError> {
    Ok(Json(state.service.get_escrow(escrow_id(id)?)?))
}

/// POST /v1/escrows/{id}/confirm-funds: Record full or partial funding.
#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/confirm-funds",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = ConfirmFundsRequest,
    responses(
        (status = 200, description = "Funding recorded"),
        (status = 403, description = "Caller is not a custodian", body = crate::error::ErrorBody),
        (status = 409, description = "Stale version or escrow already funded", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid tranche", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn confirm_funds(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ConfirmFundsRequest>, JsonRejection>,
) -> Result<Json<Escrow>, AppError> {
    let id = escrow_id(id)?;
    let req = extract_validated_json(body)?;
    let amount = req
        .amount
        .map(|a| Amount::positive("amount", a))
        .transpose()?;
    let confirmation = FundingConfirmation {
        custodian_id: req.custodian_id,
        confirmation_code: req.confirmation_code,
        amount,
    };
    let escrow = state
        .service
        .confirm_funds(caller.actor(), id, req.version, confirmation)?;
    Ok(Json(escrow))
}

/// POST /v1/escrows/{id}/change-budget: Add a milestone for a budget increase.
#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/change-budget",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = ChangeBudgetRequest,
    responses(
        (status = 200, description = "Budget increased"),
        (status = 409, description = "Stale version or closed escrow", body = crate::error::ErrorBody),
        (status = 422, description = "Non-positive delta", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn change_budget(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ChangeBudgetRequest>, JsonRejection>,
) -> Result<Json<BudgetChangeResponse>, AppError> {
    let id = escrow_id(id)?;
    let req = extract_validated_json(body)?;
    let change = BudgetChange {
        amount_delta: req.amount_delta,
        milestone_name: req.milestone_name,
        evidence_type: req.evidence_type,
    };
    let (escrow, milestone_id) = state
        .service
        .change_budget(caller.actor(), id, req.version, change)?;
    Ok(Json(BudgetChangeResponse {
        escrow,
        milestone_id,
    }))
}

/// POST /v1/escrows/{id}/apply-template: Generate milestones from a template.
#[utoipa::path(
    post,
    path = "/v1/escrows/{id}/apply-template",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    request_body = ApplyTemplateRequest,
    responses(
        (status = 200, description = "Template applied"),
        (status = 404, description = "Unknown escrow or template", body = crate::error::ErrorBody),
        (status = 409, description = "Escrow already has milestones or is funded", body = crate::error::ErrorBody),
        (status = 422, description = "Template over-allocates", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn apply_template(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ApplyTemplateRequest>, JsonRejection>,
) -> Result<Json<ApplyTemplateResponse>, AppError> {
    let id = escrow_id(id)?;
    let req = extract_validated_json(body)?;
    let (escrow, milestone_ids) = state.service.apply_template(
        caller.actor(),
        id,
        req.version,
        TemplateId::from_uuid(req.template_id),
    )?;
    Ok(Json(ApplyTemplateResponse {
        escrow,
        milestone_ids,
    }))
}

/// GET /v1/escrows/{id}/payment-instructions: Instructions issued for an escrow.
#[utoipa::path(
    get,
    path = "/v1/escrows/{id}/payment-instructions",
    params(("id" = Uuid, Path, description = "Escrow ID")),
    responses(
        (status = 200, description = "Instructions, oldest first"),
        (status = 404, description = "Escrow not found", body = crate::error::ErrorBody),
    ),
    tag = "escrows"
)]
async fn list_payment_instructions(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<PaymentInstruction>>, AppError> {
    Ok(Json(state.service.instructions_for_escrow(escrow_id(id)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_window_defaults_and_caps() {
        assert_eq!(ListQuery::default().window(), (0, DEFAULT_LIMIT));
        let q = ListQuery {
            skip: Some(5),
            limit: Some(10_000),
        };
        assert_eq!(q.window(), (5, MAX_LIMIT));
    }

    #[test]
    fn create_request_validation() {
        let req = CreateEscrowRequest {
            buyer_id: "bob".into(),
            provider_id: " ".into(),
            total_amount: 100,
            currency: None,
            milestones: vec![],
        };
        assert!(req.validate().unwrap_err().contains("provider_id"));
    }

    #[test]
    fn negative_milestone_amount_is_a_validation_error() {
        let req = CreateEscrowRequest {
            buyer_id: "bob".into(),
            provider_id: "pat".into(),
            total_amount: 100,
            currency: None,
            milestones: vec![MilestoneInput {
                name: "Demo".into(),
                amount: -5,
                required_evidence_types: vec!["PHOTO".into()],
            }],
        };
        assert!(matches!(req.into_terms(), Err(AppError::Validation(_))));
    }

    #[test]
    fn zero_tranche_rejected() {
        let req = ConfirmFundsRequest {
            version: 0,
            custodian_id: "c".into(),
            confirmation_code: "x".into(),
            amount: Some(0),
        };
        assert!(req.validate().is_err());
    }
}
