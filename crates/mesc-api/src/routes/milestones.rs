//! # Milestone Routes
//!
//! Evidence, submission, approval, payment instruction, and disputes.
//! Milestone operations accept an optional `version`; when present it must
//! match the owning escrow's current version. Responses carry the milestone
//! together with the escrow's new version.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mesc_core::MilestoneId;
use mesc_escrow::{DisputeResolution, MilestoneUpdate, PaymentInstruction, UploadSourceType};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_json, extract_optional_json, extract_path, extract_query, extract_validated_json,
    Validate,
};
use crate::state::AppState;

/// Largest evidence upload accepted, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// -- DTOs ---------------------------------------------------------------------

/// Attach evidence by reference.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvidenceRequest {
    #[serde(default)]
    pub version: Option<u64>,
    /// Evidence type, e.g. `PHOTO` or `PERMIT`.
    pub evidence_type: String,
    pub url: String,
}

impl Validate for EvidenceRequest {
    fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".into());
        }
        Ok(())
    }
}

/// Query parameters of an evidence upload. The payload is the raw body.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    pub evidence_type: String,
    /// `PHOTO`, `PDF`, `ESIGN`, or `URL`.
    pub source_type: String,
    #[serde(default)]
    pub version: Option<u64>,
}

/// Body of operations whose only input is the version token.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct VersionedRequest {
    #[serde(default)]
    pub version: Option<u64>,
}

/// Inspector sign-off.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ApproveRequest {
    #[serde(default)]
    pub version: Option<u64>,
    /// Defaults to the caller's actor id.
    #[serde(default)]
    pub approver_id: Option<String>,
    pub signature: String,
}

impl Validate for ApproveRequest {
    fn validate(&self) -> Result<(), String> {
        if self.signature.trim().is_empty() {
            return Err("signature must not be empty".into());
        }
        Ok(())
    }
}

/// Raise a dispute.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DisputeRequest {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Resolve a dispute.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveDisputeRequest {
    #[serde(default)]
    pub version: Option<u64>,
    /// `RESUME` or `CANCEL`.
    #[schema(value_type = String)]
    pub resolution: DisputeResolution,
}

// -- Router -------------------------------------------------------------------

/// Build the milestone router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/milestones/{id}", get(get_milestone))
        .route("/v1/milestones/{id}/evidence", post(attach_evidence))
        .route(
            "/v1/milestones/{id}/evidence/upload",
            post(upload_evidence).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/v1/milestones/{id}/third-party-evidence",
            post(attach_third_party_evidence),
        )
        .route("/v1/milestones/{id}/submit", post(submit_milestone))
        .route("/v1/milestones/{id}/approve", post(approve_milestone))
        .route("/v1/milestones/{id}/instruction", post(generate_instruction))
        .route("/v1/milestones/{id}/dispute", post(raise_dispute))
        .route("/v1/milestones/{id}/resolve-dispute", post(resolve_dispute))
}

fn milestone_id(path: Result<Path<Uuid>, PathRejection>) -> Result<MilestoneId, AppError> {
    extract_path(path).map(MilestoneId::from_uuid)
}

// -- Handlers -----------------------------------------------------------------

/// GET /v1/milestones/{id}: Fetch a milestone and its escrow's version.
#[utoipa::path(
    get,
    path = "/v1/milestones/{id}",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    responses(
        (status = 200, description = "Milestone found"),
        (status = 404, description = "Milestone not found", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn get_milestone(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<MilestoneUpdate>, AppError> {
    Ok(Json(state.service.get_milestone(milestone_id(id)?)?))
}

/// POST /v1/milestones/{id}/evidence: Attach evidence by URL.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/evidence",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body = EvidenceRequest,
    responses(
        (status = 201, description = "Evidence attached"),
        (status = 403, description = "Role may not attach evidence", body = crate::error::ErrorBody),
        (status = 409, description = "Milestone no longer accepts evidence", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn attach_evidence(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<EvidenceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MilestoneUpdate>), AppError> {
    let id = milestone_id(id)?;
    let req = extract_validated_json(body)?;
    let update = state.service.attach_evidence(
        caller.actor(),
        id,
        req.version,
        &req.evidence_type,
        &req.url,
    )?;
    Ok((StatusCode::CREATED, Json(update)))
}

/// POST /v1/milestones/{id}/evidence/upload: Attach an uploaded payload.
///
/// Only the payload's digest and size are retained.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/evidence/upload",
    params(("id" = Uuid, Path, description = "Milestone ID"), UploadQuery),
    request_body(content = Vec<u8>, description = "Raw evidence payload", content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Evidence attached"),
        (status = 413, description = "Payload larger than 10 MiB"),
        (status = 422, description = "Empty payload or unknown source type", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn upload_evidence(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    payload: Bytes,
) -> Result<(StatusCode, Json<MilestoneUpdate>), AppError> {
    let id = milestone_id(id)?;
    let query = extract_query(query)?;
    let source_type: UploadSourceType = query.source_type.parse()?;
    let update = state.service.attach_uploaded_evidence(
        caller.actor(),
        id,
        query.version,
        &query.evidence_type,
        source_type,
        &payload,
    )?;
    Ok((StatusCode::CREATED, Json(update)))
}

/// POST /v1/milestones/{id}/third-party-evidence: Evidence from a non-contractor.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/third-party-evidence",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body = EvidenceRequest,
    responses(
        (status = 201, description = "Evidence attached"),
        (status = 403, description = "Contractors may not attach third-party evidence", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn attach_third_party_evidence(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<EvidenceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MilestoneUpdate>), AppError> {
    let id = milestone_id(id)?;
    let req = extract_validated_json(body)?;
    let update = state.service.attach_third_party_evidence(
        caller.actor(),
        id,
        req.version,
        &req.evidence_type,
        &req.url,
    )?;
    Ok((StatusCode::CREATED, Json(update)))
}

/// POST /v1/milestones/{id}/submit: Submit once all required evidence is present.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/submit",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body(content = VersionedRequest, description = "Optional version token"),
    responses(
        (status = 200, description = "Milestone submitted"),
        (status = 409, description = "Not PENDING or evidence missing", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn submit_milestone(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<MilestoneUpdate>, AppError> {
    let id = milestone_id(id)?;
    let req: VersionedRequest = extract_optional_json(&body)?;
    Ok(Json(state.service.submit(caller.actor(), id, req.version)?))
}

/// POST /v1/milestones/{id}/approve: Inspector approval.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/approve",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Milestone approved"),
        (status = 403, description = "Caller is not an inspector", body = crate::error::ErrorBody),
        (status = 409, description = "Milestone not submitted", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn approve_milestone(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<MilestoneUpdate>, AppError> {
    let id = milestone_id(id)?;
    let req = extract_validated_json(body)?;
    let approver_id = req
        .approver_id
        .unwrap_or_else(|| caller.actor().id.clone());
    let update = state.service.approve(
        caller.actor(),
        id,
        req.version,
        &approver_id,
        &req.signature,
    )?;
    Ok(Json(update))
}

/// POST /v1/milestones/{id}/instruction: Issue the payment instruction.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/instruction",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body(content = VersionedRequest, description = "Optional version token"),
    responses(
        (status = 201, description = "Instruction issued"),
        (status = 409, description = "Milestone not approved or already paid", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn generate_instruction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<(StatusCode, Json<PaymentInstruction>), AppError> {
    let id = milestone_id(id)?;
    let req: VersionedRequest = extract_optional_json(&body)?;
    let instruction = state
        .service
        .generate_instruction(caller.actor(), id, req.version)?;
    Ok((StatusCode::CREATED, Json(instruction)))
}

/// POST /v1/milestones/{id}/dispute: Raise a dispute.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/dispute",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body(content = DisputeRequest, description = "Optional version and reason"),
    responses(
        (status = 200, description = "Milestone disputed"),
        (status = 403, description = "Contractors may not raise disputes", body = crate::error::ErrorBody),
        (status = 409, description = "Milestone cannot be disputed", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn raise_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<MilestoneUpdate>, AppError> {
    let id = milestone_id(id)?;
    let req: DisputeRequest = extract_optional_json(&body)?;
    let update = state
        .service
        .raise_dispute(caller.actor(), id, req.version, req.reason)?;
    Ok(Json(update))
}

/// POST /v1/milestones/{id}/resolve-dispute: Resume or cancel.
#[utoipa::path(
    post,
    path = "/v1/milestones/{id}/resolve-dispute",
    params(("id" = Uuid, Path, description = "Milestone ID")),
    request_body = ResolveDisputeRequest,
    responses(
        (status = 200, description = "Dispute resolved"),
        (status = 409, description = "Milestone is not disputed", body = crate::error::ErrorBody),
    ),
    tag = "milestones"
)]
async fn resolve_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ResolveDisputeRequest>, JsonRejection>,
) -> Result<Json<MilestoneUpdate>, AppError> {
    let id = milestone_id(id)?;
    let req = extract_json(body)?;
    let update = state
        .service
        .resolve_dispute(caller.actor(), id, req.version, req.resolution)?;
    Ok(Json(update))
}
