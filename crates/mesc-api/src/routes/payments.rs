//! # Payment Instruction Routes
//!
//! Custodians move an issued instruction from INSTRUCTED to SENT to
//! SETTLED. Status updates are recorded on the audit ledger but do not bump
//! the escrow version.

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mesc_core::InstructionId;
use mesc_escrow::PaymentInstruction;
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::extract_path;
use crate::state::AppState;

/// Build the payment instruction router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/payment-instructions/{id}", get(get_instruction))
        .route("/v1/payment-instructions/{id}/mark-sent", post(mark_sent))
        .route("/v1/payment-instructions/{id}/mark-settled", post(mark_settled))
}

fn instruction_id(path: Result<Path<Uuid>, PathRejection>) -> Result<InstructionId, AppError> {
    extract_path(path).map(InstructionId::from_uuid)
}

/// GET /v1/payment-instructions/{id}: Fetch an instruction.
#[utoipa::path(
    get,
    path = "/v1/payment-instructions/{id}",
    params(("id" = Uuid, Path, description = "Payment instruction ID")),
    responses(
        (status = 200, description = "Instruction found"),
        (status = 404, description = "Instruction not found", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
async fn get_instruction(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<PaymentInstruction>, AppError> {
    Ok(Json(state.service.get_instruction(instruction_id(id)?)?))
}

/// POST /v1/payment-instructions/{id}/mark-sent: INSTRUCTED → SENT.
#[utoipa::path(
    post,
    path = "/v1/payment-instructions/{id}/mark-sent",
    params(("id" = Uuid, Path, description = "Payment instruction ID")),
    responses(
        (status = 200, description = "Instruction marked sent"),
        (status = 403, description = "Caller is not a custodian", body = crate::error::ErrorBody),
        (status = 409, description = "Instruction is not INSTRUCTED", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
async fn mark_sent(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<PaymentInstruction>, AppError> {
    let id = instruction_id(id)?;
    Ok(Json(state.service.mark_sent(caller.actor(), id)?))
}

/// POST /v1/payment-instructions/{id}/mark-settled: SENT → SETTLED.
#[utoipa::path(
    post,
    path = "/v1/payment-instructions/{id}/mark-settled",
    params(("id" = Uuid, Path, description = "Payment instruction ID")),
    responses(
        (status = 200, description = "Instruction marked settled"),
        (status = 403, description = "Caller is not a custodian", body = crate::error::ErrorBody),
        (status = 409, description = "Instruction is not SENT", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
async fn mark_settled(
    State(state): State<AppState>,
    caller: CallerIdentity,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<PaymentInstruction>, AppError> {
    let id = instruction_id(id)?;
    Ok(Json(state.service.mark_settled(caller.actor(), id)?))
}
