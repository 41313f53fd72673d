//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document served
//! at `/openapi.json`. Request bodies, query parameters, and error bodies
//! carry schemas; entity responses are described but not schematized.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Milestone Escrow API",
        version = "0.1.0",
        description = "Milestone-based escrow: funding, evidence, approval, payment instructions, and a hash-chained audit log.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        // Escrows
        crate::routes::escrows::create_escrow,
        crate::routes::escrows::list_escrows,
        crate::routes::escrows::get_escrow,
        crate::routes::escrows::confirm_funds,
        crate::routes::escrows::change_budget,
        crate::routes::escrows::apply_template,
        crate::routes::escrows::list_payment_instructions,
        // Milestones
        crate::routes::milestones::get_milestone,
        crate::routes::milestones::attach_evidence,
        crate::routes::milestones::upload_evidence,
        crate::routes::milestones::attach_third_party_evidence,
        crate::routes::milestones::submit_milestone,
        crate::routes::milestones::approve_milestone,
        crate::routes::milestones::generate_instruction,
        crate::routes::milestones::raise_dispute,
        crate::routes::milestones::resolve_dispute,
        // Payments
        crate::routes::payments::get_instruction,
        crate::routes::payments::mark_sent,
        crate::routes::payments::mark_settled,
        // Templates
        crate::routes::templates::list_templates,
        // Audit log
        crate::routes::audit_log::list_entries,
        crate::routes::audit_log::entity_entries,
        crate::routes::audit_log::verify_chain,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::routes::escrows::CreateEscrowRequest,
        crate::routes::escrows::MilestoneInput,
        crate::routes::escrows::ConfirmFundsRequest,
        crate::routes::escrows::ChangeBudgetRequest,
        crate::routes::escrows::ApplyTemplateRequest,
        crate::routes::milestones::EvidenceRequest,
        crate::routes::milestones::VersionedRequest,
        crate::routes::milestones::ApproveRequest,
        crate::routes::milestones::DisputeRequest,
        crate::routes::milestones::ResolveDisputeRequest,
        crate::routes::audit_log::AuditLogPage,
    )),
    tags(
        (name = "escrows", description = "Escrow lifecycle"),
        (name = "milestones", description = "Milestone evidence, approval, and disputes"),
        (name = "payments", description = "Payment instruction status"),
        (name = "templates", description = "Milestone templates"),
        (name = "audit", description = "Hash-chained audit log"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
