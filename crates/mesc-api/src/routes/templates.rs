//! # Template Routes
//!
//! Read-only view of the milestone template catalog.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use mesc_escrow::MilestoneTemplate;

use crate::state::AppState;

/// Build the template router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/templates", get(list_templates))
}

/// GET /v1/templates: All templates in registration order.
#[utoipa::path(
    get,
    path = "/v1/templates",
    responses((status = 200, description = "Template catalog")),
    tag = "templates"
)]
async fn list_templates(State(state): State<AppState>) -> Json<Vec<MilestoneTemplate>> {
    Json(state.service.list_templates())
}
