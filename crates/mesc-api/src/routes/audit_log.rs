//! # Audit Log Routes
//!
//! Read access to the hash-chained ledger: the full log with filters, the
//! per-entity view, and on-demand chain verification.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use mesc_ledger::{AuditLogEntry, ChainReport, EventType, LedgerFilter};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;
use crate::extractors::{extract_path, extract_query};
use crate::routes::escrows::ListQuery;
use crate::state::AppState;

/// Filters and paging for the audit log.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    /// Escrow UUID the entries belong to.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Event type, e.g. `MILESTONE_APPROVED`.
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditLogQuery {
    fn filter(&self) -> Result<LedgerFilter, AppError> {
        let mut filter = LedgerFilter::all();
        if let Some(entity) = &self.entity_id {
            filter = filter.entity(entity.trim());
        }
        if let Some(raw) = &self.event_type {
            let event_type: EventType = raw
                .parse()
                .map_err(|e: mesc_ledger::UnknownEventType| AppError::Validation(e.to_string()))?;
            filter = filter.event_type(event_type);
        }
        if let Some(actor) = &self.actor_id {
            filter = filter.actor(actor.trim());
        }
        Ok(filter)
    }
}

/// One page of audit entries, in ledger order.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogPage {
    /// Entries matching the filter, before paging.
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<AuditLogEntry>,
}

/// Build the audit log router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit-log", get(list_entries))
        .route("/v1/audit-log/entities/{entity_id}", get(entity_entries))
        .route("/v1/audit-log/verify", get(verify_chain))
}

/// GET /v1/audit-log: Full or filtered ledger.
#[utoipa::path(
    get,
    path = "/v1/audit-log",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Page of audit entries", body = AuditLogPage),
        (status = 422, description = "Unknown event type", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
async fn list_entries(
    State(state): State<AppState>,
    query: Result<Query<AuditLogQuery>, QueryRejection>,
) -> Result<Json<AuditLogPage>, AppError> {
    let query = extract_query(query)?;
    let filter = query.filter()?;
    let (skip, limit) = ListQuery {
        skip: query.skip,
        limit: query.limit,
    }
    .window();
    let view = state.service.ledger().list(filter);
    Ok(Json(AuditLogPage {
        total: view.count(),
        skip,
        limit,
        entries: view.page(skip, limit),
    }))
}

/// GET /v1/audit-log/entities/{entity_id}: Every entry for one escrow.
#[utoipa::path(
    get,
    path = "/v1/audit-log/entities/{entity_id}",
    params(("entity_id" = String, Path, description = "Escrow UUID")),
    responses((status = 200, description = "Entries for the entity, in ledger order")),
    tag = "audit"
)]
async fn entity_entries(
    State(state): State<AppState>,
    entity_id: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let entity_id = extract_path(entity_id)?;
    let view = state.service.ledger().list(LedgerFilter::all().entity(entity_id));
    Ok(Json(view.to_vec()))
}

/// GET /v1/audit-log/verify: Recompute the chain from genesis.
#[utoipa::path(
    get,
    path = "/v1/audit-log/verify",
    responses(
        (status = 200, description = "Chain intact"),
        (status = 500, description = "Tamper detected", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
async fn verify_chain(State(state): State<AppState>) -> Result<Json<ChainReport>, AppError> {
    Ok(Json(state.service.verify_ledger()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_is_a_validation_error() {
        let query = AuditLogQuery {
            event_type: Some("NOT_AN_EVENT".into()),
            ..AuditLogQuery::default()
        };
        assert!(matches!(query.filter(), Err(AppError::Validation(_))));
    }

    #[test]
    fn known_event_type_parses() {
        let query = AuditLogQuery {
            event_type: Some("ESCROW_CREATED".into()),
            ..AuditLogQuery::default()
        };
        assert!(query.filter().is_ok());
    }
}
