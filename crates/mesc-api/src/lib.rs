//! # mesc-api: Axum API Service for the Milestone Escrow Stack
//!
//! A thin HTTP layer over [`mesc_escrow::EscrowService`]. Handlers parse
//! input, resolve the caller's identity, call exactly one service
//! operation, and map [`mesc_escrow::EscrowError`] to a status code. No
//! business rule lives here.
//!
//! ## API Surface
//!
//! | Prefix                          | Module                    |
//! |---------------------------------|---------------------------|
//! | `/v1/escrows/*`                 | [`routes::escrows`]       |
//! | `/v1/milestones/*`              | [`routes::milestones`]    |
//! | `/v1/payment-instructions/*`    | [`routes::payments`]      |
//! | `/v1/templates`                 | [`routes::templates`]     |
//! | `/v1/audit-log/*`               | [`routes::audit_log`]     |
//! | `/health/*`, `/metrics`         | unauthenticated probes    |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` are mounted outside the auth middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        secret: state.config.auth_token.clone(),
    };
    let metrics = ApiMetrics::new();

    let api = Router::new()
        .merge(routes::escrows::router())
        .merge(routes::milestones::router())
        .merge(routes::payments::router())
        .merge(routes::templates::router())
        .merge(routes::audit_log::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(metrics))
        .with_state(state.clone());

    let probes = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .route("/metrics", axum::routing::get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(probes).merge(api)
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 once state is built. State construction already
/// replayed and verified any durable ledger.
async fn readiness() -> &'static str {
    "ready"
}

/// Prometheus text exposition, or 503 when no recorder is installed.
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
