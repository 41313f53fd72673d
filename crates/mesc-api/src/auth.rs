//! # Authentication Middleware
//!
//! Bearer tokens carry the caller's role and actor id:
//!
//! ```text
//! Bearer {role}:{actor_id}:{secret}   (secret configured)
//! Bearer {role}:{actor_id}            (development mode, no secret)
//! ```
//!
//! The role is one of `agent`, `contractor`, `inspector`, `custodian`.
//!
//! ## CallerIdentity
//!
//! A request with a valid token gets a [`CallerIdentity`] in its extensions.
//! A request without an `Authorization` header passes through anonymously;
//! read handlers serve it, while every mutating handler extracts
//! `CallerIdentity` and so rejects it with 401. A header that is present but
//! invalid is rejected by the middleware itself.
//!
//! Permission checks are not done here. The escrow core authorizes every
//! operation against its role table.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mesc_escrow::{Actor, Role};
use subtle::ConstantTimeEq;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller, available to handlers via Axum's
/// `FromRequestParts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub Actor);

impl CallerIdentity {
    /// The escrow-core actor for this caller.
    pub fn actor(&self) -> &Actor {
        &self.0
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("this operation requires a bearer token".into()))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the secret.
#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of secrets. Lengths that differ still cost one
/// comparison.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token into an identity.
///
/// With `expected_secret` set the token must be `{role}:{actor_id}:{secret}`.
/// Without it (development mode) `{role}:{actor_id}` is accepted and a
/// trailing secret segment is ignored.
pub fn parse_bearer_token(
    provided: &str,
    expected_secret: Option<&str>,
) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    let (role_str, actor_id) = match (parts.as_slice(), expected_secret) {
        ([role, actor, secret], Some(expected)) => {
            if !constant_time_token_eq(secret, expected) {
                return Err("invalid bearer token".into());
            }
            (*role, *actor)
        }
        ([_, _], Some(_)) => return Err("bearer token is missing its secret".into()),
        ([role, actor], None) | ([role, actor, _], None) => (*role, *actor),
        _ => return Err("invalid token format, expected {role}:{actor_id}:{secret}".into()),
    };

    let role: Role = role_str.parse().map_err(|e: mesc_escrow::UnknownRole| e.to_string())?;
    let actor_id = actor_id.trim();
    if actor_id.is_empty() {
        return Err("bearer token has an empty actor id".into());
    }
    Ok(CallerIdentity(Actor::new(actor_id, role)))
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the Bearer token from the Authorization header, if any, and
/// inject the resulting [`CallerIdentity`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let secret = request
        .extensions()
        .get::<AuthConfig>()
        .and_then(|c| c.secret.clone());

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map(str::to_string));

    match auth_header {
        None => next.run(request).await,
        Some(Ok(value)) => match value.strip_prefix("Bearer ") {
            Some(token) => match parse_bearer_token(token.trim(), secret.as_deref()) {
                Ok(identity) => {
                    tracing::debug!(actor = %identity.0.id, role = %identity.0.role, "caller authenticated");
                    request.extensions_mut().insert(identity);
                    next.run(request).await
                }
                Err(msg) => {
                    tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                    unauthorized_response(&msg)
                }
            },
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                unauthorized_response("authorization header must use Bearer scheme")
            }
        },
        Some(Err(_)) => {
            tracing::warn!("authentication failed: unreadable authorization header");
            unauthorized_response("authorization header is not valid ASCII")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
