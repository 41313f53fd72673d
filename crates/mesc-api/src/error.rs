//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`EscrowError`] kinds to HTTP status codes and returns JSON bodies
//! of the form `{"error": {"code", "message", "details"?}}`. Internal error
//! details are never exposed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mesc_escrow::{ErrorKind, EscrowError};
use mesc_ledger::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VERSION_CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional context, present only for some client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body or query could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Role not permitted for the action (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Status does not allow the action (409).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Stale version token (409). Carries the expected and current versions.
    #[error("version conflict: {message}")]
    VersionConflict {
        message: String,
        expected: u64,
        actual: u64,
    },

    /// The audit chain failed verification (500).
    #[error("tamper detected at index {at_index}")]
    TamperDetected { at_index: usize },

    /// Durable storage could not be written (503).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::VersionConflict { .. } => (StatusCode::CONFLICT, "VERSION_CONFLICT"),
            Self::TamperDetected { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "TAMPER_DETECTED"),
            Self::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (message, details) = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                ("An internal error occurred".to_string(), None)
            }
            Self::StorageUnavailable(msg) => {
                tracing::error!(error = %msg, "ledger storage unavailable");
                ("Audit storage is unavailable; no change was recorded".to_string(), None)
            }
            Self::TamperDetected { at_index } => {
                tracing::warn!(at_index, "audit chain verification failed");
                (
                    "Audit chain verification failed".to_string(),
                    Some(serde_json::json!({ "at_index": at_index })),
                )
            }
            Self::VersionConflict {
                message,
                expected,
                actual,
            } => (
                message.clone(),
                Some(serde_json::json!({ "expected": expected, "actual": actual })),
            ),
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::InvalidTransition(msg) => (msg.clone(), None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        let message = err.to_string();
        match (err.kind(), err) {
            (
                _,
                EscrowError::VersionConflict {
                    expected, actual, ..
                },
            ) => Self::VersionConflict {
                message,
                expected,
                actual,
            },
            (_, EscrowError::Ledger(LedgerError::TamperDetected { at_index, .. })) => {
                Self::TamperDetected { at_index }
            }
            (ErrorKind::Forbidden, _) => Self::Forbidden(message),
            (ErrorKind::InvalidTransition, _) => Self::InvalidTransition(message),
            (ErrorKind::Validation, _) => Self::Validation(message),
            (ErrorKind::NotFound, _) => Self::NotFound(message),
            (ErrorKind::StorageUnavailable, _) => Self::StorageUnavailable(message),
            (ErrorKind::VersionConflict | ErrorKind::TamperDetected, _) => Self::Internal(message),
        }
    }
}

impl From<mesc_core::ValidationError> for AppError {
    fn from(err: mesc_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        EscrowError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use mesc_core::EscrowId;
    use mesc_escrow::{Action, Role};

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn forbidden_maps_to_403() {
        let err: AppError = EscrowError::Forbidden {
            role: Role::Contractor,
            action: Action::ApproveMilestone,
        }
        .into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error.code, "FORBIDDEN");
        assert!(body.error.message.contains("CONTRACTOR"));
    }

    #[tokio::test]
    async fn version_conflict_carries_versions() {
        let err: AppError = EscrowError::VersionConflict {
            escrow_id: EscrowId::new(),
            expected: 1,
            actual: 2,
        }
        .into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error.code, "VERSION_CONFLICT");
        let details = body.error.details.unwrap();
        assert_eq!(details["expected"], 1);
        assert_eq!(details["actual"], 2);
    }

    #[tokio::test]
    async fn template_over_allocation_is_a_validation_error() {
        let err: AppError = EscrowError::TemplateOverAllocation {
            template: "t".into(),
            total_percentage: 120,
        }
        .into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error.code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn tamper_detected_maps_to_500_with_index() {
        let err: AppError = LedgerError::TamperDetected {
            at_index: 3,
            expected: "a".into(),
            actual: "b".into(),
        }
        .into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "TAMPER_DETECTED");
        assert_eq!(body.error.details.unwrap()["at_index"], 3);
    }

    #[tokio::test]
    async fn storage_failure_maps_to_503_and_hides_cause() {
        let err: AppError = LedgerError::StorageUnavailable("disk full at /var/x".into()).into();
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error.code, "STORAGE_UNAVAILABLE");
        assert!(!body.error.message.contains("/var/x"));
    }

    #[tokio::test]
    async fn internal_error_hides_message() {
        let (status, body) = response_parts(AppError::Internal("secret detail".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.code, "INTERNAL_ERROR");
        assert!(!body.error.message.contains("secret"));
    }

    #[tokio::test]
    async fn not_found_and_bad_request_codes() {
        let (status, body) = response_parts(AppError::NotFound("escrow x".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.code, "NOT_FOUND");

        let (status, body) = response_parts(AppError::BadRequest("bad json".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.code, "BAD_REQUEST");
        assert!(body.error.details.is_none());
    }
}
