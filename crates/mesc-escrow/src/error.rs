//! # Escrow Error Types
//!
//! Business-rule violations are typed results. Each variant maps to exactly
//! one [`ErrorKind`], which is what the HTTP layer translates to a status
//! code.

use mesc_core::{EscrowId, ValidationError};
use mesc_ledger::LedgerError;
use serde::Serialize;
use thiserror::Error;

use crate::policy::{Action, Role};

/// The seven externally visible error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Role not permitted for the action.
    Forbidden,
    /// Entity status does not allow the action.
    InvalidTransition,
    /// Stale optimistic-concurrency token.
    VersionConflict,
    /// Malformed or out-of-range input.
    Validation,
    /// Unknown entity.
    NotFound,
    /// The audit chain failed verification.
    TamperDetected,
    /// Durable storage could not be written.
    StorageUnavailable,
}

/// Errors raised by escrow operations.
#[derive(Error, Debug)]
pub enum EscrowError {
    /// The actor's role is not permitted to perform the action.
    #[error("role {role} is not permitted to {action}")]
    Forbidden {
        /// The caller's role.
        role: Role,
        /// The attempted action.
        action: Action,
    },

    /// The entity is not in a status from which the action is legal.
    #[error("cannot {action} from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Status the action would have produced.
        to: String,
        /// The attempted action.
        action: Action,
        /// Why the guard rejected it.
        reason: String,
    },

    /// The caller's version token is stale.
    #[error("version conflict on {escrow_id}: expected {expected}, current {actual}")]
    VersionConflict {
        /// The escrow being mutated.
        escrow_id: EscrowId,
        /// Version the caller supplied.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Template percentages sum past 100.
    #[error("template {template} allocates {total_percentage}% (maximum 100%)")]
    TemplateOverAllocation {
        /// Template name.
        template: String,
        /// Sum of the template's percentages.
        total_percentage: u32,
    },

    /// The referenced entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind (`escrow`, `milestone`, ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The audit ledger refused the append.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EscrowError {
    /// Shorthand for an [`EscrowError::InvalidTransition`].
    pub(crate) fn transition(
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
        action: Action,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            action,
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`EscrowError::NotFound`].
    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// The externally visible class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::Validation(_) | Self::TemplateOverAllocation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ledger(LedgerError::TamperDetected { .. }) => ErrorKind::TamperDetected,
            // A payload that cannot be canonicalized cannot be persisted either.
            Self::Ledger(
                LedgerError::StorageUnavailable(_)
                | LedgerError::Malformed { .. }
                | LedgerError::Canonicalization(_),
            ) => ErrorKind::StorageUnavailable,
        }
    }
}

impl From<ValidationError> for EscrowError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_every_variant() {
        let cases = [
            (
                EscrowError::Forbidden {
                    role: Role::Contractor,
                    action: Action::ApproveMilestone,
                },
                ErrorKind::Forbidden,
            ),
            (
                EscrowError::transition("PENDING", "APPROVED", Action::ApproveMilestone, "not submitted"),
                ErrorKind::InvalidTransition,
            ),
            (
                EscrowError::VersionConflict {
                    escrow_id: EscrowId::new(),
                    expected: 0,
                    actual: 1,
                },
                ErrorKind::VersionConflict,
            ),
            (EscrowError::Validation("x".into()), ErrorKind::Validation),
            (
                EscrowError::TemplateOverAllocation {
                    template: "t".into(),
                    total_percentage: 110,
                },
                ErrorKind::Validation,
            ),
            (EscrowError::not_found("escrow", "e1"), ErrorKind::NotFound),
            (
                LedgerError::TamperDetected {
                    at_index: 0,
                    expected: "a".into(),
                    actual: "b".into(),
                }
                .into(),
                ErrorKind::TamperDetected,
            ),
            (
                LedgerError::StorageUnavailable("gone".into()).into(),
                ErrorKind::StorageUnavailable,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn forbidden_message_names_role_and_action() {
        let err = EscrowError::Forbidden {
            role: Role::Contractor,
            action: Action::ApproveMilestone,
        };
        assert_eq!(err.to_string(), "role CONTRACTOR is not permitted to APPROVE_MILESTONE");
    }

    #[test]
    fn validation_errors_convert() {
        let err: EscrowError = ValidationError::EmptyField { field: "name" }.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("name must be non-empty"));
    }
}
