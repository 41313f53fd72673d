//! # Error Types
//!
//! Foundational errors shared by every crate in the workspace. Domain crates
//! wrap these in their own `thiserror` enums (`LedgerError`, `EscrowError`).
//!
//! Validation errors carry the offending input so an operator can see what was
//! rejected without reaching for the logs.

use thiserror::Error;

/// Top-level error for the foundational layer.
#[derive(Error, Debug)]
pub enum MescError {
    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// A domain primitive failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations; use integer minor units: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Validation errors for domain primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field was empty or whitespace.
    #[error("{field} must be non-empty")]
    EmptyField {
        /// The field that was empty.
        field: &'static str,
    },

    /// An amount that must be non-negative was negative.
    #[error("{field} must not be negative, got {value}")]
    NegativeAmount {
        /// The field carrying the amount.
        field: &'static str,
        /// The rejected value in minor units.
        value: i64,
    },

    /// An amount that must be strictly positive was zero or negative.
    #[error("{field} must be greater than zero, got {value}")]
    NonPositiveAmount {
        /// The field carrying the amount.
        field: &'static str,
        /// The rejected value in minor units.
        value: i64,
    },

    /// Arithmetic on amounts overflowed `i64`.
    #[error("amount arithmetic overflowed in {operation}")]
    AmountOverflow {
        /// The operation that overflowed.
        operation: &'static str,
    },

    /// A decimal amount string could not be parsed.
    #[error("invalid amount \"{0}\" (expected digits with at most two decimal places)")]
    InvalidAmount(String),

    /// A value is not one of the accepted names for an enumerated field.
    #[error("{field} \"{value}\" is not one of: {expected}")]
    UnknownVariant {
        /// The field being parsed.
        field: &'static str,
        /// The rejected input.
        value: String,
        /// The accepted names.
        expected: &'static str,
    },

    /// Digest string is malformed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Timestamp string is not valid UTC ISO 8601.
    #[error("invalid timestamp: \"{value}\" ({reason})")]
    InvalidTimestamp {
        /// The string that failed to parse.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_rejection_mentions_minor_units() {
        let msg = CanonicalizationError::FloatRejected(12.5).to_string();
        assert!(msg.contains("float values are not permitted"));
        assert!(msg.contains("12.5"));
    }

    #[test]
    fn validation_errors_carry_field_names() {
        let err = ValidationError::EmptyField { field: "buyer_id" };
        assert_eq!(err.to_string(), "buyer_id must be non-empty");

        let err = ValidationError::NonPositiveAmount {
            field: "amount_delta",
            value: -5,
        };
        assert!(err.to_string().contains("amount_delta"));
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn mesc_error_wraps_validation() {
        let err: MescError = ValidationError::InvalidAmount("1.234".into()).into();
        assert!(err.to_string().starts_with("validation error"));
        assert!(err.to_string().contains("1.234"));
    }
}
