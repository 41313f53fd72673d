//! # Amounts in Minor Units
//!
//! Every monetary value in the protocol is an integer count of the smallest
//! currency unit (cents for USD). There is no floating-point arithmetic on
//! money anywhere in the workspace, and canonicalization rejects floats
//! outright, so an amount renders identically in every hash it feeds.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A non-negative monetary amount in minor currency units.
///
/// Deserialization rejects negative values; arithmetic is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Wrap a minor-unit count, rejecting negative values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeAmount`] if `minor_units < 0`.
    pub fn new(field: &'static str, minor_units: i64) -> Result<Self, ValidationError> {
        if minor_units < 0 {
            return Err(ValidationError::NegativeAmount {
                field,
                value: minor_units,
            });
        }
        Ok(Self(minor_units))
    }

    /// Wrap a minor-unit count that must be strictly positive.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NonPositiveAmount`] if `minor_units <= 0`.
    pub fn positive(field: &'static str, minor_units: i64) -> Result<Self, ValidationError> {
        if minor_units <= 0 {
            return Err(ValidationError::NonPositiveAmount {
                field,
                value: minor_units,
            });
        }
        Ok(Self(minor_units))
    }

    /// The raw minor-unit count.
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// True for the zero amount.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] on `i64` overflow.
    pub fn checked_add(self, other: Amount) -> Result<Amount, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(ValidationError::AmountOverflow { operation: "add" })
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount((self.0 - other.0).max(0))
    }

    /// Sum an iterator of amounts with overflow checking.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] on `i64` overflow.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(items: I) -> Result<Amount, ValidationError> {
        items
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    /// Parse a decimal major-unit string such as `"1500"`, `"1500.5"` or `"1500.25"`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for signs, more than two
    /// decimal places, non-digits, or values that overflow.
    pub fn parse_decimal(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidAmount(s.to_string());
        let trimmed = s.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || frac.len() > 2 || !all_digits(whole) || !all_digits(frac) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl TryFrom<i64> for Amount {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new("amount", value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
