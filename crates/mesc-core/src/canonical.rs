//! # Canonical Serialization
//!
//! `CanonicalBytes` is the only input accepted by the digest functions. It is
//! produced by serializing a value to JSON, rejecting any floating-point
//! number, and re-serializing with RFC 8785 (JCS) rules: sorted object keys,
//! compact separators, shortest integer form.
//!
//! ## Security Invariant
//!
//! The inner `Vec<u8>` is private and `CanonicalBytes::new()` is the only
//! constructor. Agreement hashes and ledger entry hashes therefore cannot be
//! computed over a non-canonical encoding: two logically identical payloads
//! always produce the same bytes, whatever field order the caller used.
//!
//! Floats are rejected because a monetary value that round-trips through an
//! IEEE-754 double can change its decimal rendering. Amounts are integers in
//! minor units (see [`crate::Amount`]).

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalizationError;

/// Bytes produced exclusively by JCS canonicalization of a float-free value.
///
/// # Invariants
///
/// - Object keys are sorted, separators are compact (RFC 8785).
/// - The encoded value contains no floating-point numbers.
/// - The bytes are valid UTF-8 JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Canonicalize any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalizationError::FloatRejected`] if the value contains a
    /// non-integer number, or [`CanonicalizationError::SerializationFailed`] if
    /// serialization itself fails.
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        reject_floats(&value)?;
        let encoded = serde_jcs::to_string(&value)?;
        Ok(Self(encoded.into_bytes()))
    }

    /// Access the canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the canonical byte sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the canonical byte sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the canonical encoding as a string slice.
    ///
    /// Always succeeds in practice: JCS output is UTF-8 by construction.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Walk the JSON tree and fail on the first non-integer number.
fn reject_floats(value: &Value) -> Result<(), CanonicalizationError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(())
            } else {
                Err(CanonicalizationError::FloatRejected(
                    n.as_f64().unwrap_or(f64::NAN),
                ))
            }
        }
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        Value::Object(map) => map.values().try_for_each(reject_floats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_separators_compact() {
        let terms = json!({
            "provider_id": "pat",
            "buyer_id": "bob",
            "total_amount": 500000
        });
        let cb = CanonicalBytes::new(&terms).unwrap();
        assert_eq!(
            cb.as_str().unwrap(),
            r#"{"buyer_id":"bob","provider_id":"pat","total_amount":500000}"#
        );
    }

    #[test]
    fn nested_objects_are_sorted() {
        let data = json!({
            "milestones": [{"name": "Framing", "amount": 2500}],
            "agreement": {"v": 1, "hash": "abc"}
        });
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(
            cb.as_str().unwrap(),
            r#"{"agreement":{"hash":"abc","v":1},"milestones":[{"amount":2500,"name":"Framing"}]}"#
        );
    }

    #[test]
    fn field_order_does_not_change_bytes() {
        let a = json!({"entity_id": "e1", "event_type": "FUNDS_CONFIRMED"});
        let b = json!({"event_type": "FUNDS_CONFIRMED", "entity_id": "e1"});
        assert_eq!(
            CanonicalBytes::new(&a).unwrap(),
            CanonicalBytes::new(&b).unwrap()
        );
    }

    #[test]
    fn float_amount_rejected() {
        let data = json!({"amount": 1500.25});
        match CanonicalBytes::new(&data) {
            Err(CanonicalizationError::FloatRejected(f)) => assert_eq!(f, 1500.25),
            other => panic!("expected FloatRejected, got {other:?}"),
        }
    }

    #[test]
    fn deeply_nested_float_rejected() {
        let data = json!({"event_data": {"milestones": [{"pct": 12.5}]}});
        assert!(CanonicalBytes::new(&data).is_err());
    }

    #[test]
    fn negative_and_large_integers_accepted() {
        let data = json!({"delta": -42, "total": 9_999_999_999i64});
        let cb = CanonicalBytes::new(&data).unwrap();
        assert_eq!(
            cb.as_str().unwrap(),
            r#"{"delta":-42,"total":9999999999}"#
        );
    }

    #[test]
    fn null_bool_and_unicode_pass_through() {
        let data = json!({"memo": "Fundaci\u{00f3}n", "disputed": false, "reason": null});
        let cb = CanonicalBytes::new(&data).unwrap();
        let s = cb.as_str().unwrap();
        assert!(s.contains('\u{00f3}'));
        assert!(s.contains(r#""disputed":false"#));
        assert!(s.contains(r#""reason":null"#));
    }

    #[test]
    fn empty_containers() {
        assert_eq!(CanonicalBytes::new(&json!({})).unwrap().as_bytes(), b"{}");
        assert_eq!(CanonicalBytes::new(&json!([])).unwrap().as_bytes(), b"[]");
        assert!(!CanonicalBytes::new(&json!({})).unwrap().is_empty());
    }
}
