//! # Domain Identity Newtypes
//!
//! Identifiers for every addressable thing in the escrow protocol. You cannot
//! pass a `MilestoneId` where an `EscrowId` is expected.
//!
//! ## Security Invariant
//!
//! Type-level separation of identifier namespaces prevents an API caller
//! from addressing a milestone operation at an escrow (or vice versa) by
//! substituting one UUID for another.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Declares a UUID-backed identifier with a display prefix.
macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for an escrow agreement.
    EscrowId,
    "escrow"
);
uuid_identifier!(
    /// Unique identifier for a milestone within an escrow.
    MilestoneId,
    "milestone"
);
uuid_identifier!(
    /// Unique identifier for a piece of attached evidence.
    EvidenceId,
    "evidence"
);
uuid_identifier!(
    /// Unique identifier for a generated payment instruction.
    InstructionId,
    "instruction"
);
uuid_identifier!(
    /// Unique identifier for a milestone template.
    TemplateId,
    "template"
);

/// Opaque identifier of a party to an agreement (buyer, provider, custodian).
///
/// Parties are identified by whatever the credential layer issues; the only
/// requirement is a non-empty, trimmed string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    /// Validate and wrap a party identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] if the trimmed input is empty.
    pub fn new(field: &'static str, raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyField { field });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
