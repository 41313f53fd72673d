//! # Evidence
//!
//! Typed references attesting to completed work. Evidence is immutable once
//! attached and is never removed from a milestone.
//!
//! Uploaded payloads are opaque to the core: only their SHA-256 digest, size,
//! and a content-addressed reference (`upload://sha256/<hex>`) are kept.
//! Storing the bytes themselves is the job of an external blob store.

use mesc_core::{ContentDigest, EvidenceId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::policy::{Actor, Role};

/// Evidence category name, normalized to trimmed upper case
/// (`"photo "` and `"PHOTO"` are the same type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvidenceType(String);

impl EvidenceType {
    /// Evidence type used for budget-change milestones when none is given.
    pub const DEFAULT_BUDGET_CHANGE: &'static str = "INVOICE";

    /// Normalize and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] for blank input.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let normalized = raw.as_ref().trim().to_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyField {
                field: "evidence_type",
            });
        }
        Ok(Self(normalized))
    }

    /// The normalized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EvidenceType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EvidenceType> for String {
    fn from(value: EvidenceType) -> Self {
        value.0
    }
}

impl std::fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the evidence reached the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceSource {
    /// An external URL supplied by the caller.
    Link,
    /// A payload uploaded through the API.
    Upload,
}

/// Who stands behind the evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceOrigin {
    /// Attached by the contractor about their own work.
    SelfAttested,
    /// Attached by anyone other than the contractor.
    ThirdParty,
}

impl EvidenceOrigin {
    /// Origin implied by the attaching role.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Contractor => Self::SelfAttested,
            Role::Agent | Role::Inspector | Role::Custodian => Self::ThirdParty,
        }
    }
}

/// Media class of an uploaded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadSourceType {
    /// Site photograph.
    Photo,
    /// PDF document (permit, invoice, report).
    Pdf,
    /// Electronically signed document.
    Esign,
    /// A captured URL snapshot.
    Url,
}

impl std::str::FromStr for UploadSourceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PHOTO" => Ok(Self::Photo),
            "PDF" => Ok(Self::Pdf),
            "ESIGN" => Ok(Self::Esign),
            "URL" => Ok(Self::Url),
            _ => Err(ValidationError::UnknownVariant {
                field: "source_type",
                value: s.to_string(),
                expected: "PHOTO, PDF, ESIGN, URL",
            }),
        }
    }
}

/// One piece of evidence attached to a milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Identifier.
    pub id: EvidenceId,
    /// Category this evidence satisfies.
    pub evidence_type: EvidenceType,
    /// Opaque reference: an external URL or `upload://sha256/<hex>`.
    pub url: String,
    /// Link or upload.
    pub source: EvidenceSource,
    /// Self-attested or third-party.
    pub origin: EvidenceOrigin,
    /// Actor who attached it.
    pub submitted_by: String,
    /// Role of that actor.
    pub submitted_by_role: Role,
    /// When it was attached.
    pub timestamp: Timestamp,
    /// Digest of the uploaded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// Size of the uploaded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Media class of the uploaded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<UploadSourceType>,
}

impl Evidence {
    /// Evidence pointing at an external URL.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] for a blank URL.
    pub fn link(
        evidence_type: EvidenceType,
        url: &str,
        actor: &Actor,
        origin: EvidenceOrigin,
    ) -> Result<Self, ValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyField { field: "url" });
        }
        Ok(Self {
            id: EvidenceId::new(),
            evidence_type,
            url: url.to_string(),
            source: EvidenceSource::Link,
            origin,
            submitted_by: actor.id.clone(),
            submitted_by_role: actor.role,
            timestamp: Timestamp::now(),
            content_digest: None,
            size_bytes: None,
            source_type: None,
        })
    }

    /// Evidence for an uploaded payload. The bytes are hashed and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyField`] for an empty payload.
    pub fn upload(
        evidence_type: EvidenceType,
        source_type: UploadSourceType,
        payload: &[u8],
        actor: &Actor,
        origin: EvidenceOrigin,
    ) -> Result<Self, ValidationError> {
        if payload.is_empty() {
            return Err(ValidationError::EmptyField { field: "payload" });
        }
        let digest = ContentDigest::sha256(Sha256::digest(payload).into());
        let hex = digest.to_hex();
        Ok(Self {
            id: EvidenceId::new(),
            evidence_type,
            url: format!("upload://sha256/{hex}"),
            source: EvidenceSource::Upload,
            origin,
            submitted_by: actor.id.clone(),
            submitted_by_role: actor.role,
            timestamp: Timestamp::now(),
            content_digest: Some(digest.to_string()),
            size_bytes: Some(payload.len() as u64),
            source_type: Some(source_type),
        })
    }
}
