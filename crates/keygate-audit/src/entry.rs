//! Audit entries and their canonical signed form.
//!
//! The canonical form of an entry is its `serde_json` serialization in
//! struct declaration order, without the `signature` field. The signed
//! line is the canonical JSON with `"signature"` spliced in as the
//! trailing field, so a log line verifies by re-deriving the canonical
//! form from the parsed entry and recomputing the MAC.

use hmac::{Hmac, Mac};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AuditError;

type HmacSha256 = Hmac<Sha256>;

/// Deployment keys shorter than this are refused outright.
pub const MIN_KEY_LENGTH: usize = 32;

/// An HMAC-SHA-256 signing key of acceptable length.
#[derive(Clone)]
pub struct HmacKey {
    bytes: Vec<u8>,
}

impl HmacKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, AuditError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LENGTH {
            return Err(AuditError::KeyTooShort {
                len: bytes.len(),
                min: MIN_KEY_LENGTH,
            });
        }
        Ok(Self { bytes })
    }

    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.bytes).expect("HMAC accepts any key length");
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKey").finish_non_exhaustive()
    }
}

/// One decision record. Field order here *is* the canonical wire order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// e.g. "credentials.allow", "credentials.deny", "request.approve"
    pub event: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub status: String,
    /// The principal the decision was made for or by.
    #[serde(default)]
    pub actor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_identity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub approved_request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub breakglass_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, actor: impl Into<String>, timestamp: Timestamp) -> Self {
        AuditEntry {
            event: event.into(),
            timestamp,
            request_id: String::new(),
            profile: String::new(),
            status: String::new(),
            actor: actor.into(),
            reason: String::new(),
            source_identity: String::new(),
            role_arn: String::new(),
            duration_secs: None,
            approved_request_id: String::new(),
            breakglass_event_id: String::new(),
            details: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_source_identity(mut self, source_identity: impl Into<String>) -> Self {
        self.source_identity = source_identity.into();
        self
    }

    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = role_arn.into();
        self
    }

    pub fn with_duration_secs(mut self, duration_secs: i64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    pub fn with_approved_request_id(mut self, id: impl Into<String>) -> Self {
        self.approved_request_id = id.into();
        self
    }

    pub fn with_breakglass_event_id(mut self, id: impl Into<String>) -> Self {
        self.breakglass_event_id = id.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The canonical JSON this entry is signed over.
    pub fn canonical_json(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Produce the signed log line: canonical JSON plus the trailing
    /// `signature` field.
    pub fn signed_line(&self, key: &HmacKey) -> Result<String, AuditError> {
        let canonical = self.canonical_json()?;
        let signature = key.sign(canonical.as_bytes());
        // Splice the signature in before the closing brace so the field
        // order of the canonical form is preserved verbatim.
        let body = &canonical[..canonical.len() - 1];
        Ok(format!("{body},\"signature\":\"{signature}\"}}"))
    }
}
