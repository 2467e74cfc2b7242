use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!((self, to), (Active, Revoked) | (Active, Expired))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
            SessionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per issued credential set. The revocation plane flips a row to
/// Revoked; the broker consults the row before issuing again for the same
/// lineage, so revocation takes effect on the next issuance or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSession {
    pub id: String,
    pub user: String,
    pub profile: String,
    #[serde(default)]
    pub server_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub source_identity: String,
    pub status: SessionStatus,
    pub started_at: Timestamp,
    pub last_access_at: Timestamp,
    /// Optimistic-lock token; bumped on every write.
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    pub request_count: u64,
    #[serde(default)]
    pub revoked_by: String,
    #[serde(default)]
    pub revoked_reason: String,
}

impl ServerSession {
    pub fn new(
        id: impl Into<String>,
        user: impl Into<String>,
        profile: impl Into<String>,
        source_identity: impl Into<String>,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        let user = user.into();
        let profile = profile.into();

        ids::validate(&id)?;
        if user.is_empty() {
            return Err(CoreError::validation("user is empty"));
        }
        if profile.is_empty() {
            return Err(CoreError::validation("profile is empty"));
        }

        Ok(ServerSession {
            id,
            user,
            profile,
            server_instance_id: String::new(),
            device_id: None,
            source_identity: source_identity.into(),
            status: SessionStatus::Active,
            started_at: now,
            last_access_at: now,
            updated_at: now,
            expires_at,
            request_count: 0,
            revoked_by: String::new(),
            revoked_reason: String::new(),
        })
    }

    pub fn with_server_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.server_instance_id = instance_id.into();
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Result<Self, CoreError> {
        let device_id = device_id.into();
        ids::validate_device(&device_id)?;
        self.device_id = Some(device_id);
        Ok(self)
    }

    /// Record an access. `last_access_at` never moves backwards and
    /// `request_count` only grows.
    pub fn touch(&mut self, now: Timestamp) {
        if now > self.last_access_at {
            self.last_access_at = now;
        }
        self.request_count += 1;
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == SessionStatus::Active && self.expires_at <= now
    }
}
