use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids;

/// Hard ceiling on emergency access duration.
pub const MAX_DURATION: SignedDuration = SignedDuration::from_hours(4);

/// Structured justification categories for emergency access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Incident,
    Maintenance,
    Security,
    Recovery,
    Other,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 5] = [
        ReasonCode::Incident,
        ReasonCode::Maintenance,
        ReasonCode::Security,
        ReasonCode::Recovery,
        ReasonCode::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Incident => "incident",
            ReasonCode::Maintenance => "maintenance",
            ReasonCode::Security => "security",
            ReasonCode::Recovery => "recovery",
            ReasonCode::Other => "other",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incident" => Ok(ReasonCode::Incident),
            "maintenance" => Ok(ReasonCode::Maintenance),
            "security" => Ok(ReasonCode::Security),
            "recovery" => Ok(ReasonCode::Recovery),
            "other" => Ok(ReasonCode::Other),
            other => Err(CoreError::Validation(format!(
                "unknown reason code: {other} (expected one of: incident, maintenance, security, recovery, other)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakGlassStatus {
    Active,
    Closed,
    Expired,
}

impl BreakGlassStatus {
    pub fn can_transition_to(self, to: BreakGlassStatus) -> bool {
        use BreakGlassStatus::*;
        matches!((self, to), (Active, Closed) | (Active, Expired))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreakGlassStatus::Active => "active",
            BreakGlassStatus::Closed => "closed",
            BreakGlassStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for BreakGlassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A standing emergency authorization that overrides a policy Deny for a
/// bounded window. At most one Active event may exist per
/// `(invoker, profile)` pair at any instant; the workflow probes the
/// invoker-profile index before every create to enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakGlassEvent {
    pub id: String,
    pub invoker: String,
    pub profile: String,
    pub reason_code: ReasonCode,
    pub justification: String,
    pub duration_secs: i64,
    pub status: BreakGlassStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// When the emergency window ends: `created_at + duration`.
    pub expires_at: Timestamp,
    #[serde(default)]
    pub closed_by: String,
    #[serde(default)]
    pub closed_reason: String,
    /// Optional correlation to an access request that prompted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl BreakGlassEvent {
    /// Durations above [`MAX_DURATION`] are capped, not rejected.
    pub fn new(
        invoker: impl Into<String>,
        profile: impl Into<String>,
        reason_code: ReasonCode,
        justification: impl Into<String>,
        duration_secs: i64,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        let invoker = invoker.into();
        let profile = profile.into();
        let justification = justification.into();

        if invoker.is_empty() {
            return Err(CoreError::validation("invoker is empty"));
        }
        if profile.is_empty() {
            return Err(CoreError::validation("profile is empty"));
        }
        if justification.trim().is_empty() {
            return Err(CoreError::validation("justification is required"));
        }
        if duration_secs <= 0 {
            return Err(CoreError::validation("duration must be positive"));
        }
        let duration_secs = duration_secs.min(MAX_DURATION.as_secs());

        Ok(BreakGlassEvent {
            id: ids::generate(),
            invoker,
            profile,
            reason_code,
            justification,
            duration_secs,
            status: BreakGlassStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + SignedDuration::from_secs(duration_secs),
            closed_by: String::new(),
            closed_reason: String::new(),
            request_id: None,
        })
    }

    /// Time left in the emergency window: `max(0, expires_at - now)`.
    /// The broker caps issued-credential duration at this value.
    pub fn remaining_duration(&self, now: Timestamp) -> SignedDuration {
        let remaining = self.expires_at.duration_since(now);
        remaining.max(SignedDuration::ZERO)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == BreakGlassStatus::Active && self.expires_at <= now
    }
}
