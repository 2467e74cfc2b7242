use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids;

/// How long a pending request stays actionable before it expires.
/// This is the approval window, not the credential duration.
pub const REQUEST_TTL: SignedDuration = SignedDuration::from_hours(24);

/// Upper bound on the credential duration a request may ask for.
pub const MAX_REQUEST_DURATION: SignedDuration = SignedDuration::from_hours(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    /// An approved request that the broker has already redeemed.
    /// Consumption is one-shot: a consumed request never issues again.
    Consumed,
}

impl RequestStatus {
    /// The sole authority on request lifecycle legality. Any write whose
    /// source state disagrees with this table must be rejected.
    pub fn can_transition_to(self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Pending, Approved) | (Pending, Denied) | (Pending, Expired)
                | (Approved, Consumed)
                | (Approved, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Denied | RequestStatus::Expired | RequestStatus::Consumed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
            RequestStatus::Expired => "expired",
            RequestStatus::Consumed => "consumed",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "denied" => Ok(RequestStatus::Denied),
            "expired" => Ok(RequestStatus::Expired),
            "consumed" => Ok(RequestStatus::Consumed),
            other => Err(CoreError::Validation(format!(
                "unknown request status: {other}"
            ))),
        }
    }
}

/// A user's request for temporary access to a profile.
///
/// Created Pending (or directly Approved when an auto-approve rule
/// matches); mutated exclusively by the approval workflow. `updated_at`
/// doubles as the optimistic-lock token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub requester: String,
    pub profile: String,
    pub justification: String,
    pub duration_secs: i64,
    pub status: RequestStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
    #[serde(default)]
    pub approver: String,
    #[serde(default)]
    pub approver_comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<Timestamp>,
}

impl AccessRequest {
    pub fn new(
        requester: impl Into<String>,
        profile: impl Into<String>,
        justification: impl Into<String>,
        duration_secs: i64,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        let requester = requester.into();
        let profile = profile.into();
        let justification = justification.into();

        if requester.is_empty() {
            return Err(CoreError::validation("requester is empty"));
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
        if duration_secs > MAX_REQUEST_DURATION.as_secs() {
            return Err(CoreError::Validation(format!(
                "duration exceeds maximum of {}s",
                MAX_REQUEST_DURATION.as_secs()
            )));
        }

        Ok(AccessRequest {
            id: ids::generate(),
            requester,
            profile,
            justification,
            duration_secs,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + REQUEST_TTL,
            approver: String::new(),
            approver_comment: String::new(),
            consumed_at: None,
        })
    }

    /// Whether the approval window has lapsed. Terminal rows never expire
    /// further.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.status.is_terminal() && self.expires_at <= now
    }
}
