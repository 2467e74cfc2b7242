//! The approval-policy document: who may approve requests for which
//! profiles, and which requests auto-approve.
//!
//! A request or approve/deny operation consults the *first* rule whose
//! profile set matches. When no rule matches, authorization passes through:
//! the access policy remains the only gate. That passthrough is
//! load-bearing; callers must not tighten it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApprove {
    /// Users whose requests auto-approve under this rule.
    #[serde(default)]
    pub users: Vec<String>,
    /// Auto-approval only applies at or below this duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    #[serde(default)]
    pub name: String,
    /// Profiles this rule governs. `"*"` matches any profile.
    pub profiles: Vec<String>,
    /// Principals allowed to approve or deny matching requests.
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve: Option<AutoApprove>,
}

impl ApprovalRule {
    pub fn matches_profile(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p == "*" || p == profile)
    }

    pub fn allows_approver(&self, caller: &str) -> bool {
        self.approvers.iter().any(|a| a == caller)
    }

    pub fn auto_approves(&self, user: &str, duration_secs: i64) -> bool {
        match &self.auto_approve {
            None => false,
            Some(auto) => {
                let user_ok = auto.users.iter().any(|u| u == "*" || u == user);
                let duration_ok = auto
                    .max_duration_secs
                    .is_none_or(|max| duration_secs <= max);
                user_ok && duration_ok
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<ApprovalRule>,
}

fn default_version() -> u32 {
    1
}

impl ApprovalPolicy {
    /// First rule whose profile set contains `profile`. None means no rule
    /// governs the profile and authorization passes through.
    pub fn matching_rule(&self, profile: &str) -> Option<&ApprovalRule> {
        self.rules.iter().find(|r| r.matches_profile(profile))
    }
}
