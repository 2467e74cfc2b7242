//! The access-policy document and its evaluator.
//!
//! A policy is an ordered list of rules; the first rule whose conditions
//! all hold decides the outcome. Evaluation is pure; time conditions use
//! the request's timestamp, never the wall clock.

use jiff::Timestamp;
use jiff::civil::Weekday;
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// The outcome of evaluating a policy against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub effect: Effect,
    pub reason: String,
    /// Name of the rule that decided, if any rule matched.
    pub rule: Option<String>,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// What the broker asks the policy about.
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    pub user: String,
    pub profile: String,
    pub time: Timestamp,
}

/// A UTC clock window, optionally restricted to weekdays.
///
/// `start_hour` is inclusive, `end_hour` exclusive. A window whose start
/// is after its end wraps past midnight (22 -> 6 covers the night shift).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
}

impl TimeWindow {
    pub fn contains(&self, time: Timestamp) -> bool {
        let zoned = time.to_zoned(TimeZone::UTC);
        let hour = zoned.hour() as u8;

        let in_hours = if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        };
        if !in_hours {
            return false;
        }

        match &self.days {
            None => true,
            Some(days) => {
                let today = weekday_name(zoned.weekday());
                days.iter().any(|d| d.eq_ignore_ascii_case(today))
            }
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Monday => "monday",
        Weekday::Tuesday => "tuesday",
        Weekday::Wednesday => "wednesday",
        Weekday::Thursday => "thursday",
        Weekday::Friday => "friday",
        Weekday::Saturday => "saturday",
        Weekday::Sunday => "sunday",
    }
}

/// One policy rule. Absent conditions match everything; present conditions
/// combine by logical AND. `"*"` in a user or profile list matches any value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub name: String,
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub reason: String,
}

impl PolicyRule {
    fn matches(&self, request: &PolicyRequest) -> bool {
        if let Some(users) = &self.users
            && !contains_or_wildcard(users, &request.user)
        {
            return false;
        }
        if let Some(profiles) = &self.profiles
            && !contains_or_wildcard(profiles, &request.profile)
        {
            return false;
        }
        if let Some(window) = &self.time_window
            && !window.contains(request.time)
        {
            return false;
        }
        true
    }
}

fn contains_or_wildcard(values: &[String], candidate: &str) -> bool {
    values.iter().any(|v| v == "*" || v == candidate)
}

/// A versioned, ordered access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_effect: Option<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_reason: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl Policy {
    /// First matching rule wins; no match falls through to the document
    /// default; no declared default is a Deny.
    pub fn evaluate(&self, request: &PolicyRequest) -> Decision {
        for rule in &self.rules {
            if rule.matches(request) {
                let reason = if rule.reason.is_empty() {
                    match rule.effect {
                        Effect::Allow => format!("allowed by rule for {}", request.profile),
                        Effect::Deny => format!("denied by rule for {}", request.profile),
                    }
                } else {
                    rule.reason.clone()
                };
                return Decision {
                    effect: rule.effect,
                    reason,
                    rule: (!rule.name.is_empty()).then(|| rule.name.clone()),
                };
            }
        }

        let effect = self.default_effect.unwrap_or(Effect::Deny);
        let reason = self
            .default_reason
            .clone()
            .unwrap_or_else(|| "no matching rule".to_string());
        Decision {
            effect,
            reason,
            rule: None,
        }
    }
}
