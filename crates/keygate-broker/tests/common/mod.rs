//! Shared fakes for the workflow and broker tests. Everything here is
//! deterministic: fixed identities, canned credentials, in-memory stores.

#![allow(dead_code)]

use std::sync::Mutex;

use jiff::Timestamp;
use keygate_audit::{AuditEntry, AuditError, AuditSink, HmacKey, MemoryAuditLog};
use keygate_broker::{Notification, Notifier, NotifyError};
use keygate_identity::{
    CallerIdentity, CredentialIssuer, Credentials, IdentityError, IdentityResolver, IssueRequest,
};
use keygate_policy::cache::PolicyFetcher;
use keygate_policy::{Effect, Policy, PolicyError, PolicyRule};

pub fn t0() -> Timestamp {
    "2026-03-02T10:00:00Z".parse().unwrap()
}

pub fn audit_log() -> MemoryAuditLog {
    MemoryAuditLog::new(HmacKey::new(vec![0x42; 32]).unwrap())
}

/// Parse the audit log back out for assertions.
pub fn audit_events(log: &MemoryAuditLog) -> Vec<serde_json::Value> {
    log.lines()
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

pub struct FakeIdentity {
    pub name: String,
}

impl FakeIdentity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl IdentityResolver for FakeIdentity {
    async fn resolve(&self) -> Result<CallerIdentity, IdentityError> {
        Ok(CallerIdentity {
            arn: format!("arn:aws:iam::123456789012:user/{}", self.name),
            account_id: "123456789012".to_string(),
            user_id: "AIDAEXAMPLE".to_string(),
            principal_name: self.name.clone(),
        })
    }
}

#[derive(Default)]
pub struct FakeIssuer {
    pub requests: Mutex<Vec<IssueRequest>>,
}

impl FakeIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> Vec<IssueRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CredentialIssuer for FakeIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<Credentials, IdentityError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Credentials {
            access_key_id: "ASIAEXAMPLEKEYID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("token".to_string()),
            expiration: None,
        })
    }
}

/// Serves one fixed policy without any remote call.
pub struct StaticPolicyFetcher {
    pub policy: Policy,
}

impl PolicyFetcher for StaticPolicyFetcher {
    async fn fetch(&self, _parameter: &str) -> Result<Policy, PolicyError> {
        Ok(self.policy.clone())
    }
}

/// Fails every fetch, as a dead policy plane would.
pub struct FailingPolicyFetcher;

impl PolicyFetcher for FailingPolicyFetcher {
    async fn fetch(&self, _parameter: &str) -> Result<Policy, PolicyError> {
        Err(PolicyError::Transport("wire down".to_string()))
    }
}

pub fn allow_profile_policy(profile: &str) -> Policy {
    Policy {
        version: 1,
        rules: vec![PolicyRule {
            name: format!("allow-{profile}"),
            effect: Effect::Allow,
            users: None,
            profiles: Some(vec![profile.to_string()]),
            time_window: None,
            reason: String::new(),
        }],
        default_effect: Some(Effect::Deny),
        default_reason: Some("not covered by any rule".to_string()),
    }
}

pub fn deny_all_policy(reason: &str) -> Policy {
    Policy {
        version: 1,
        rules: vec![],
        default_effect: Some(Effect::Deny),
        default_reason: Some(reason.to_string()),
    }
}

/// An audit sink whose disk fell out.
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn append(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Sink("disk full".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let tag = match notification {
            Notification::BreakGlassInvoked { event_id, .. } => {
                format!("breakglass-invoked:{event_id}")
            }
            Notification::RequestCreated { request_id, .. } => {
                format!("request-created:{request_id}")
            }
            Notification::RequestDecided { request_id, status, .. } => {
                format!("request-decided:{request_id}:{status}")
            }
            Notification::SessionRevoked { session_id, .. } => {
                format!("session-revoked:{session_id}")
            }
        };
        self.notifications.lock().unwrap().push(tag);
        Ok(())
    }
}

/// Always errors; used to prove write-first semantics.
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError("transport refused".to_string()))
    }
}
