//! The session plane: one row per issued credential set, last-access
//! accounting, revocation, and the device-level forensic rollup.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use jiff::Timestamp;
use keygate_audit::{AuditEntry, AuditSink};
use keygate_core::models::{ServerSession, SessionStatus};
use keygate_core::{ids, time};
use keygate_store::SessionStore;
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::notify::{Notification, Notifier};

/// Distinct-profile count above which a device is flagged.
pub const HIGH_PROFILE_COUNT_THRESHOLD: usize = 5;

pub struct SessionPlane<'a, S, N> {
    store: &'a S,
    audit: &'a dyn AuditSink,
    notifier: &'a N,
}

impl<'a, S: SessionStore, N: Notifier> SessionPlane<'a, S, N> {
    pub fn new(store: &'a S, audit: &'a dyn AuditSink, notifier: &'a N) -> Self {
        Self {
            store,
            audit,
            notifier,
        }
    }

    pub async fn record(&self, session: &ServerSession) -> Result<(), BrokerError> {
        self.store.create(session).await?;
        Ok(())
    }

    /// Bump access accounting for a live session.
    pub async fn touch(&self, id: &str, now: Timestamp) -> Result<ServerSession, BrokerError> {
        ids::validate(id)?;
        let mut row = self.store.get(id).await?;
        let expected = row.updated_at;
        row.touch(now);
        row.updated_at = time::next_token(expected, now);
        self.store.update(&row, expected).await?;
        Ok(row)
    }

    /// Kill a session. Later issuance attempts against this lineage fail
    /// closed in the broker.
    pub async fn revoke(
        &self,
        id: &str,
        caller: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<ServerSession, BrokerError> {
        ids::validate(id)?;
        if caller.is_empty() {
            return Err(BrokerError::Validation("revoker is empty".to_string()));
        }

        let mut row = self.store.get(id).await?;
        match row.status {
            SessionStatus::Revoked => {
                return Err(BrokerError::AlreadyRevoked { id: id.to_string() });
            }
            SessionStatus::Expired => {
                return Err(BrokerError::SessionExpired { id: id.to_string() });
            }
            SessionStatus::Active if row.is_expired(now) => {
                // Reader-on-access expiry: an overdue Active row reads as
                // Expired and cannot be revoked.
                let expected = row.updated_at;
                row.status = SessionStatus::Expired;
                row.updated_at = time::next_token(expected, now);
                if let Err(e) = self.store.update(&row, expected).await {
                    warn!(session_id = %id, error = %e, "expiry transition failed");
                }
                return Err(BrokerError::SessionExpired { id: id.to_string() });
            }
            SessionStatus::Active => {}
        }

        let expected = row.updated_at;
        row.status = SessionStatus::Revoked;
        row.revoked_by = caller.to_string();
        row.revoked_reason = reason.to_string();
        row.updated_at = time::next_token(expected, now);
        self.store.update(&row, expected).await?;

        self.audit.append(
            &AuditEntry::new("session.revoke", caller, now)
                .with_request_id(&row.id)
                .with_profile(&row.profile)
                .with_status(row.status.as_str())
                .with_reason(reason),
        )?;

        info!(session_id = %row.id, revoked_by = %caller, "session revoked");

        let notification = Notification::SessionRevoked {
            session_id: row.id.clone(),
            revoked_by: caller.to_string(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(session_id = %row.id, error = %e, "revocation notification failed");
        }

        Ok(row)
    }

    pub async fn check(&self, id: &str) -> Result<ServerSession, BrokerError> {
        ids::validate(id)?;
        Ok(self.store.get(id).await?)
    }

    pub async fn list_by_user(
        &self,
        user: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, BrokerError> {
        Ok(self.store.list_by_user(user, limit).await?)
    }

    pub async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, BrokerError> {
        Ok(self.store.list_by_profile(profile, limit).await?)
    }

    pub async fn list_by_status(
        &self,
        status: SessionStatus,
        limit: i32,
    ) -> Result<Vec<ServerSession>, BrokerError> {
        Ok(self.store.list_by_status(status, limit).await?)
    }

    pub async fn list_by_device(
        &self,
        device_id: &str,
        limit: i32,
    ) -> Result<Vec<ServerSession>, BrokerError> {
        ids::validate_device(device_id)?;
        Ok(self.store.list_by_device(device_id, limit).await?)
    }

    pub async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<ServerSession>, BrokerError> {
        Ok(self.store.list_in_range(start, end, limit).await?)
    }
}

/// Per-device forensic rollup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub session_count: usize,
    pub users: Vec<String>,
    pub profiles: Vec<String>,
    /// `MULTI_USER` and/or `HIGH_PROFILE_COUNT`.
    pub anomalies: Vec<String>,
}

/// Group sessions by device, computing unique users and profiles and
/// flagging anomalies. Sessions without a device ID are ignored.
pub fn aggregate_by_device(sessions: &[ServerSession]) -> Vec<DeviceSummary> {
    let mut by_device: BTreeMap<&str, Vec<&ServerSession>> = BTreeMap::new();
    for session in sessions {
        if let Some(device_id) = session.device_id.as_deref() {
            by_device.entry(device_id).or_default().push(session);
        }
    }

    by_device
        .into_iter()
        .map(|(device_id, rows)| {
            let users: BTreeSet<&str> = rows.iter().map(|s| s.user.as_str()).collect();
            let profiles: BTreeSet<&str> = rows.iter().map(|s| s.profile.as_str()).collect();

            let mut anomalies = Vec::new();
            if users.len() >= 2 {
                anomalies.push("MULTI_USER".to_string());
            }
            if profiles.len() > HIGH_PROFILE_COUNT_THRESHOLD {
                anomalies.push("HIGH_PROFILE_COUNT".to_string());
            }

            DeviceSummary {
                device_id: device_id.to_string(),
                session_count: rows.len(),
                users: users.into_iter().map(str::to_string).collect(),
                profiles: profiles.into_iter().map(str::to_string).collect(),
                anomalies,
            }
        })
        .collect()
}
