//! The break-glass workflow: Active -> Closed | Expired, with the
//! single-active invariant per (invoker, profile) and write-first
//! notification.

use jiff::Timestamp;
use keygate_audit::{AuditEntry, AuditSink};
use keygate_core::error::CoreError;
use keygate_core::models::{BreakGlassEvent, BreakGlassStatus, ReasonCode};
use keygate_core::{ids, time};
use keygate_store::BreakGlassStore;
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::notify::{Notification, Notifier};

pub struct BreakGlassWorkflow<'a, S, N> {
    store: &'a S,
    audit: &'a dyn AuditSink,
    notifier: &'a N,
}

impl<'a, S: BreakGlassStore, N: Notifier> BreakGlassWorkflow<'a, S, N> {
    pub fn new(store: &'a S, audit: &'a dyn AuditSink, notifier: &'a N) -> Self {
        Self {
            store,
            audit,
            notifier,
        }
    }

    /// Open an emergency window. Fails when the invoker already holds an
    /// active event for the profile.
    pub async fn invoke(
        &self,
        invoker: &str,
        profile: &str,
        reason_code: ReasonCode,
        justification: &str,
        duration_secs: i64,
        request_id: Option<String>,
        now: Timestamp,
    ) -> Result<BreakGlassEvent, BrokerError> {
        if let Some(existing) = self.store.find_active(invoker, profile, now).await? {
            warn!(
                event_id = %existing.id,
                invoker = %invoker,
                profile = %profile,
                "duplicate break-glass invocation refused"
            );
            return Err(BrokerError::DuplicateActive {
                invoker: invoker.to_string(),
                profile: profile.to_string(),
            });
        }

        let mut event =
            BreakGlassEvent::new(invoker, profile, reason_code, justification, duration_secs, now)?;
        event.request_id = request_id;

        self.store.create(&event).await?;

        self.audit.append(
            &AuditEntry::new("breakglass.invoke", invoker, now)
                .with_request_id(&event.id)
                .with_profile(profile)
                .with_status(event.status.as_str())
                .with_duration_secs(event.duration_secs)
                .with_reason(format!("{}: {justification}", reason_code)),
        )?;

        info!(
            event_id = %event.id,
            profile = %profile,
            reason_code = %reason_code,
            expires_at = %event.expires_at,
            "break-glass event opened"
        );

        // Write-first: the event exists regardless of what the transport
        // does with the notification.
        let notification = Notification::BreakGlassInvoked {
            event_id: event.id.clone(),
            invoker: invoker.to_string(),
            profile: profile.to_string(),
            reason_code: reason_code.to_string(),
            expires_at: event.expires_at,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(event_id = %event.id, error = %e, "break-glass notification failed");
        }

        Ok(event)
    }

    pub async fn close(
        &self,
        id: &str,
        caller: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<BreakGlassEvent, BrokerError> {
        ids::validate(id)?;
        if caller.is_empty() {
            return Err(BrokerError::Validation("closer is empty".to_string()));
        }

        let row = self.store.get(id).await?;
        let mut row = self.expire_if_overdue(row, now).await?;

        if !row.status.can_transition_to(BreakGlassStatus::Closed) {
            return Err(CoreError::InvalidTransition {
                from: row.status.to_string(),
                to: BreakGlassStatus::Closed.to_string(),
            }
            .into());
        }

        let expected = row.updated_at;
        row.status = BreakGlassStatus::Closed;
        row.closed_by = caller.to_string();
        row.closed_reason = reason.to_string();
        row.updated_at = time::next_token(expected, now);
        self.store.update(&row, expected).await?;

        self.audit.append(
            &AuditEntry::new("breakglass.close", caller, now)
                .with_request_id(&row.id)
                .with_profile(&row.profile)
                .with_status(row.status.as_str())
                .with_reason(reason),
        )?;

        info!(event_id = %row.id, closed_by = %caller, "break-glass event closed");
        Ok(row)
    }

    pub async fn check(&self, id: &str, now: Timestamp) -> Result<BreakGlassEvent, BrokerError> {
        ids::validate(id)?;
        let row = self.store.get(id).await?;
        self.expire_if_overdue(row, now).await
    }

    pub async fn list_by_invoker(
        &self,
        invoker: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, BrokerError> {
        Ok(self.store.list_by_invoker(invoker, limit).await?)
    }

    pub async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, BrokerError> {
        Ok(self.store.list_by_profile(profile, limit).await?)
    }

    pub async fn list_by_status(
        &self,
        status: BreakGlassStatus,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, BrokerError> {
        Ok(self.store.list_by_status(status, limit).await?)
    }

    pub async fn list_in_range(
        &self,
        start: Timestamp,
        end: Timestamp,
        limit: i32,
    ) -> Result<Vec<BreakGlassEvent>, BrokerError> {
        Ok(self.store.list_in_range(start, end, limit).await?)
    }

    async fn expire_if_overdue(
        &self,
        mut row: BreakGlassEvent,
        now: Timestamp,
    ) -> Result<BreakGlassEvent, BrokerError> {
        if !row.is_expired(now) {
            return Ok(row);
        }

        let expected = row.updated_at;
        row.status = BreakGlassStatus::Expired;
        row.updated_at = time::next_token(expected, now);
        match self.store.update(&row, expected).await {
            Ok(()) => Ok(row),
            Err(keygate_store::StoreError::ConcurrentModification { .. }) => {
                Ok(self.store.get(&row.id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
