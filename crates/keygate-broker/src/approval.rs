//! The access-request approval workflow.
//!
//! Pending -> Approved | Denied | Expired, with approver authorization
//! against the approval policy and optimistic locking against the
//! request store. Concurrent-modification failures surface to the
//! caller; they are never retried here.

use jiff::Timestamp;
use keygate_audit::{AuditEntry, AuditSink};
use keygate_core::error::CoreError;
use keygate_core::models::{AccessRequest, RequestStatus};
use keygate_core::{ids, time};
use keygate_policy::ApprovalPolicy;
use keygate_store::RequestStore;
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::notify::{Notification, Notifier};

pub struct ApprovalWorkflow<'a, S, N> {
    store: &'a S,
    audit: &'a dyn AuditSink,
    notifier: &'a N,
    policy: Option<&'a ApprovalPolicy>,
}

impl<'a, S: RequestStore, N: Notifier> ApprovalWorkflow<'a, S, N> {
    pub fn new(store: &'a S, audit: &'a dyn AuditSink, notifier: &'a N) -> Self {
        Self {
            store,
            audit,
            notifier,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: &'a ApprovalPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Create a request. Auto-approves when the approval policy's first
    /// matching rule says the caller qualifies at this duration.
    pub async fn request(
        &self,
        caller: &str,
        profile: &str,
        duration_secs: i64,
        justification: &str,
        now: Timestamp,
    ) -> Result<AccessRequest, BrokerError> {
        let mut request = AccessRequest::new(caller, profile, justification, duration_secs, now)?;

        let auto_approved = self
            .policy
            .and_then(|p| p.matching_rule(profile))
            .is_some_and(|rule| rule.auto_approves(caller, duration_secs));
        if auto_approved {
            request.status = RequestStatus::Approved;
            request.approver = caller.to_string();
            request.approver_comment = "auto-approved by policy".to_string();
        }

        self.store.create(&request).await?;

        self.audit.append(
            &AuditEntry::new("request.create", caller, now)
                .with_request_id(&request.id)
                .with_profile(profile)
                .with_status(request.status.as_str())
                .with_duration_secs(duration_secs)
                .with_reason(justification),
        )?;

        info!(
            request_id = %request.id,
            profile = %profile,
            status = %request.status,
            "access request created"
        );

        let notification = Notification::RequestCreated {
            request_id: request.id.clone(),
            requester: caller.to_string(),
            profile: profile.to_string(),
            status: request.status.to_string(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(request_id = %request.id, error = %e, "request notification failed");
        }

        Ok(request)
    }

    pub async fn approve(
        &self,
        id: &str,
        caller: &str,
        comment: &str,
        now: Timestamp,
    ) -> Result<AccessRequest, BrokerError> {
        self.decide(id, caller, comment, RequestStatus::Approved, now)
            .await
    }

    pub async fn deny(
        &self,
        id: &str,
        caller: &str,
        comment: &str,
        now: Timestamp,
    ) -> Result<AccessRequest, BrokerError> {
        self.decide(id, caller, comment, RequestStatus::Denied, now)
            .await
    }

    async fn decide(
        &self,
        id: &str,
        caller: &str,
        comment: &str,
        target: RequestStatus,
        now: Timestamp,
    ) -> Result<AccessRequest, BrokerError> {
        ids::validate(id)?;
        if caller.is_empty() {
            return Err(BrokerError::Validation("approver is empty".to_string()));
        }

        let row = self.store.get(id).await?;
        let mut row = self.expire_if_overdue(row, now).await?;

        if !row.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                from: row.status.to_string(),
                to: target.to_string(),
            }
            .into());
        }

        // First matching approval rule gates the caller; no matching rule
        // passes authorization through to the access-policy layer.
        if let Some(rule) = self.policy.and_then(|p| p.matching_rule(&row.profile))
            && !rule.allows_approver(caller)
        {
            return Err(BrokerError::Unauthorized {
                caller: caller.to_string(),
                profile: row.profile.clone(),
            });
        }

        let expected = row.updated_at;
        row.status = target;
        row.approver = caller.to_string();
        row.approver_comment = comment.to_string();
        row.updated_at = time::next_token(expected, now);
        self.store.update(&row, expected).await?;

        let event = match target {
            RequestStatus::Approved => "request.approve",
            _ => "request.deny",
        };
        self.audit.append(
            &AuditEntry::new(event, caller, now)
                .with_request_id(&row.id)
                .with_profile(&row.profile)
                .with_status(row.status.as_str())
                .with_reason(comment),
        )?;

        info!(request_id = %row.id, status = %row.status, approver = %caller, "request decided");

        let notification = Notification::RequestDecided {
            request_id: row.id.clone(),
            approver: caller.to_string(),
            status: row.status.to_string(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(request_id = %row.id, error = %e, "decision notification failed");
        }

        Ok(row)
    }

    /// Pure read, plus reader-on-access expiry of overdue Pending rows.
    pub async fn check(&self, id: &str, now: Timestamp) -> Result<AccessRequest, BrokerError> {
        ids::validate(id)?;
        let row = self.store.get(id).await?;
        self.expire_if_overdue(row, now).await
    }

    pub async fn list_by_profile(
        &self,
        profile: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, BrokerError> {
        Ok(self.store.list_by_profile(profile, limit).await?)
    }

    pub async fn list_by_requester(
        &self,
        requester: &str,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, BrokerError> {
        Ok(self.store.list_by_requester(requester, limit).await?)
    }

    pub async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: i32,
    ) -> Result<Vec<AccessRequest>, BrokerError> {
        Ok(self.store.list_by_status(status, limit).await?)
    }

    /// Write the TTL transition for an overdue row. A concurrent writer
    /// beating us to it is fine; the row is re-read either way.
    async fn expire_if_overdue(
        &self,
        mut row: AccessRequest,
        now: Timestamp,
    ) -> Result<AccessRequest, BrokerError> {
        if !row.is_expired(now) || !row.status.can_transition_to(RequestStatus::Expired) {
            return Ok(row);
        }

        let expected = row.updated_at;
        row.status = RequestStatus::Expired;
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
