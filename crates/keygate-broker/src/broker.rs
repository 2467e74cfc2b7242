//! The credential broker: identity -> policy -> override probes ->
//! issuance -> session row -> audit, in that order, failing closed at
//! every ambiguity.
//!
//! Override probes run only after a policy Deny, so the Allow path
//! carries no secondary I/O and an override can never change an
//! already-positive decision. A probe that errors is treated as empty;
//! transport trouble downgrades toward Deny, never toward Allow.

use jiff::Timestamp;
use keygate_audit::{AuditEntry, AuditSink};
use keygate_core::models::{RequestStatus, ServerSession, SessionStatus};
use keygate_core::{ids, time};
use keygate_identity::{CredentialIssuer, Credentials, IdentityResolver, IssueRequest};
use keygate_policy::cache::{PolicyCache, PolicyFetcher};
use keygate_policy::{Effect, PolicyRequest};
use keygate_store::{BreakGlassStore, RequestStore, SessionStore, StoreError};
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::profiles::ProfileRegistry;

/// Effective duration when neither the caller nor the profile asks for one.
pub const DEFAULT_DURATION_SECS: i64 = 3_600;

/// STS refuses durations below this.
pub const MIN_DURATION_SECS: i64 = 900;

/// Hard ceiling on issued-credential duration.
pub const MAX_DURATION_SECS: i64 = 43_200;

#[derive(Debug, Clone, Default)]
pub struct IssueParams {
    pub profile: String,
    pub requested_duration_secs: Option<i64>,
    /// Re-issuance against an existing session lineage. Revocation is
    /// enforced here: a revoked lineage fails closed.
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub server_instance_id: Option<String>,
    /// Skip the session row (for deployments without a revocation plane).
    pub no_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideSource {
    ApprovedRequest(String),
    BreakGlass(String),
}

#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub credentials: Credentials,
    pub request_id: String,
    pub user: String,
    pub role_arn: String,
    pub duration_secs: i64,
    pub override_source: Option<OverrideSource>,
    pub session_recorded: bool,
}

pub struct CredentialBroker<'a, I, C, F, RS, BS, SS> {
    identity: &'a I,
    issuer: &'a C,
    policy_cache: &'a PolicyCache<F>,
    policy_parameter: &'a str,
    profiles: &'a ProfileRegistry,
    requests: &'a RS,
    breakglass: &'a BS,
    sessions: &'a SS,
    audit: &'a dyn AuditSink,
}

impl<'a, I, C, F, RS, BS, SS> CredentialBroker<'a, I, C, F, RS, BS, SS>
where
    I: IdentityResolver,
    C: CredentialIssuer,
    F: PolicyFetcher,
    RS: RequestStore,
    BS: BreakGlassStore,
    SS: SessionStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: &'a I,
        issuer: &'a C,
        policy_cache: &'a PolicyCache<F>,
        policy_parameter: &'a str,
        profiles: &'a ProfileRegistry,
        requests: &'a RS,
        breakglass: &'a BS,
        sessions: &'a SS,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            identity,
            issuer,
            policy_cache,
            policy_parameter,
            profiles,
            requests,
            breakglass,
            sessions,
            audit,
        }
    }

    pub async fn issue(
        &self,
        params: &IssueParams,
        now: Timestamp,
    ) -> Result<IssueOutcome, BrokerError> {
        let caller = self.identity.resolve().await?;
        let user = caller.principal_name.clone();

        let profile = self.profiles.get(&params.profile)?;

        let policy = match self.policy_cache.load(self.policy_parameter).await {
            Ok(policy) => policy,
            Err(e) => {
                // Policy plane unavailable or untrusted: deny, audited.
                self.append_deny(&user, &params.profile, format!("policy unavailable: {e}"), now)?;
                return Err(e.into());
            }
        };

        let decision = policy.evaluate(&PolicyRequest {
            user: user.clone(),
            profile: params.profile.clone(),
            time: now,
        });

        let mut override_source = None;
        let mut duration_cap_secs = None;
        if decision.effect == Effect::Deny {
            match self.resolve_override(&user, &params.profile, now).await {
                Some((source, cap)) => {
                    override_source = Some(source);
                    duration_cap_secs = cap;
                }
                None => {
                    self.append_deny(&user, &params.profile, decision.reason.clone(), now)?;
                    return Err(BrokerError::AccessDenied {
                        reason: decision.reason,
                    });
                }
            }
        }

        // Session lineage: a revoked session kills re-issuance before any
        // credential is minted.
        let mut reuse_session = None;
        if let Some(session_id) = &params.session_id {
            ids::validate(session_id)?;
            let session = self.sessions.get(session_id).await?;
            match session.status {
                SessionStatus::Revoked => {
                    let reason = format!(
                        "session {session_id} revoked by {}: {}",
                        session.revoked_by, session.revoked_reason
                    );
                    self.append_deny(&user, &params.profile, reason.clone(), now)?;
                    return Err(BrokerError::AccessDenied { reason });
                }
                SessionStatus::Active if !session.is_expired(now) => {
                    reuse_session = Some(session);
                }
                // An expired lineage just starts a fresh one.
                _ => {}
            }
        }

        let duration_secs = effective_duration(
            params.requested_duration_secs.or(profile.default_duration_secs),
            duration_cap_secs,
        )?;

        let request_id = match &reuse_session {
            Some(session) => session.id.clone(),
            None => ids::generate(),
        };

        let session_name = profile
            .session_name
            .clone()
            .unwrap_or_else(|| format!("keygate-{user}"));
        let credentials = self
            .issuer
            .issue(&IssueRequest {
                role_arn: profile.role_arn.clone(),
                session_name,
                source_identity: user.clone(),
                duration_secs,
                request_id: request_id.clone(),
            })
            .await?;

        let mut session_recorded = false;
        if !params.no_session {
            // Credentials are already minted: a failed session write is
            // surfaced, never swallowed.
            self.record_session(
                params,
                &user,
                &credentials,
                &request_id,
                duration_secs,
                reuse_session,
                now,
            )
            .await?;
            session_recorded = true;
        }

        let mut entry = AuditEntry::new("credentials.allow", &user, now)
            .with_request_id(&request_id)
            .with_profile(&params.profile)
            .with_status("allowed")
            .with_source_identity(&user)
            .with_role_arn(&profile.role_arn)
            .with_duration_secs(duration_secs);
        match &override_source {
            Some(OverrideSource::ApprovedRequest(id)) => {
                entry = entry.with_approved_request_id(id);
            }
            Some(OverrideSource::BreakGlass(id)) => {
                entry = entry.with_breakglass_event_id(id);
            }
            None => {}
        }
        self.audit.append(&entry)?;

        info!(
            request_id = %request_id,
            profile = %params.profile,
            user = %user,
            duration_secs = duration_secs,
            "credentials issued"
        );

        Ok(IssueOutcome {
            credentials,
            request_id,
            user,
            role_arn: profile.role_arn.clone(),
            duration_secs,
            override_source,
            session_recorded,
        })
    }

    /// Probe the two override sources, approved request first. Any probe
    /// failure reads as "no override"; transport trouble can only make
    /// the outcome stricter. A break-glass override also returns the
    /// remaining window as a duration cap.
    async fn resolve_override(
        &self,
        user: &str,
        profile: &str,
        now: Timestamp,
    ) -> Option<(OverrideSource, Option<i64>)> {
        if let Some(id) = self.consume_approved_request(user, profile, now).await {
            return Some((OverrideSource::ApprovedRequest(id), None));
        }

        match self.breakglass.find_active(user, profile, now).await {
            Ok(Some(event)) => {
                let remaining = event.remaining_duration(now).as_secs();
                Some((OverrideSource::BreakGlass(event.id), Some(remaining)))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(profile = %profile, error = %e, "break-glass probe failed, continuing to deny");
                None
            }
        }
    }

    /// One-shot consumption: the Approved -> Consumed transition under
    /// the optimistic lock is what prevents replay. Losing the race means
    /// another issuance spent the request first.
    async fn consume_approved_request(
        &self,
        user: &str,
        profile: &str,
        now: Timestamp,
    ) -> Option<String> {
        let request = match self.requests.find_approved(user, profile, now).await {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(e) => {
                warn!(profile = %profile, error = %e, "approved-request probe failed, continuing");
                return None;
            }
        };

        if !request.status.can_transition_to(RequestStatus::Consumed) {
            return None;
        }

        let mut row = request;
        let expected = row.updated_at;
        row.status = RequestStatus::Consumed;
        row.consumed_at = Some(now);
        row.updated_at = time::next_token(expected, now);

        match self.requests.update(&row, expected).await {
            Ok(()) => Some(row.id),
            Err(StoreError::ConcurrentModification { id }) => {
                warn!(request_id = %id, "approved request consumed by a concurrent issuance");
                None
            }
            Err(e) => {
                warn!(request_id = %row.id, error = %e, "approved-request consumption failed, continuing");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_session(
        &self,
        params: &IssueParams,
        user: &str,
        credentials: &Credentials,
        request_id: &str,
        duration_secs: i64,
        reuse_session: Option<ServerSession>,
        now: Timestamp,
    ) -> Result<(), BrokerError> {
        let expires_at = credentials
            .expiration
            .unwrap_or_else(|| now + jiff::SignedDuration::from_secs(duration_secs));

        match reuse_session {
            Some(mut session) => {
                let expected = session.updated_at;
                session.touch(now);
                session.expires_at = expires_at;
                session.updated_at = time::next_token(expected, now);
                self.sessions.update(&session, expected).await?;
            }
            None => {
                let mut session =
                    ServerSession::new(request_id, user, &params.profile, user, expires_at, now)?;
                if let Some(instance) = &params.server_instance_id {
                    session = session.with_server_instance(instance);
                }
                if let Some(device_id) = &params.device_id {
                    session = session.with_device(device_id)?;
                }
                self.sessions.create(&session).await?;
            }
        }
        Ok(())
    }

    fn append_deny(
        &self,
        user: &str,
        profile: &str,
        reason: String,
        now: Timestamp,
    ) -> Result<(), BrokerError> {
        self.audit.append(
            &AuditEntry::new("credentials.deny", user, now)
                .with_profile(profile)
                .with_status("denied")
                .with_reason(reason),
        )?;
        Ok(())
    }
}

/// Resolve the duration to issue. `requested` is the caller's ask (CLI
/// flag, falling back to the profile default); `cap` is the remaining
/// break-glass window when that override fired. A capped issuance with no
/// ask gets exactly the remaining time.
fn effective_duration(requested: Option<i64>, cap: Option<i64>) -> Result<i64, BrokerError> {
    if let Some(d) = requested
        && (d <= 0 || d > MAX_DURATION_SECS)
    {
        return Err(BrokerError::Validation(format!(
            "duration must be between 1 and {MAX_DURATION_SECS} seconds"
        )));
    }

    let effective = match cap {
        Some(remaining) => match requested {
            Some(d) => d.min(remaining),
            None => remaining,
        },
        None => requested.unwrap_or(DEFAULT_DURATION_SECS),
    };

    if effective <= 0 {
        return Err(BrokerError::AccessDenied {
            reason: "break-glass window has no time remaining".to_string(),
        });
    }
    Ok(effective)
}
