//! Credential broker end-to-end: policy gate, override probes, duration
//! caps, session rows, fail-closed audit.

mod common;

use common::{
    FailingAuditSink, FailingPolicyFetcher, FakeIdentity, FakeIssuer, RecordingNotifier,
    StaticPolicyFetcher, allow_profile_policy, audit_events, audit_log, deny_all_policy, t0,
};
use jiff::SignedDuration;
use keygate_audit::MemoryAuditLog;
use keygate_broker::broker::DEFAULT_DURATION_SECS;
use keygate_broker::{
    BreakGlassWorkflow, BrokerError, CredentialBroker, IssueParams, OverrideSource, Profile,
    ProfileRegistry, SessionPlane,
};
use keygate_core::models::{ReasonCode, RequestStatus, SessionStatus};
use keygate_policy::Policy;
use keygate_policy::cache::{PolicyCache, PolicyFetcher};
use keygate_store::{
    MemoryBreakGlassStore, MemoryRequestStore, MemorySessionStore, RequestStore, SessionStore,
};

struct Harness<F: PolicyFetcher> {
    identity: FakeIdentity,
    issuer: FakeIssuer,
    cache: PolicyCache<F>,
    registry: ProfileRegistry,
    requests: MemoryRequestStore,
    breakglass: MemoryBreakGlassStore,
    sessions: MemorySessionStore,
    log: MemoryAuditLog,
}

fn harness(policy: Policy) -> Harness<StaticPolicyFetcher> {
    harness_with(StaticPolicyFetcher { policy })
}

fn harness_with<F: PolicyFetcher>(fetcher: F) -> Harness<F> {
    let mut registry = ProfileRegistry::default();
    registry.insert(
        "dev",
        Profile {
            role_arn: "arn:aws:iam::123456789012:role/dev".to_string(),
            region: None,
            session_name: None,
            default_duration_secs: None,
            description: None,
        },
    );
    registry.insert(
        "prod",
        Profile {
            role_arn: "arn:aws:iam::123456789012:role/prod".to_string(),
            region: None,
            session_name: Some("prod-oncall".to_string()),
            default_duration_secs: None,
            description: None,
        },
    );

    Harness {
        identity: FakeIdentity::new("alice"),
        issuer: FakeIssuer::new(),
        cache: PolicyCache::new(fetcher),
        registry,
        requests: MemoryRequestStore::new(),
        breakglass: MemoryBreakGlassStore::new(),
        sessions: MemorySessionStore::new(),
        log: audit_log(),
    }
}

impl<F: PolicyFetcher> Harness<F> {
    fn broker(
        &self,
    ) -> CredentialBroker<
        '_,
        FakeIdentity,
        FakeIssuer,
        F,
        MemoryRequestStore,
        MemoryBreakGlassStore,
        MemorySessionStore,
    > {
        CredentialBroker::new(
            &self.identity,
            &self.issuer,
            &self.cache,
            "/keygate/policy",
            &self.registry,
            &self.requests,
            &self.breakglass,
            &self.sessions,
            &self.log,
        )
    }

}

fn params(profile: &str) -> IssueParams {
    IssueParams {
        profile: profile.to_string(),
        ..IssueParams::default()
    }
}

#[tokio::test]
async fn allowed_profile_issues_credentials_with_a_session_and_audit_entry() {
    let h = harness(allow_profile_policy("dev"));

    let outcome = h.broker().issue(&params("dev"), t0()).await.unwrap();

    assert!(!outcome.credentials.access_key_id.is_empty());
    assert_eq!(outcome.user, "alice");
    assert_eq!(outcome.duration_secs, DEFAULT_DURATION_SECS);
    assert!(outcome.override_source.is_none());
    assert!(outcome.session_recorded);
    keygate_core::ids::validate(&outcome.request_id).unwrap();

    // Source identity reached the issuer.
    let issued = h.issuer.issued();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].source_identity, "alice");
    assert_eq!(issued[0].request_id, outcome.request_id);

    // Session row keyed by the issuance id.
    let session = h.sessions.get(&outcome.request_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.source_identity, "alice");

    let events = audit_events(&h.log);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "credentials.allow");
    assert_eq!(events[0]["request_id"], outcome.request_id);
    assert_eq!(events[0]["role_arn"], "arn:aws:iam::123456789012:role/dev");
}

#[tokio::test]
async fn default_deny_without_overrides_fails_with_one_deny_entry_and_no_session() {
    let h = harness(deny_all_policy("production is locked"));

    let err = h.broker().issue(&params("prod"), t0()).await.unwrap_err();
    match &err {
        BrokerError::AccessDenied { reason } => assert_eq!(reason, "production is locked"),
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    assert!(err.to_string().contains("access denied: production is locked"));

    let events = audit_events(&h.log);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "credentials.deny");
    assert_eq!(events[0]["reason"], "production is locked");

    // No credentials were minted and no session row exists.
    assert!(h.issuer.issued().is_empty());
    assert!(
        h.sessions
            .list_by_status(SessionStatus::Active, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn an_approved_request_overrides_a_deny_exactly_once() {
    let h = harness(deny_all_policy("approval required"));

    // Seed an Approved row for (alice, prod).
    let mut request =
        keygate_core::models::AccessRequest::new("alice", "prod", "hotfix", 3600, t0()).unwrap();
    request.status = RequestStatus::Approved;
    request.approver = "lead".to_string();
    h.requests.create(&request).await.unwrap();

    let outcome = h.broker().issue(&params("prod"), t0()).await.unwrap();
    assert_eq!(
        outcome.override_source,
        Some(OverrideSource::ApprovedRequest(request.id.clone()))
    );

    let events = audit_events(&h.log);
    assert_eq!(events.last().unwrap()["approved_request_id"], request.id);

    // One-shot: the row is Consumed and a second issuance denies.
    let consumed = h.requests.get(&request.id).await.unwrap();
    assert_eq!(consumed.status, RequestStatus::Consumed);
    assert!(consumed.consumed_at.is_some());

    let err = h.broker().issue(&params("prod"), t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::AccessDenied { .. }));
}

#[tokio::test]
async fn an_expired_approval_does_not_override() {
    let h = harness(deny_all_policy("approval required"));

    let mut request =
        keygate_core::models::AccessRequest::new("alice", "prod", "hotfix", 3600, t0()).unwrap();
    request.status = RequestStatus::Approved;
    request.approver = "lead".to_string();
    request.expires_at = t0() - SignedDuration::from_secs(1);
    h.requests.create(&request).await.unwrap();

    let err = h.broker().issue(&params("prod"), t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::AccessDenied { .. }));
}

#[tokio::test]
async fn a_breakglass_override_caps_the_duration_at_the_remaining_window() {
    let h = harness(deny_all_policy("approval required"));

    // Active event with 20 minutes left at issuance time.
    let opened_at = t0() - SignedDuration::from_secs(400);
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&h.breakglass, &h.log, &notifier);
    let event = workflow
        .invoke("alice", "prod", ReasonCode::Incident, "db failover", 1600, None, opened_at)
        .await
        .unwrap();

    let mut params = params("prod");
    params.requested_duration_secs = Some(7200);
    let outcome = h.broker().issue(&params, t0()).await.unwrap();

    assert_eq!(outcome.duration_secs, 1200);
    assert_eq!(
        outcome.override_source,
        Some(OverrideSource::BreakGlass(event.id.clone()))
    );
    assert_eq!(h.issuer.issued()[0].duration_secs, 1200);
    assert_eq!(audit_events(&h.log).last().unwrap()["breakglass_event_id"], event.id);
}

#[tokio::test]
async fn a_breakglass_override_with_no_ask_gets_the_remaining_time() {
    let h = harness(deny_all_policy("approval required"));

    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&h.breakglass, &h.log, &notifier);
    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "db failover", 900, None, t0())
        .await
        .unwrap();

    let outcome = h.broker().issue(&params("prod"), t0()).await.unwrap();
    assert_eq!(outcome.duration_secs, 900);
}

#[tokio::test]
async fn approved_request_takes_precedence_over_breakglass() {
    let h = harness(deny_all_policy("approval required"));

    let mut request =
        keygate_core::models::AccessRequest::new("alice", "prod", "hotfix", 3600, t0()).unwrap();
    request.status = RequestStatus::Approved;
    request.approver = "lead".to_string();
    h.requests.create(&request).await.unwrap();

    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&h.breakglass, &h.log, &notifier);
    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "also open", 1800, None, t0())
        .await
        .unwrap();

    let outcome = h.broker().issue(&params("prod"), t0()).await.unwrap();
    assert!(matches!(
        outcome.override_source,
        Some(OverrideSource::ApprovedRequest(_))
    ));
}

#[tokio::test]
async fn unknown_profiles_fail_fast() {
    let h = harness(allow_profile_policy("dev"));

    let err = h
        .broker()
        .issue(&params("does-not-exist"), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownProfile(_)));
    assert!(h.issuer.issued().is_empty());
}

#[tokio::test]
async fn a_dead_policy_plane_denies_with_an_audited_diagnostic() {
    let h = harness_with(FailingPolicyFetcher);

    let err = h.broker().issue(&params("dev"), t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Policy(_)));

    let events = audit_events(&h.log);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "credentials.deny");
    assert!(
        events[0]["reason"]
            .as_str()
            .unwrap()
            .contains("policy unavailable")
    );
    assert!(h.issuer.issued().is_empty());
}

#[tokio::test]
async fn a_revoked_session_lineage_fails_closed() {
    let h = harness(allow_profile_policy("dev"));

    let outcome = h.broker().issue(&params("dev"), t0()).await.unwrap();

    let notifier = RecordingNotifier::new();
    let plane = SessionPlane::new(&h.sessions, &h.log, &notifier);
    plane
        .revoke(&outcome.request_id, "security-team", "device compromised", t0())
        .await
        .unwrap();

    let mut params = params("dev");
    params.session_id = Some(outcome.request_id.clone());
    let err = h.broker().issue(&params, t0()).await.unwrap_err();

    match &err {
        BrokerError::AccessDenied { reason } => {
            assert!(reason.contains("revoked"), "got: {reason}");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }
    // The denial itself is audited.
    assert_eq!(audit_events(&h.log).last().unwrap()["event"], "credentials.deny");
    // Only the first issuance reached STS.
    assert_eq!(h.issuer.issued().len(), 1);
}

#[tokio::test]
async fn an_active_session_lineage_is_reused_and_touched() {
    let h = harness(allow_profile_policy("dev"));

    let first = h.broker().issue(&params("dev"), t0()).await.unwrap();

    let mut params = params("dev");
    params.session_id = Some(first.request_id.clone());
    let later = t0() + SignedDuration::from_secs(60);
    let second = h.broker().issue(&params, later).await.unwrap();

    assert_eq!(second.request_id, first.request_id);
    let session = h.sessions.get(&first.request_id).await.unwrap();
    assert_eq!(session.request_count, 1);
    assert_eq!(session.last_access_at, later);
}

#[tokio::test]
async fn no_session_flag_skips_the_session_row() {
    let h = harness(allow_profile_policy("dev"));

    let mut params = params("dev");
    params.no_session = true;
    let outcome = h.broker().issue(&params, t0()).await.unwrap();

    assert!(!outcome.session_recorded);
    assert!(h.sessions.get(&outcome.request_id).await.is_err());
}

#[tokio::test]
async fn device_ids_are_validated_and_stamped_on_the_session() {
    let h = harness(allow_profile_policy("dev"));

    let mut issue_params = params("dev");
    issue_params.device_id = Some("e".repeat(64));
    let outcome = h.broker().issue(&issue_params, t0()).await.unwrap();

    let session = h.sessions.get(&outcome.request_id).await.unwrap();
    assert_eq!(session.device_id.as_deref(), Some("e".repeat(64).as_str()));

    let mut bad = params("dev");
    bad.device_id = Some("short".to_string());
    assert!(h.broker().issue(&bad, t0()).await.is_err());
}

#[tokio::test]
async fn audit_failure_is_fatal_on_the_allow_path() {
    let h = harness(allow_profile_policy("dev"));
    let failing = FailingAuditSink;
    let broker = CredentialBroker::new(
        &h.identity,
        &h.issuer,
        &h.cache,
        "/keygate/policy",
        &h.registry,
        &h.requests,
        &h.breakglass,
        &h.sessions,
        &failing,
    );

    let err = broker.issue(&params("dev"), t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Audit(_)));
}

#[tokio::test]
async fn audit_failure_is_fatal_on_the_deny_path_too() {
    let h = harness(deny_all_policy("locked"));
    let failing = FailingAuditSink;
    let broker = CredentialBroker::new(
        &h.identity,
        &h.issuer,
        &h.cache,
        "/keygate/policy",
        &h.registry,
        &h.requests,
        &h.breakglass,
        &h.sessions,
        &failing,
    );

    let err = broker.issue(&params("prod"), t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Audit(_)));
    assert!(h.issuer.issued().is_empty());
}

#[tokio::test]
async fn oversized_duration_requests_are_rejected() {
    let h = harness(allow_profile_policy("dev"));

    let mut params = params("dev");
    params.requested_duration_secs = Some(100_000);
    let err = h.broker().issue(&params, t0()).await.unwrap_err();
    assert!(matches!(err, BrokerError::Validation(_)));
    assert!(h.issuer.issued().is_empty());
}
