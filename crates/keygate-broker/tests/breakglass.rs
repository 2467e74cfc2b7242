//! Break-glass workflow: single-active invariant, duration cap, close
//! lifecycle, write-first notification.

mod common;

use common::{FailingNotifier, RecordingNotifier, audit_events, audit_log, t0};
use jiff::SignedDuration;
use keygate_broker::{BreakGlassWorkflow, BrokerError};
use keygate_core::models::breakglass::MAX_DURATION;
use keygate_core::models::{BreakGlassStatus, ReasonCode};
use keygate_store::{BreakGlassStore, MemoryBreakGlassStore};

#[tokio::test]
async fn invoke_opens_an_active_event_and_notifies() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let event = workflow
        .invoke(
            "alice",
            "prod",
            ReasonCode::Incident,
            "db failover",
            1800,
            None,
            t0(),
        )
        .await
        .unwrap();

    assert_eq!(event.status, BreakGlassStatus::Active);
    assert_eq!(event.expires_at, t0() + SignedDuration::from_secs(1800));

    let events = audit_events(&log);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "breakglass.invoke");
    assert_eq!(events[0]["profile"], "prod");

    assert_eq!(
        notifier.seen(),
        vec![format!("breakglass-invoked:{}", event.id)]
    );
}

#[tokio::test]
async fn second_active_event_for_the_same_pair_is_refused() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "one", 1800, None, t0())
        .await
        .unwrap();

    let err = workflow
        .invoke("alice", "prod", ReasonCode::Security, "two", 1800, None, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::DuplicateActive { .. }));

    // A different profile or invoker is unaffected.
    workflow
        .invoke("alice", "staging", ReasonCode::Incident, "x", 600, None, t0())
        .await
        .unwrap();
    workflow
        .invoke("bob", "prod", ReasonCode::Incident, "y", 600, None, t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn an_expired_event_does_not_block_a_new_invocation() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "one", 600, None, t0())
        .await
        .unwrap();

    let later = t0() + SignedDuration::from_secs(601);
    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "two", 600, None, later)
        .await
        .unwrap();
}

#[tokio::test]
async fn durations_above_the_cap_are_clamped() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let event = workflow
        .invoke(
            "alice",
            "prod",
            ReasonCode::Recovery,
            "long restore",
            MAX_DURATION.as_secs() * 3,
            None,
            t0(),
        )
        .await
        .unwrap();

    assert_eq!(event.duration_secs, MAX_DURATION.as_secs());
    assert_eq!(event.expires_at, t0() + MAX_DURATION);
}

#[tokio::test]
async fn close_records_who_and_why() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let event = workflow
        .invoke("alice", "prod", ReasonCode::Incident, "db failover", 1800, None, t0())
        .await
        .unwrap();

    let closed = workflow
        .close(&event.id, "alice", "incident resolved", t0())
        .await
        .unwrap();
    assert_eq!(closed.status, BreakGlassStatus::Closed);
    assert_eq!(closed.closed_by, "alice");
    assert_eq!(closed.closed_reason, "incident resolved");

    assert_eq!(audit_events(&log).last().unwrap()["event"], "breakglass.close");

    // Closing again is illegal, and the pair may break glass anew.
    let err = workflow.close(&event.id, "alice", "again", t0()).await.unwrap_err();
    assert!(err.is_invalid_transition());
    workflow
        .invoke("alice", "prod", ReasonCode::Incident, "round two", 600, None, t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn closing_an_overdue_event_expires_it_instead() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let event = workflow
        .invoke("alice", "prod", ReasonCode::Incident, "x", 600, None, t0())
        .await
        .unwrap();

    let later = t0() + SignedDuration::from_secs(3600);
    let err = workflow.close(&event.id, "alice", "late", later).await.unwrap_err();
    assert!(err.is_invalid_transition());

    let persisted = store.get(&event.id).await.unwrap();
    assert_eq!(persisted.status, BreakGlassStatus::Expired);
}

#[tokio::test]
async fn a_failing_notifier_does_not_fail_the_invocation() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = FailingNotifier;
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let event = workflow
        .invoke("alice", "prod", ReasonCode::Incident, "db failover", 600, None, t0())
        .await
        .unwrap();

    // Write-first: the row and the audit entry exist regardless.
    assert!(store.get(&event.id).await.is_ok());
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn single_active_invariant_holds_across_a_burst() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let results = tokio::join!(
        workflow.invoke("alice", "prod", ReasonCode::Incident, "a", 600, None, t0()),
        workflow.invoke("alice", "prod", ReasonCode::Incident, "b", 600, None, t0()),
        workflow.invoke("alice", "prod", ReasonCode::Incident, "c", 600, None, t0()),
    );
    let successes = [results.0.is_ok(), results.1.is_ok(), results.2.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(successes, 1);

    let active = store
        .list_by_status(BreakGlassStatus::Active, 50)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn listing_filters_by_status_and_time_range() {
    let store = MemoryBreakGlassStore::new();
    let log = audit_log();
    let notifier = RecordingNotifier::new();
    let workflow = BreakGlassWorkflow::new(&store, &log, &notifier);

    let first = workflow
        .invoke("alice", "prod", ReasonCode::Incident, "a", 600, None, t0())
        .await
        .unwrap();
    workflow.close(&first.id, "alice", "done", t0()).await.unwrap();

    let later = t0() + SignedDuration::from_hours(2);
    workflow
        .invoke("alice", "prod", ReasonCode::Maintenance, "b", 600, None, later)
        .await
        .unwrap();

    let closed = workflow.list_by_status(BreakGlassStatus::Closed, 50).await.unwrap();
    assert_eq!(closed.len(), 1);

    let recent = workflow
        .list_in_range(later, later + SignedDuration::from_secs(1), 50)
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].reason_code, ReasonCode::Maintenance);
}
