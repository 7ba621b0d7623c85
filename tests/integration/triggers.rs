//! Trigger and dispatcher tests
//!
//! Lifecycle timing is driven through `TriggerPolicy` with explicit clocks;
//! the dispatcher is driven through a `TriggerHub` channel.

use crate::common::*;
use chrono::{DateTime, TimeDelta, Utc};
use kioku::client::offline::QueueProcessor;
use kioku::client::remote::{RemoteService, ResourceItems};
use kioku::client::sync::{
    LifecycleEvent, SyncConfig, SyncDispatcher, SyncOrchestrator, SyncRequest, SyncStateHandle,
    TriggerHub, TriggerPolicy,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

/// Every request the policy emits while a one-minute ticker runs from
/// `from` to `to` and `events` are applied at their times
fn requests_between(
    policy: &mut TriggerPolicy,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    events: &[(DateTime<Utc>, LifecycleEvent)],
) -> Vec<(DateTime<Utc>, SyncRequest)> {
    let mut emitted = Vec::new();
    let mut now = from;
    while now <= to {
        for (at, event) in events.iter().filter(|(at, _)| *at == now) {
            if let Some(request) = policy.handle(*event, *at) {
                emitted.push((now, request));
            }
        }
        if let Some(request) = policy.on_hour_boundary(now) {
            emitted.push((now, request));
        }
        now += TimeDelta::minutes(1);
    }
    emitted
}

#[test]
fn test_boundary_missed_in_background_syncs_once_on_return() {
    let mut policy = TriggerPolicy::new(&SyncConfig::default());
    policy.start(ts(13, 0));
    assert_eq!(policy.next_hourly_due(), Some(ts(14, 0)));

    let emitted = requests_between(
        &mut policy,
        ts(13, 40),
        ts(14, 30),
        &[
            (ts(13, 50), LifecycleEvent::Background),
            (ts(14, 5), LifecycleEvent::Foreground),
        ],
    );

    assert_eq!(emitted, vec![(ts(14, 5), SyncRequest::Quick)]);
    assert_eq!(policy.next_hourly_due(), Some(ts(15, 0)));
}

#[test]
fn test_short_background_spell_syncs_only_for_foreground() {
    let mut policy = TriggerPolicy::new(&SyncConfig::default());
    policy.start(ts(13, 0));

    // Left and came back before the boundary: the foreground trigger alone
    let emitted = requests_between(
        &mut policy,
        ts(13, 10),
        ts(14, 0),
        &[
            (ts(13, 20), LifecycleEvent::Background),
            (ts(13, 25), LifecycleEvent::Foreground),
        ],
    );
    assert_eq!(
        emitted,
        vec![(ts(13, 25), SyncRequest::Quick), (ts(14, 0), SyncRequest::Quick)]
    );
}

#[test]
fn test_rapid_foreground_and_focus_are_debounced() {
    let mut policy = TriggerPolicy::new(&SyncConfig::default());
    policy.start(ts(9, 0));
    let second = |s: i64| ts(9, 0) + TimeDelta::seconds(s);

    assert_eq!(policy.handle(LifecycleEvent::Foreground, second(1)), Some(SyncRequest::Quick));
    assert_eq!(policy.handle(LifecycleEvent::Background, second(5)), None);
    assert_eq!(policy.handle(LifecycleEvent::Foreground, second(10)), None);
    assert_eq!(policy.handle(LifecycleEvent::ViewFocused, second(11)), Some(SyncRequest::Quick));
    assert_eq!(policy.handle(LifecycleEvent::ViewFocused, second(20)), None);
    assert_eq!(policy.handle(LifecycleEvent::Foreground, second(40)), Some(SyncRequest::Quick));
    assert_eq!(policy.handle(LifecycleEvent::ManualRefresh, second(41)), Some(SyncRequest::Full));
}

struct Engine {
    remote: Arc<ScriptedRemote>,
    orchestrator: Arc<SyncOrchestrator>,
    processor: Arc<QueueProcessor>,
}

async fn engine() -> Engine {
    let db = memory_db().await;
    let remote = Arc::new(ScriptedRemote::new());
    remote.set_user(user(ts(1, 0)));
    remote.set_items(ResourceItems::Subjects(vec![subject(1, ts(1, 0))]));

    let config = test_config();
    let state = SyncStateHandle::new();
    let service: Arc<dyn RemoteService> = remote.clone();
    let processor = Arc::new(QueueProcessor::new(
        db.clone(),
        Arc::clone(&service),
        config.backoff.clone(),
        config.dead_letter_policy,
        state.clone(),
    ));
    let orchestrator = Arc::new(SyncOrchestrator::new(db, service, config, state));
    Engine {
        remote,
        orchestrator,
        processor,
    }
}

async fn wait_for_runs(orchestrator: &SyncOrchestrator, runs: u64) {
    for _ in 0..200 {
        let metrics = orchestrator.metrics().await;
        if metrics.total_syncs >= runs && !orchestrator.is_syncing() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} run(s)", runs);
}

#[tokio::test]
async fn test_dispatcher_coalesces_a_burst_into_one_run() {
    let engine = engine().await;
    let (hub, requests) = TriggerHub::new(&test_config());
    let dispatcher = SyncDispatcher::new(
        Arc::clone(&engine.orchestrator),
        Arc::clone(&engine.processor),
        requests,
    );

    // Queued before the dispatcher gets to run
    hub.handle_at(LifecycleEvent::ViewFocused, ts(9, 0)).await;
    hub.handle_at(LifecycleEvent::ManualRefresh, ts(9, 0)).await;
    hub.handle_at(LifecycleEvent::ManualRefresh, ts(9, 0)).await;
    let dispatcher = dispatcher.spawn();

    wait_for_runs(&engine.orchestrator, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let metrics = engine.orchestrator.metrics().await;
    assert_eq!(metrics.total_syncs, 1);
    assert_eq!(metrics.successful_syncs, 1);

    // The single run was the full refresh: subjects were verified
    let count_queries = engine
        .remote
        .fetches(kioku::shared::Resource::Subjects)
        .into_iter()
        .filter(|q| q.page_size == 1)
        .count();
    assert_eq!(count_queries, 1);

    drop(hub);
    tokio::time::timeout(Duration::from_secs(5), dispatcher)
        .await
        .expect("dispatcher stops once the hub is gone")
        .expect("dispatcher task");
}

#[tokio::test]
async fn test_dispatch_drains_before_pulling() {
    let engine = engine().await;
    let (_hub, requests) = TriggerHub::new(&test_config());
    let dispatcher = SyncDispatcher::new(
        Arc::clone(&engine.orchestrator),
        Arc::clone(&engine.processor),
        requests,
    );

    let (drain, outcome) = dispatcher.dispatch(SyncRequest::Quick).await;
    assert_eq!(drain.submitted, 0);
    let report = outcome.report().expect("quick sync ran");
    assert!(report.is_success());
}
