//! Session tests
//!
//! The session wires store, queue, triggers and dispatcher together; these
//! tests go through its public surface only.

use crate::assert_ok;
use crate::common::*;
use kioku::client::offline::MutationStatus;
use kioku::client::remote::ResourceItems;
use kioku::client::sync::{LifecycleEvent, SyncRequest, SyncStatus};
use kioku::client::Session;
use kioku::shared::Resource;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn remote() -> Arc<ScriptedRemote> {
    let remote = Arc::new(ScriptedRemote::new());
    remote.set_user(user(ts(1, 0)));
    remote.set_items(ResourceItems::Subjects(vec![subject(1, ts(1, 0)), subject(2, ts(1, 1))]));
    remote.put_assignment(assignment(1, 1, ts(1, 0)));
    remote
}

#[tokio::test]
async fn test_recorded_review_is_submitted_in_background() {
    let db = memory_db().await;
    seed_assignments(&db, vec![assignment(1, 1, ts(1, 0))]).await;
    let remote = remote();
    let session = assert_ok!(Session::start_with_database(db, remote.clone(), test_config()).await);

    let recorded = assert_ok!(session.record_review(1, 0, 0).await);
    assert_eq!(recorded.subject_id, 1);

    for _ in 0..200 {
        if assert_ok!(session.queue().pending_count().await) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(assert_ok!(session.queue().pending_count().await), 0);

    let applied = remote.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].idempotency_key, recorded.idempotency_key);

    let activity = assert_ok!(session.database().daily_activity(chrono::Utc::now().date_naive()).await);
    assert_eq!(activity.reviews, 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_manual_refresh_runs_full_refresh() {
    let session = assert_ok!(Session::start_with_database(memory_db().await, remote(), test_config()).await);
    session.notify(LifecycleEvent::ManualRefresh).await;

    // Only a full refresh records a verified total
    for _ in 0..200 {
        let cursor = assert_ok!(session.database().cursor_state(Resource::Subjects).await);
        if cursor.last_total.is_some() && !session.orchestrator().is_syncing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let cursor = assert_ok!(session.database().cursor_state(Resource::Subjects).await);
    assert_eq!(cursor.last_total, Some(2));
    assert_eq!(session.state().snapshot().status, SyncStatus::Complete);
    session.state().settle();
    assert_eq!(session.state().snapshot().status, SyncStatus::Idle);
    assert_eq!(session.orchestrator().metrics().await.successful_syncs, 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_logout_clears_local_store() {
    let session = assert_ok!(Session::start_with_database(memory_db().await, remote(), test_config()).await);
    let db = session.database().clone();

    let (_, outcome) = session.sync_now(SyncRequest::Quick).await;
    assert!(outcome.report().is_some_and(|r| r.is_success()));
    assert_eq!(assert_ok!(db.get_stats().await).subject_count, 2);

    assert_ok!(session.logout().await);

    let stats = assert_ok!(db.get_stats().await);
    assert_eq!(stats.subject_count, 0);
    assert_eq!(stats.assignment_count, 0);
    assert!(assert_ok!(db.get_user().await).is_none());
    assert_eq!(assert_ok!(db.cursor_state(Resource::Subjects).await).cursor, None);
}

#[tokio::test]
async fn test_auth_halt_until_resumed() {
    let remote = remote();
    remote.fail_next_page(
        Resource::Subjects,
        kioku::client::RemoteError::Auth { status: 401 },
    );
    let session = assert_ok!(Session::start_with_database(memory_db().await, remote, test_config()).await);

    let (_, outcome) = session.sync_now(SyncRequest::Quick).await;
    assert!(outcome.report().is_some_and(|r| !r.is_success()));
    assert!(session.state().auth_required());

    let (drain, outcome) = session.sync_now(SyncRequest::Quick).await;
    assert_eq!(drain.outcome, kioku::client::offline::DrainOutcome::Halted);
    assert_eq!(outcome, kioku::client::sync::SyncOutcome::AuthRequired);

    session.resume_after_auth();
    let (_, outcome) = session.sync_now(SyncRequest::Quick).await;
    assert!(outcome.report().is_some_and(|r| r.is_success()));
    session.shutdown().await;
}

#[tokio::test]
async fn test_logout_waits_for_background_submission() {
    let db = memory_db().await;
    seed_assignments(&db, vec![assignment(1, 1, ts(1, 0))]).await;
    let remote = remote();
    remote.set_submit_delay(Duration::from_millis(200));
    let session = assert_ok!(Session::start_with_database(db.clone(), remote.clone(), test_config()).await);

    let recorded = assert_ok!(session.record_review(1, 0, 0).await);
    for _ in 0..200 {
        let status = assert_ok!(db.get_mutation(recorded.sequence).await).map(|m| m.status);
        if status == Some(MutationStatus::InFlight) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_ok!(session.logout().await);
    assert_eq!(assert_ok!(db.get_stats().await).assignment_count, 0);

    // The acknowledgment landed before the reset, not after it
    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = assert_ok!(db.get_stats().await);
    assert_eq!(stats.assignment_count, 0);
    assert_eq!(stats.pending_mutations, 0);
    assert_eq!(remote.applied().len(), 1);
}
