//! Offline queue replay tests
//!
//! Mutations recorded while offline are replayed in order, exactly once,
//! against the scripted remote.

use crate::common::*;
use crate::{assert_contains, assert_drain, assert_ok};
use kioku::client::local_db::LocalDatabase;
use kioku::client::offline::{
    DrainOutcome, MutationPayload, MutationStatus, NewMutation, PendingMutation,
    PendingMutationQueue, QueueProcessor,
};
use kioku::client::remote::{RemoteError, RemoteService};
use kioku::client::sync::{DeadLetterPolicy, SyncStateHandle};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Harness {
    db: LocalDatabase,
    queue: PendingMutationQueue,
    remote: Arc<ScriptedRemote>,
    state: SyncStateHandle,
    processor: QueueProcessor,
}

/// Subjects 1 to 3 at stage 1, known locally and on the server
async fn harness(policy: DeadLetterPolicy) -> Harness {
    let db = memory_db().await;
    let remote = Arc::new(ScriptedRemote::new());
    remote.set_clock(ts(2, 0));

    let assignments: Vec<_> = (1..=3).map(|id| assignment(id, 1, ts(1, 0))).collect();
    for a in &assignments {
        remote.put_assignment(a.clone());
    }
    seed_assignments(&db, assignments).await;

    let state = SyncStateHandle::new();
    let service: Arc<dyn RemoteService> = remote.clone();
    let processor = QueueProcessor::new(db.clone(), service, no_backoff(), policy, state.clone());

    Harness {
        queue: PendingMutationQueue::new(db.clone()),
        db,
        remote,
        state,
        processor,
    }
}

impl Harness {
    async fn grade(&self, subject_id: i64, incorrect: u32) -> PendingMutation {
        let payload = MutationPayload::review_grade(incorrect, 0, ts(1, 10));
        assert_ok!(self.queue.enqueue(NewMutation::new(subject_id, payload)).await)
    }

    fn applied_subjects(&self) -> Vec<i64> {
        self.remote.applied().iter().map(|s| s.subject_id).collect()
    }
}

#[tokio::test]
async fn test_replay_preserves_order_across_timeout() {
    let h = harness(DeadLetterPolicy::Halt).await;
    let a = h.grade(1, 0).await;
    let b = h.grade(2, 0).await;
    let c = h.grade(3, 0).await;
    assert!(a.sequence < b.sequence && b.sequence < c.sequence);

    h.remote.script_submissions([
        SubmitStep::Accept,
        SubmitStep::Fail(RemoteError::Network("timed out".to_string())),
    ]);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Deferred { .. });
    assert_eq!(report.submitted, 1);
    assert_eq!(h.applied_subjects(), vec![1]);
    // C was never attempted while B is unresolved
    assert_eq!(h.remote.attempts(), vec![a.idempotency_key, b.idempotency_key]);

    let queued = assert_ok!(h.queue.list().await);
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].sequence, b.sequence);
    assert_eq!(queued[0].status, MutationStatus::FailedRetryable);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(queued[1].status, MutationStatus::Pending);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(report.submitted, 2);
    assert_eq!(h.applied_subjects(), vec![1, 2, 3]);
    assert_eq!(assert_ok!(h.queue.pending_count().await), 0);
}

#[tokio::test]
async fn test_lost_response_is_applied_once() {
    let h = harness(DeadLetterPolicy::Halt).await;
    let grade = h.grade(1, 0).await;
    h.remote.script_submissions([SubmitStep::LoseResponse]);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Deferred { .. });
    assert_eq!(h.remote.applied().len(), 1);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.remote.applied().len(), 1);
    assert_eq!(
        h.remote.attempts(),
        vec![grade.idempotency_key, grade.idempotency_key]
    );

    // Canonical state from the receipt, overlay cleared
    let view = assert_ok!(h.db.get_assignment(1).await).expect("assignment stored");
    assert!(!view.pending);
    assert_eq!(view.assignment.srs_stage, 2);
    assert_eq!(view.assignment.data_updated_at, ts(2, 0) + chrono::TimeDelta::seconds(1));
}

#[tokio::test]
async fn test_optimistic_display_until_acknowledged() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;

    let view = assert_ok!(h.db.get_assignment(1).await).expect("assignment stored");
    assert!(view.pending);
    assert_eq!(view.assignment.srs_stage, 2);

    let canonical = assert_ok!(h.db.get_canonical_assignment(1).await).expect("assignment stored");
    assert_eq!(canonical.srs_stage, 1);

    h.processor.process_queue().await;
    let view = assert_ok!(h.db.get_assignment(1).await).expect("assignment stored");
    assert!(!view.pending);
    assert_eq!(view.assignment.srs_stage, 2);
}

#[tokio::test]
async fn test_dead_letter_blocks_until_skipped() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;
    let b = h.grade(2, 1).await;
    h.grade(3, 0).await;

    h.remote.script_submissions([
        SubmitStep::Accept,
        SubmitStep::Fail(RemoteError::Validation {
            status: Some(422),
            message: "review not available".to_string(),
        }),
    ]);

    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Blocked { sequence: b.sequence });
    assert_eq!(report.dead_lettered, 1);

    // Still blocked, nothing new attempted
    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Blocked { sequence: b.sequence });
    assert_eq!(h.remote.attempts().len(), 2);

    // Dead letter no longer shapes the display
    let view = assert_ok!(h.db.get_assignment(2).await).expect("assignment stored");
    assert!(!view.pending);
    assert_eq!(view.assignment.srs_stage, 1);

    assert!(assert_ok!(h.queue.skip_dead_letter(b.sequence).await));
    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.applied_subjects(), vec![1, 3]);

    let letters = assert_ok!(h.queue.dead_letters().await);
    assert_eq!(letters.len(), 1);
    assert!(letters[0].skipped);
    assert_contains!(letters[0].last_error.clone().unwrap_or_default(), "review not available");
}

#[tokio::test]
async fn test_skip_policy_passes_dead_letters() {
    let h = harness(DeadLetterPolicy::Skip).await;
    h.grade(1, 0).await;
    h.grade(2, 0).await;
    h.remote.script_submissions([SubmitStep::Fail(RemoteError::Validation {
        status: Some(422),
        message: "gone".to_string(),
    })]);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(report.submitted, 1);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(h.applied_subjects(), vec![2]);
    assert_eq!(assert_ok!(h.queue.dead_letters().await).len(), 1);
}

#[tokio::test]
async fn test_requeue_and_discard_dead_letters() {
    let h = harness(DeadLetterPolicy::Halt).await;
    let a = h.grade(1, 0).await;
    let rejected = || {
        SubmitStep::Fail(RemoteError::Validation {
            status: Some(422),
            message: "try later".to_string(),
        })
    };
    h.remote.script_submissions([rejected()]);
    h.processor.process_queue().await;

    assert!(assert_ok!(h.queue.requeue_dead_letter(a.sequence).await));
    let view = assert_ok!(h.db.get_assignment(1).await).expect("assignment stored");
    assert!(view.pending);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.applied_subjects(), vec![1]);

    let b = h.grade(2, 0).await;
    h.remote.script_submissions([rejected()]);
    h.processor.process_queue().await;
    assert!(assert_ok!(h.queue.discard_dead_letter(b.sequence).await));
    assert!(!assert_ok!(h.queue.discard_dead_letter(b.sequence).await));
    assert!(assert_ok!(h.queue.list().await).is_empty());
}

#[tokio::test]
async fn test_conflict_repulls_assignment_then_retries() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;

    // Server moved on while the client was offline
    h.remote.put_assignment(assignment(1, 4, ts(1, 30)));
    h.remote.script_submissions([SubmitStep::Fail(RemoteError::Conflict {
        message: "stale stage".to_string(),
    })]);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Deferred { .. });

    let canonical = assert_ok!(h.db.get_canonical_assignment(1).await).expect("assignment stored");
    assert_eq!(canonical.srs_stage, 4);
    assert_eq!(canonical.data_updated_at, ts(1, 30));

    // The unacknowledged grade still takes priority over the pulled value
    let view = assert_ok!(h.db.get_assignment(1).await).expect("assignment stored");
    assert!(view.pending);

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.remote.assignment(1).map(|a| a.srs_stage), Some(5));
}

#[tokio::test]
async fn test_auth_failure_halts_without_counting_attempt() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;
    h.remote.script_submissions([SubmitStep::Fail(RemoteError::Auth { status: 401 })]);

    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Halted);
    assert!(h.state.auth_required());

    let queued = assert_ok!(h.queue.list().await);
    assert_eq!(queued[0].status, MutationStatus::Pending);
    assert_eq!(queued[0].attempts, 0);

    // Nothing is attempted until the user signs in again
    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Halted);
    assert_eq!(h.remote.attempts().len(), 1);

    h.state.clear_auth();
    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.applied_subjects(), vec![1]);
}

#[tokio::test]
async fn test_lesson_start_resolves_assignment_id() {
    let h = harness(DeadLetterPolicy::Halt).await;
    let lesson = assignment(7, 0, ts(1, 0));
    h.remote.put_assignment(lesson.clone());
    seed_assignments(&h.db, vec![lesson]).await;

    let queued = assert_ok!(
        h.queue
            .enqueue(NewMutation::new(7, MutationPayload::lesson_start(ts(1, 5))))
            .await
    );
    assert_eq!(queued.assignment_id, Some(70));

    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    let applied = h.remote.applied();
    assert_eq!(applied[0].assignment_id, Some(70));

    let canonical = assert_ok!(h.db.get_canonical_assignment(7).await).expect("assignment stored");
    assert_eq!(canonical.srs_stage, 1);
    assert_eq!(canonical.started_at, Some(ts(1, 5)));
}

#[tokio::test]
async fn test_cancel_only_stops_drains_already_started() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;

    // Nothing was running; the next drain is unaffected
    h.processor.cancel();
    let report = h.processor.process_queue().await;
    assert_drain!(report, DrainOutcome::Drained);
    assert_eq!(h.applied_subjects(), vec![1]);
}

#[tokio::test]
async fn test_closed_processor_submits_nothing() {
    let h = harness(DeadLetterPolicy::Halt).await;
    h.grade(1, 0).await;

    h.processor.close();
    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Cancelled);
    assert!(h.remote.attempts().is_empty());
    assert_eq!(assert_ok!(h.queue.pending_count().await), 1);
}
