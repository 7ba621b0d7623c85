//! Durability tests
//!
//! Queue, overlay and cursors live in the database file and survive a
//! restart of the process.

use crate::assert_ok;
use crate::common::*;
use kioku::client::local_db::sync::Checkpoint;
use kioku::client::offline::{MutationPayload, MutationStatus, NewMutation, PendingMutationQueue};
use kioku::client::remote::ResourceItems;
use kioku::shared::Resource;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_queue_and_cursors_survive_reopen() {
    let file = FileDatabase::new();
    let (first, second) = {
        let db = file.open().await;
        seed_assignments(&db, vec![assignment(1, 1, ts(1, 0)), assignment(2, 3, ts(1, 0))]).await;
        let queue = PendingMutationQueue::new(db.clone());
        let first = assert_ok!(
            queue
                .enqueue(NewMutation::new(1, MutationPayload::review_grade(0, 0, ts(1, 10))))
                .await
        );
        let second = assert_ok!(
            queue
                .enqueue(NewMutation::new(2, MutationPayload::review_grade(1, 0, ts(1, 11))))
                .await
        );
        assert_ok!(
            db.commit_page(
                &ResourceItems::Subjects(vec![subject(1, ts(1, 0)), subject(2, ts(1, 5))]),
                &Checkpoint::Resume {
                    token: "2".to_string(),
                    watermark: Some(ts(1, 5)),
                },
            )
            .await
        );
        (first, second)
    };

    let db = file.open().await;
    let queued = assert_ok!(db.list_mutations().await);
    assert_eq!(queued, vec![first.clone(), second.clone()]);

    // Overlay is stored, not recomputed in memory
    let view = assert_ok!(db.get_assignment(1).await).expect("assignment stored");
    assert!(view.pending);
    assert_eq!(view.assignment.srs_stage, 2);

    let cursor = assert_ok!(db.cursor_state(Resource::Subjects).await);
    assert_eq!(cursor.cursor, None);
    assert_eq!(cursor.resume_token.as_deref(), Some("2"));
    assert_eq!(cursor.pass_watermark, Some(ts(1, 5)));

    // Sequence keeps growing across restarts
    let queue = PendingMutationQueue::new(db.clone());
    let third = assert_ok!(
        queue
            .enqueue(NewMutation::new(1, MutationPayload::review_grade(0, 0, ts(1, 20))))
            .await
    );
    assert!(third.sequence > second.sequence);
}

#[tokio::test]
async fn test_in_flight_mutation_recovered_after_crash() {
    let file = FileDatabase::new();
    let sequence = {
        let db = file.open().await;
        seed_assignments(&db, vec![assignment(1, 1, ts(1, 0))]).await;
        let queued = assert_ok!(
            PendingMutationQueue::new(db.clone())
                .enqueue(NewMutation::new(1, MutationPayload::lesson_start(ts(1, 0))))
                .await
        );
        assert_ok!(db.mark_in_flight(queued.sequence).await);
        queued.sequence
    };

    let db = file.open().await;
    let stuck = assert_ok!(db.get_mutation(sequence).await).expect("mutation kept");
    assert_eq!(stuck.status, MutationStatus::InFlight);

    assert_eq!(assert_ok!(db.recover_in_flight().await), 1);
    let recovered = assert_ok!(db.get_mutation(sequence).await).expect("mutation kept");
    assert_eq!(recovered.status, MutationStatus::Pending);
    assert_eq!(recovered.idempotency_key, stuck.idempotency_key);
    assert_eq!(recovered.attempts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pulls_and_enqueues_all_commit() {
    let file = FileDatabase::new();
    let db = file.open().await;
    seed_assignments(&db, (1..=5).map(|id| assignment(id, 1, ts(1, 0))).collect()).await;

    let puller = {
        let db = db.clone();
        tokio::spawn(async move {
            let mut failures = Vec::new();
            for round in 0..100i64 {
                let page = ResourceItems::Assignments(
                    (1..=5)
                        .map(|id| assignment(id, 1, ts(2, 0) + chrono::TimeDelta::seconds(round)))
                        .collect(),
                );
                if let Err(e) = db.commit_page(&page, &Checkpoint::None).await {
                    failures.push(e.to_string());
                }
            }
            failures
        })
    };
    let recorder = {
        let queue = PendingMutationQueue::new(db.clone());
        tokio::spawn(async move {
            let mut failures = Vec::new();
            for round in 0..100i64 {
                let payload = MutationPayload::review_grade(0, 0, ts(3, 0));
                if let Err(e) = queue.enqueue(NewMutation::new(round % 5 + 1, payload)).await {
                    failures.push(e.to_string());
                }
            }
            failures
        })
    };

    let pull_failures = puller.await.expect("pull task");
    let enqueue_failures = recorder.await.expect("enqueue task");
    assert_eq!(pull_failures, Vec::<String>::new());
    assert_eq!(enqueue_failures, Vec::<String>::new());
    assert_eq!(assert_ok!(db.list_mutations().await).len(), 100);
}
