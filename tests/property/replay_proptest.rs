//! Property-based tests for queue replay under unreliable delivery

use crate::common::*;
use kioku::client::offline::{
    DrainOutcome, MutationPayload, NewMutation, PendingMutationQueue, QueueProcessor,
};
use kioku::client::remote::{RemoteError, RemoteService};
use kioku::client::sync::{DeadLetterPolicy, SyncStateHandle};
use proptest::prelude::*;
use std::sync::Arc;

fn submit_step() -> impl Strategy<Value = SubmitStep> {
    prop_oneof![
        3 => Just(SubmitStep::Accept),
        1 => Just(SubmitStep::Fail(RemoteError::Network("timed out".to_string()))),
        1 => Just(SubmitStep::LoseResponse),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_replay_is_ordered_and_exactly_once(
        subjects in prop::collection::vec(1i64..4, 1..8),
        steps in prop::collection::vec(submit_step(), 0..16),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime");

        runtime.block_on(async {
            let db = memory_db().await;
            let remote = Arc::new(ScriptedRemote::new());
            let assignments: Vec<_> = (1..4).map(|id| assignment(id, 1, ts(1, 0))).collect();
            for a in &assignments {
                remote.put_assignment(a.clone());
            }
            seed_assignments(&db, assignments).await;
            remote.script_submissions(steps.clone());

            let queue = PendingMutationQueue::new(db.clone());
            let mut keys = Vec::new();
            for subject_id in &subjects {
                let payload = MutationPayload::review_grade(0, 0, ts(1, 10));
                let queued = queue
                    .enqueue(NewMutation::new(*subject_id, payload))
                    .await
                    .expect("enqueued");
                keys.push(queued.idempotency_key);
            }

            let service: Arc<dyn RemoteService> = remote.clone();
            let processor = QueueProcessor::new(
                db.clone(),
                service,
                no_backoff(),
                DeadLetterPolicy::Halt,
                SyncStateHandle::new(),
            );

            // Every failure costs one drain; the script is finite
            let mut drained = false;
            for _ in 0..=steps.len() + 1 {
                if processor.process_queue().await.outcome == DrainOutcome::Drained {
                    drained = true;
                    break;
                }
            }
            prop_assert!(drained);

            let applied: Vec<_> = remote.applied().iter().map(|s| s.idempotency_key).collect();
            prop_assert_eq!(applied, keys);
            prop_assert_eq!(queue.pending_count().await.expect("count"), 0);

            let view = db.get_assignment(subjects[0]).await.expect("read").expect("assignment");
            prop_assert!(!view.pending);
            Ok(())
        })?;
    }
}
