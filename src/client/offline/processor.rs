//! # Queue Processor
//!
//! Drains the pending mutation queue to the remote service strictly in
//! sequence order, one mutation at a time.
//!
//! ## Outcome Handling
//!
//! - **Success**: the mutation is deleted and the returned canonical state is
//!   written in the same transaction
//! - **Transient failure**: the attempt is counted, the next eligible time is
//!   set with backoff and the drain stops; later mutations wait
//! - **Rejection**: the mutation is dead-lettered; the drain only moves past it
//!   after an explicit skip (or under [`DeadLetterPolicy::Skip`])
//! - **Conflict**: the affected assignment is re-pulled, then the mutation is
//!   retried with backoff
//! - **Auth failure**: the mutation goes back to `pending` and all sync halts
//!
//! At most one drain runs at a time; a second request while one is active
//! returns [`DrainOutcome::AlreadyRunning`].

use crate::client::local_db::sync::Checkpoint;
use crate::client::local_db::LocalDatabase;
use crate::client::offline::queue::PendingMutation;
use crate::client::offline::retry::BackoffPolicy;
use crate::client::remote::{ProgressSubmission, RemoteError, RemoteService, ResourceItems};
use crate::client::sync::sync_state::SyncStateHandle;
use crate::client::sync::DeadLetterPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Why a drain stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DrainOutcome {
    /// Queue empty (dead letters passed over aside)
    Drained,
    /// Head mutation is backing off until the given time
    Deferred { until: DateTime<Utc> },
    /// Head mutation is a dead letter awaiting a user decision
    Blocked { sequence: i64 },
    /// Re-authentication required
    Halted,
    Cancelled,
    /// Another drain holds the queue
    AlreadyRunning,
    /// Local store failure; nothing committed was lost
    Failed { message: String },
}

/// Result of one drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    /// Mutations acknowledged by the server
    pub submitted: u64,
    /// Mutations newly dead-lettered
    pub dead_lettered: u64,
}

impl DrainReport {
    fn new(outcome: DrainOutcome) -> Self {
        Self {
            outcome,
            submitted: 0,
            dead_lettered: 0,
        }
    }
}

enum Step {
    Continue,
    Stop(DrainOutcome),
}

/// Replays queued mutations against the remote service
pub struct QueueProcessor {
    db: LocalDatabase,
    remote: Arc<dyn RemoteService>,
    backoff: BackoffPolicy,
    dead_letter_policy: DeadLetterPolicy,
    state: SyncStateHandle,
    drain_lock: Mutex<()>,
    cancel_epoch: AtomicU64,
    closed: AtomicBool,
}

impl QueueProcessor {
    pub fn new(
        db: LocalDatabase,
        remote: Arc<dyn RemoteService>,
        backoff: BackoffPolicy,
        dead_letter_policy: DeadLetterPolicy,
        state: SyncStateHandle,
    ) -> Self {
        Self {
            db,
            remote,
            backoff,
            dead_letter_policy,
            state,
            drain_lock: Mutex::new(()),
            cancel_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Ask a running drain to stop before its next mutation
    pub fn cancel(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Cancel and turn every later drain into a no-op
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Submit queued mutations in order until the queue is empty or a
    /// mutation cannot proceed yet
    pub async fn process_queue(&self) -> DrainReport {
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        if self.is_closed() {
            return DrainReport::new(DrainOutcome::Cancelled);
        }
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return DrainReport::new(DrainOutcome::AlreadyRunning);
        };
        if self.state.auth_required() {
            return DrainReport::new(DrainOutcome::Halted);
        }

        let mut report = DrainReport::new(DrainOutcome::Drained);
        let skip_all = self.dead_letter_policy == DeadLetterPolicy::Skip;

        loop {
            if self.cancel_epoch.load(Ordering::SeqCst) != epoch {
                report.outcome = DrainOutcome::Cancelled;
                break;
            }

            let next = match self.db.next_mutation(skip_all).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!("Failed to read mutation queue: {}", e);
                    report.outcome = DrainOutcome::Failed {
                        message: e.to_string(),
                    };
                    break;
                }
            };

            let Some(mutation) = next else {
                break;
            };

            if mutation.is_dead_letter() {
                report.outcome = DrainOutcome::Blocked {
                    sequence: mutation.sequence,
                };
                break;
            }

            if let (true, Some(until)) = (mutation.is_backing_off(Utc::now()), mutation.next_attempt_at) {
                report.outcome = DrainOutcome::Deferred { until };
                break;
            }

            match self.submit_one(&mutation, &mut report).await {
                Step::Continue => {}
                Step::Stop(outcome) => {
                    report.outcome = outcome;
                    break;
                }
            }
        }

        tracing::info!(
            "Queue drain finished: {:?} ({} submitted, {} dead-lettered)",
            report.outcome,
            report.submitted,
            report.dead_lettered
        );
        report
    }

    async fn submit_one(&self, mutation: &PendingMutation, report: &mut DrainReport) -> Step {
        let sequence = mutation.sequence;
        if let Err(e) = self.db.mark_in_flight(sequence).await {
            return storage_failure(e);
        }

        let assignment_id = match mutation.assignment_id {
            Some(id) => Some(id),
            None => match self.db.get_canonical_assignment(mutation.subject_id).await {
                Ok(found) => found.map(|a| a.id),
                Err(e) => {
                    let _ = self.db.release_mutation(sequence).await;
                    return storage_failure(e);
                }
            },
        };

        let submission = ProgressSubmission {
            idempotency_key: mutation.idempotency_key,
            subject_id: mutation.subject_id,
            assignment_id,
            payload: mutation.payload.clone(),
        };

        tracing::debug!(
            "Submitting #{} {} for subject {} (attempt {})",
            sequence,
            mutation.kind,
            mutation.subject_id,
            mutation.attempts + 1
        );

        match self.remote.submit(&submission).await {
            Ok(receipt) => match self.db.acknowledge_mutation(sequence, &receipt).await {
                Ok(_) => {
                    report.submitted += 1;
                    Step::Continue
                }
                Err(e) => {
                    // Resubmitted later under the same idempotency key
                    let _ = self.db.release_mutation(sequence).await;
                    storage_failure(e)
                }
            },
            Err(error @ (RemoteError::Network(_) | RemoteError::Decode(_))) => {
                self.retry_later(mutation, &error.to_string()).await
            }
            Err(RemoteError::Conflict { message }) => {
                tracing::warn!("Mutation #{} conflicts with server state: {}", sequence, message);
                self.refresh_assignment(mutation.subject_id).await;
                self.retry_later(mutation, &format!("conflict: {}", message)).await
            }
            Err(error @ RemoteError::Validation { .. }) => {
                tracing::error!("Mutation #{} rejected: {}", sequence, error);
                if let Err(e) = self.db.dead_letter_mutation(sequence, &error.to_string()).await {
                    return storage_failure(e);
                }
                report.dead_lettered += 1;
                match self.dead_letter_policy {
                    DeadLetterPolicy::Skip => Step::Continue,
                    DeadLetterPolicy::Halt => Step::Stop(DrainOutcome::Blocked { sequence }),
                }
            }
            Err(error @ RemoteError::Auth { .. }) => {
                if let Err(e) = self.db.release_mutation(sequence).await {
                    tracing::error!("Failed to release mutation #{}: {}", sequence, e);
                }
                self.state.require_auth(error.to_string());
                Step::Stop(DrainOutcome::Halted)
            }
        }
    }

    async fn retry_later(&self, mutation: &PendingMutation, error: &str) -> Step {
        let attempt = mutation.attempts.saturating_add(1);
        let until = self.backoff.next_attempt_at(attempt, Utc::now());
        tracing::warn!(
            "Mutation #{} failed (attempt {}), retrying after {}: {}",
            mutation.sequence,
            attempt,
            until,
            error
        );
        match self.db.schedule_retry(mutation.sequence, until, error).await {
            Ok(()) => Step::Stop(DrainOutcome::Deferred { until }),
            Err(e) => storage_failure(e),
        }
    }

    /// Targeted re-pull of one assignment before retrying a conflicting mutation
    async fn refresh_assignment(&self, subject_id: i64) {
        match self.remote.fetch_assignment(subject_id).await {
            Ok(Some(assignment)) => {
                let items = ResourceItems::Assignments(vec![assignment]);
                if let Err(e) = self.db.commit_page(&items, &Checkpoint::None).await {
                    tracing::error!("Failed to store re-pulled assignment {}: {}", subject_id, e);
                }
            }
            Ok(None) => tracing::warn!("Server has no assignment for subject {}", subject_id),
            Err(e) => tracing::warn!("Re-pull of assignment {} failed: {}", subject_id, e),
        }
    }
}

fn storage_failure(error: sqlx::Error) -> Step {
    tracing::error!("Queue drain aborted by storage error: {}", error);
    Step::Stop(DrainOutcome::Failed {
        message: error.to_string(),
    })
}
