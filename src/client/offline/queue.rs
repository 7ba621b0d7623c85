//! # Pending Mutation Queue
//!
//! Durable, ordered record of user actions awaiting acknowledgment by the
//! remote service.
//!
//! ## Features
//!
//! - **Persistent Queue**: mutations are committed to SQLite before `enqueue`
//!   returns and survive restarts
//! - **Strict Ordering**: SQLite assigns a strictly increasing sequence that
//!   fixes replay order across all subjects
//! - **Idempotency**: every mutation carries a unique key the remote side uses
//!   to recognise a resubmission
//! - **Status Tracking**: `pending`, `in_flight`, `failed_retryable`,
//!   `failed_terminal`
//! - **Dead Letters**: terminally failed mutations stay visible until the user
//!   skips, requeues or discards them
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use kioku::client::local_db::LocalDatabase;
//! use kioku::client::offline::queue::{MutationPayload, NewMutation, PendingMutationQueue};
//!
//! # async fn example() -> sqlx::Result<()> {
//! let db = LocalDatabase::open_in_memory().await?;
//! let queue = PendingMutationQueue::new(db);
//!
//! let mutation = queue
//!     .enqueue(NewMutation::new(440, MutationPayload::lesson_start(Utc::now())))
//!     .await?;
//! assert_eq!(queue.pending_count().await?, 1);
//! # let _ = mutation;
//! # Ok(())
//! # }
//! ```

use crate::client::local_db::LocalDatabase;
use crate::shared::SharedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

type Result<T> = sqlx::Result<T>;

/// Kind of queued user action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    LessonStart,
    ReviewGrade,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::LessonStart => "lesson_start",
            MutationKind::ReviewGrade => "review_grade",
        }
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, SharedError> {
        match raw {
            "lesson_start" => Ok(MutationKind::LessonStart),
            "review_grade" => Ok(MutationKind::ReviewGrade),
            other => Err(SharedError::unknown("mutation kind", other)),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user did, as submitted to the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationPayload {
    /// Lesson finished; the assignment enters the review cycle
    LessonStart { started_at: DateTime<Utc> },
    /// Review answered
    ReviewGrade {
        incorrect_meaning_answers: u32,
        incorrect_reading_answers: u32,
        created_at: DateTime<Utc>,
    },
}

impl MutationPayload {
    pub fn lesson_start(started_at: DateTime<Utc>) -> Self {
        MutationPayload::LessonStart { started_at }
    }

    pub fn review_grade(
        incorrect_meaning_answers: u32,
        incorrect_reading_answers: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        MutationPayload::ReviewGrade {
            incorrect_meaning_answers,
            incorrect_reading_answers,
            created_at,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::LessonStart { .. } => MutationKind::LessonStart,
            MutationPayload::ReviewGrade { .. } => MutationKind::ReviewGrade,
        }
    }

    /// When the user performed the action
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MutationPayload::LessonStart { started_at } => *started_at,
            MutationPayload::ReviewGrade { created_at, .. } => *created_at,
        }
    }
}

/// Lifecycle status of a queued mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting for its turn
    Pending,
    /// Submitted, acknowledgment not yet received
    InFlight,
    /// Transient failure; eligible again at `next_attempt_at`
    FailedRetryable,
    /// Rejected by the remote side; never retried automatically
    FailedTerminal,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::InFlight => "in_flight",
            MutationStatus::FailedRetryable => "failed_retryable",
            MutationStatus::FailedTerminal => "failed_terminal",
        }
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, SharedError> {
        match raw {
            "pending" => Ok(MutationStatus::Pending),
            "in_flight" => Ok(MutationStatus::InFlight),
            "failed_retryable" => Ok(MutationStatus::FailedRetryable),
            "failed_terminal" => Ok(MutationStatus::FailedTerminal),
            other => Err(SharedError::unknown("mutation status", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationStatus::FailedTerminal)
    }
}

/// A user action to be queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMutation {
    pub subject_id: i64,
    /// Resolved from the local assignment row when not given
    pub assignment_id: Option<i64>,
    pub payload: MutationPayload,
}

impl NewMutation {
    pub fn new(subject_id: i64, payload: MutationPayload) -> Self {
        Self {
            subject_id,
            assignment_id: None,
            payload,
        }
    }

    pub fn with_assignment(mut self, assignment_id: i64) -> Self {
        self.assignment_id = Some(assignment_id);
        self
    }
}

/// A queued mutation as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    /// Replay position, strictly increasing
    pub sequence: i64,
    pub idempotency_key: Uuid,
    pub kind: MutationKind,
    pub subject_id: i64,
    pub assignment_id: Option<i64>,
    pub payload: MutationPayload,
    pub created_at: DateTime<Utc>,
    pub status: MutationStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Dead letter the user chose to pass over
    pub skipped: bool,
}

impl PendingMutation {
    /// Whether a retry delay is still running at `now`
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_some_and(|at| at > now)
    }

    pub fn is_dead_letter(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Handle to the durable mutation queue
#[derive(Debug, Clone)]
pub struct PendingMutationQueue {
    db: LocalDatabase,
}

impl PendingMutationQueue {
    pub fn new(db: LocalDatabase) -> Self {
        Self { db }
    }

    /// Persist a mutation and apply its optimistic display.
    ///
    /// The row is committed before this returns.
    pub async fn enqueue(&self, mutation: NewMutation) -> Result<PendingMutation> {
        let stored = self.db.enqueue_mutation(&mutation).await?;
        tracing::debug!(
            "Queued {} for subject {} as #{}",
            stored.kind,
            stored.subject_id,
            stored.sequence
        );
        Ok(stored)
    }

    /// Mutations still awaiting acknowledgment (dead letters excluded)
    pub async fn pending_count(&self) -> Result<u64> {
        self.db.pending_mutation_count().await
    }

    /// Every queued mutation in replay order
    pub async fn list(&self) -> Result<Vec<PendingMutation>> {
        self.db.list_mutations().await
    }

    pub async fn dead_letters(&self) -> Result<Vec<PendingMutation>> {
        self.db.dead_letters().await
    }

    /// Let the drain pass over a dead letter. Returns false if `sequence` is
    /// not a dead letter.
    pub async fn skip_dead_letter(&self, sequence: i64) -> Result<bool> {
        let skipped = self.db.skip_dead_letter(sequence).await?;
        if skipped {
            tracing::info!("Dead letter #{} skipped", sequence);
        }
        Ok(skipped)
    }

    /// Return a dead letter to the queue for another attempt
    pub async fn requeue_dead_letter(&self, sequence: i64) -> Result<bool> {
        let requeued = self.db.requeue_dead_letter(sequence).await?;
        if requeued {
            tracing::info!("Dead letter #{} requeued", sequence);
        }
        Ok(requeued)
    }

    /// Drop a dead letter and its optimistic display
    pub async fn discard_dead_letter(&self, sequence: i64) -> Result<bool> {
        let discarded = self.db.discard_dead_letter(sequence).await?;
        if discarded {
            tracing::info!("Dead letter #{} discarded", sequence);
        }
        Ok(discarded)
    }

    /// Reset rows a crash left in flight. Their idempotency keys make the
    /// resubmission safe.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let recovered = self.db.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!("Recovered {} in-flight mutation(s) after restart", recovered);
        }
        Ok(recovered)
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }
}
