//! # Offline Progress System
//!
//! Offline-first recording of study progress with optimistic display,
//! durable queuing and ordered replay once the service is reachable.
//!
//! ## Architecture
//!
//! The offline system consists of:
//! - **Pending Mutation Queue**: every lesson start and review grade is
//!   persisted before the call returns, in strict sequence order
//! - **Optimistic Display**: queued mutations are projected onto the
//!   assignment row so the UI reflects them immediately
//! - **Queue Processor**: replays the queue in order, one mutation at a time
//! - **Retry Logic**: exponential backoff bounded by a floor and a cap
//! - **Reconciliation**: newer-wins rule for pulled rows against stored ones
//!
//! ## Key Components
//!
//! - `queue.rs`: mutation types and the queue facade
//! - `optimistic.rs`: SRS projection of queued mutations
//! - `processor.rs`: ordered drain against the remote service
//! - `retry.rs`: backoff policy
//! - `reconciliation.rs`: row version comparison
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::local_db::LocalDatabase;
//! use kioku::client::offline::{MutationPayload, NewMutation, PendingMutationQueue};
//! use chrono::Utc;
//!
//! # async fn example(db: LocalDatabase) -> sqlx::Result<()> {
//! let queue = PendingMutationQueue::new(db);
//! let grade = MutationPayload::review_grade(0, 1, Utc::now());
//! queue.enqueue(NewMutation::new(440, grade)).await?;
//! # Ok(())
//! # }
//! ```

pub mod optimistic;
pub mod processor;
pub mod queue;
pub mod reconciliation;
pub mod retry;

pub use optimistic::{project, OptimisticState};
pub use processor::{DrainOutcome, DrainReport, QueueProcessor};
pub use queue::{
    MutationKind, MutationPayload, MutationStatus, NewMutation, PendingMutation, PendingMutationQueue,
};
pub use reconciliation::{reconcile, ReconcileStats, Reconciliation, RowVersion};
pub use retry::BackoffPolicy;
