//! # Background Sync Dispatcher
//!
//! Consumes the [`SyncRequest`] channel fed by the triggers and turns each
//! burst into at most one unit of work: a queue drain followed by a pull.
//!
//! ## Features
//!
//! - **Burst Coalescing**: requests already waiting on the channel merge into
//!   one; a full refresh subsumes quick syncs
//! - **Single Flight**: work runs on spawned tasks so the orchestrator's own
//!   exclusion coalesces requests that arrive mid-run
//! - **Deferred Retry**: a drain stopped by backoff schedules one wake-up for
//!   when the head mutation becomes eligible
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::sync::{SyncDispatcher, TriggerHub, SyncConfig};
//! # use std::sync::Arc;
//! # use kioku::client::sync::SyncOrchestrator;
//! # use kioku::client::offline::QueueProcessor;
//! # async fn example(orchestrator: Arc<SyncOrchestrator>, processor: Arc<QueueProcessor>) {
//! let (hub, requests) = TriggerHub::new(&SyncConfig::default());
//! let dispatcher = SyncDispatcher::new(orchestrator, processor, requests);
//! let task = dispatcher.spawn();
//! hub.start().await;
//! # drop(task);
//! # }
//! ```

use crate::client::offline::processor::{DrainOutcome, DrainReport, QueueProcessor};
use crate::client::sync::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::client::sync::triggers::{coalesce, SyncRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// Drain and pull handles shared by the dispatcher's tasks
#[derive(Clone)]
struct Workers {
    orchestrator: Arc<SyncOrchestrator>,
    processor: Arc<QueueProcessor>,
    retry: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Workers {
    async fn dispatch(&self, request: SyncRequest) -> (DrainReport, SyncOutcome) {
        let drain = self.drain().await;
        let outcome = match request {
            SyncRequest::Quick => self.orchestrator.run_quick_sync().await,
            SyncRequest::Full => self.orchestrator.run_full_refresh().await,
        };
        (drain, outcome)
    }

    async fn drain(&self) -> DrainReport {
        let report = self.drain_once().await;
        if let DrainOutcome::Deferred { until } = report.outcome {
            self.schedule_retry(until).await;
        }
        report
    }

    async fn drain_once(&self) -> DrainReport {
        let report = self.processor.process_queue().await;
        self.orchestrator.record_drain(&report).await;
        report
    }

    /// Wake the queue when its head mutation becomes eligible. One wake-up
    /// task at a time; it follows later deferrals itself.
    async fn schedule_retry(&self, until: DateTime<Utc>) {
        let mut slot = self.retry.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        tracing::debug!("Queue drain deferred until {}", until);
        let workers = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut until = until;
            loop {
                let wait = (until - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                match workers.drain_once().await.outcome {
                    DrainOutcome::Deferred { until: next } => until = next,
                    _ => break,
                }
            }
        }));
    }
}

/// Consumer of the trigger channel
pub struct SyncDispatcher {
    workers: Workers,
    requests: mpsc::UnboundedReceiver<SyncRequest>,
    tasks: JoinSet<()>,
}

impl SyncDispatcher {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        processor: Arc<QueueProcessor>,
        requests: mpsc::UnboundedReceiver<SyncRequest>,
    ) -> Self {
        Self {
            workers: Workers {
                orchestrator,
                processor,
                retry: Arc::new(Mutex::new(None)),
            },
            requests,
            tasks: JoinSet::new(),
        }
    }

    /// Run [`run`](Self::run) on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process requests until every sender is dropped, then close the
    /// orchestrator and processor and wait for outstanding work
    pub async fn run(mut self) {
        tracing::info!("Sync dispatcher started");

        while let Some(first) = self.requests.recv().await {
            let mut burst = vec![first];
            while let Ok(next) = self.requests.try_recv() {
                burst.push(next);
            }
            let burst_len = burst.len();
            let Some(request) = coalesce(burst) else {
                continue;
            };
            if burst_len > 1 {
                tracing::debug!("Coalesced {} requests into {:?}", burst_len, request);
            }

            let workers = self.workers.clone();
            self.tasks.spawn(async move {
                workers.dispatch(request).await;
            });
            while self.tasks.try_join_next().is_some() {}
        }

        self.shutdown().await;
    }

    /// Drain then pull, awaiting both
    pub async fn dispatch(&self, request: SyncRequest) -> (DrainReport, SyncOutcome) {
        self.workers.dispatch(request).await
    }

    async fn shutdown(&mut self) {
        self.workers.orchestrator.close();
        self.workers.processor.close();
        if let Some(handle) = self.workers.retry.lock().await.take() {
            handle.abort();
        }
        while self.tasks.join_next().await.is_some() {}
        tracing::info!("Sync dispatcher stopped");
    }
}
