//! # Session
//!
//! Scoped container for everything a signed-in user's sync needs: the local
//! store, the queue, the orchestrator, the triggers and the dispatcher.
//! Created at app start, injected into consumers and torn down on logout.
//!
//! ```rust,no_run
//! use kioku::client::config::Config;
//! use kioku::client::session::Session;
//! use kioku::client::sync::LifecycleEvent;
//!
//! # async fn example() -> kioku::client::error::SyncResult<()> {
//! let config = Config::load(Config::default_path().as_deref())?;
//! let session = Session::start(&config).await?;
//! session.record_review(440, 0, 1).await?;
//! session.notify(LifecycleEvent::Foreground).await;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::client::config::Config;
use crate::client::error::SyncResult;
use crate::client::local_db::LocalDatabase;
use crate::client::offline::processor::{DrainReport, QueueProcessor};
use crate::client::offline::queue::{MutationPayload, NewMutation, PendingMutation, PendingMutationQueue};
use crate::client::remote::{HttpRemote, RemoteService};
use crate::client::sync::{
    LifecycleEvent, SyncConfig, SyncDispatcher, SyncOrchestrator, SyncOutcome, SyncRequest,
    SyncStateHandle, TriggerHub,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Buffered lifecycle events before the listener applies back-pressure
const LIFECYCLE_BUFFER: usize = 32;

pub struct Session {
    db: LocalDatabase,
    queue: PendingMutationQueue,
    state: SyncStateHandle,
    orchestrator: Arc<SyncOrchestrator>,
    processor: Arc<QueueProcessor>,
    triggers: Arc<TriggerHub>,
    lifecycle_tx: mpsc::Sender<LifecycleEvent>,
    listener: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    /// Drains started by recorded actions
    drains: Mutex<JoinSet<()>>,
}

impl Session {
    /// Open the configured store and connect to the configured service
    pub async fn start(config: &Config) -> SyncResult<Self> {
        config.validate()?;
        let path = match &config.app.database_path {
            Some(path) => path.clone(),
            None => LocalDatabase::default_path(),
        };
        let db = LocalDatabase::open(&path).await?;
        let remote: Arc<dyn RemoteService> = Arc::new(HttpRemote::new(&config.app)?);
        Self::start_with_database(db, remote, config.sync.clone()).await
    }

    /// Start on an already open store and an arbitrary remote
    pub async fn start_with_database(
        db: LocalDatabase,
        remote: Arc<dyn RemoteService>,
        sync: SyncConfig,
    ) -> SyncResult<Self> {
        sync.validate()?;

        let recovered = db.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!("Recovered {} mutation(s) left in flight", recovered);
        }

        let state = SyncStateHandle::new();
        let processor = Arc::new(QueueProcessor::new(
            db.clone(),
            Arc::clone(&remote),
            sync.backoff.clone(),
            sync.dead_letter_policy,
            state.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            db.clone(),
            remote,
            sync.clone(),
            state.clone(),
        ));

        let (hub, requests) = TriggerHub::new(&sync);
        let triggers = Arc::new(hub);
        let dispatcher =
            SyncDispatcher::new(Arc::clone(&orchestrator), Arc::clone(&processor), requests).spawn();
        triggers.start().await;

        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(LIFECYCLE_BUFFER);
        let listener = Arc::clone(&triggers).listen(lifecycle_rx);

        tracing::info!("Session started");
        Ok(Self {
            queue: PendingMutationQueue::new(db.clone()),
            db,
            state,
            orchestrator,
            processor,
            triggers,
            lifecycle_tx,
            listener,
            dispatcher,
            drains: Mutex::new(JoinSet::new()),
        })
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    pub fn queue(&self) -> &PendingMutationQueue {
        &self.queue
    }

    pub fn state(&self) -> &SyncStateHandle {
        &self.state
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Record a lesson start; durable when this returns
    pub async fn record_lesson_start(
        &self,
        subject_id: i64,
        assignment_id: Option<i64>,
    ) -> SyncResult<PendingMutation> {
        let mut mutation = NewMutation::new(subject_id, MutationPayload::lesson_start(Utc::now()));
        if let Some(id) = assignment_id {
            mutation = mutation.with_assignment(id);
        }
        self.record(mutation).await
    }

    /// Record a graded review; durable when this returns
    pub async fn record_review(
        &self,
        subject_id: i64,
        incorrect_meaning_answers: u32,
        incorrect_reading_answers: u32,
    ) -> SyncResult<PendingMutation> {
        let payload = MutationPayload::review_grade(
            incorrect_meaning_answers,
            incorrect_reading_answers,
            Utc::now(),
        );
        self.record(NewMutation::new(subject_id, payload)).await
    }

    async fn record(&self, mutation: NewMutation) -> SyncResult<PendingMutation> {
        let pending = self.queue.enqueue(mutation).await?;

        // Submission happens in the background; the caller never waits on it
        let processor = Arc::clone(&self.processor);
        let orchestrator = Arc::clone(&self.orchestrator);
        let mut drains = self.drains.lock().unwrap_or_else(PoisonError::into_inner);
        while drains.try_join_next().is_some() {}
        drains.spawn(async move {
            let report = processor.process_queue().await;
            orchestrator.record_drain(&report).await;
        });
        Ok(pending)
    }

    /// Forward a lifecycle event to the triggers
    pub async fn notify(&self, event: LifecycleEvent) {
        if self.lifecycle_tx.send(event).await.is_err() {
            tracing::debug!("Lifecycle listener is gone, dropped {:?}", event);
        }
    }

    /// Sender the host wires its lifecycle callbacks to
    pub fn lifecycle_sender(&self) -> mpsc::Sender<LifecycleEvent> {
        self.lifecycle_tx.clone()
    }

    /// Drain the queue now and wait for it
    pub async fn drain_now(&self) -> DrainReport {
        let report = self.processor.process_queue().await;
        self.orchestrator.record_drain(&report).await;
        report
    }

    /// Drain then pull, waiting for both
    pub async fn sync_now(&self, request: SyncRequest) -> (DrainReport, SyncOutcome) {
        let drain = self.drain_now().await;
        let outcome = match request {
            SyncRequest::Quick => self.orchestrator.run_quick_sync().await,
            SyncRequest::Full => self.orchestrator.run_full_refresh().await,
        };
        (drain, outcome)
    }

    /// The user signed in again after an auth halt
    pub fn resume_after_auth(&self) {
        self.state.clear_auth();
    }

    /// Stop triggers and background work, waiting for active work to finish
    /// its current item. Nothing writes to the store once this returns.
    pub async fn shutdown(self) {
        self.stop().await;
        tracing::info!("Session stopped");
    }

    /// Stop the session and wipe every local table
    pub async fn logout(self) -> SyncResult<()> {
        let db = self.db.clone();
        let state = self.state.clone();
        self.stop().await;

        db.reset().await?;
        state.reset();
        tracing::info!("Logged out; local store cleared");
        Ok(())
    }

    async fn stop(self) {
        let Session {
            orchestrator,
            processor,
            triggers,
            lifecycle_tx,
            listener,
            dispatcher,
            drains,
            ..
        } = self;

        orchestrator.close();
        processor.close();

        let mut drains = drains.into_inner().unwrap_or_else(PoisonError::into_inner);
        while let Some(joined) = drains.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Background drain ended abnormally: {}", e);
            }
        }

        drop(lifecycle_tx);
        if let Err(e) = listener.await {
            tracing::warn!("Lifecycle listener ended abnormally: {}", e);
        }
        triggers.shutdown().await;
        drop(triggers);

        if let Err(e) = dispatcher.await {
            tracing::warn!("Sync dispatcher ended abnormally: {}", e);
        }
    }
}
