//! # Sync Orchestrator
//!
//! Pulls server state into the local store, one resource phase after another
//! in the configured order.
//!
//! ## Run Kinds
//!
//! - **Quick sync**: per resource, pages filtered to items updated after the
//!   stored cursor. Each page commits together with its resume token; the
//!   cursor moves to the pass watermark only when the last page commits.
//! - **Full refresh**: the same delta pass, then the local row count of every
//!   paginated resource is compared with the server total. Depending on
//!   [`FullRefreshPolicy`] a gap is back-filled with an unfiltered traversal
//!   and rows the server no longer reports are pruned.
//!
//! ## Exclusion
//!
//! One run at a time. A quick sync requested while a run is active, or while
//! a full refresh waits, is coalesced away. A full refresh waits out the
//! active run; a second one requested while the first waits is coalesced.
//!
//! ## Cancellation
//!
//! [`SyncOrchestrator::cancel`] stops every run requested before the call,
//! including a full refresh still waiting for the lock. Runs requested
//! afterwards are unaffected. [`SyncOrchestrator::close`] stops everything
//! for good.
//!
//! ## Failure
//!
//! A failing phase aborts the remaining phases. What earlier phases and pages
//! committed stays committed, so the next run resumes from there.

use crate::client::error::{SyncError, SyncResult};
use crate::client::local_db::sync::Checkpoint;
use crate::client::local_db::LocalDatabase;
use crate::client::offline::processor::DrainReport;
use crate::client::offline::reconciliation::ReconcileStats;
use crate::client::remote::{Page, PageQuery, RemoteError, RemoteService, ResourceItems};
use crate::client::sync::metrics::SyncMetrics;
use crate::client::sync::sync_state::{SyncKind, SyncProgress, SyncStateHandle};
use crate::client::sync::{FullRefreshPolicy, SyncConfig};
use crate::shared::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a run request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Ran(SyncReport),
    /// Folded into a run that is active or already waiting
    Coalesced,
    /// Sync is halted until the user signs in again
    AuthRequired,
    /// The orchestrator was closed
    Stopped,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Ran(report) => Some(report),
            _ => None,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub kind: SyncKind,
    /// Phases that finished, in run order
    pub phases: Vec<PhaseReport>,
    pub failure: Option<PhaseFailure>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    pub fn items_written(&self) -> u64 {
        self.phases.iter().map(|p| p.items_written).sum()
    }

    pub fn items_skipped(&self) -> u64 {
        self.phases.iter().map(|p| p.items_skipped).sum()
    }

    pub fn phase(&self, resource: Resource) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.resource == resource)
    }
}

/// What one resource phase did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub resource: Resource,
    pub pages: u32,
    pub items_written: u64,
    pub items_skipped: u64,
    /// Cursor after the phase
    pub cursor: Option<DateTime<Utc>>,
    pub verification: Option<Verification>,
}

impl PhaseReport {
    fn new(resource: Resource) -> Self {
        Self {
            resource,
            pages: 0,
            items_written: 0,
            items_skipped: 0,
            cursor: None,
            verification: None,
        }
    }

    fn absorb(&mut self, stats: &ReconcileStats) {
        self.pages += 1;
        self.items_written += stats.written();
        self.items_skipped += stats.skipped();
    }
}

/// Count check of a full refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub local_count: u64,
    pub remote_count: Option<u64>,
    pub backfilled: bool,
    pub pruned: u64,
}

impl Verification {
    pub fn matches(&self) -> bool {
        self.remote_count == Some(self.local_count)
    }
}

/// The phase a run stopped at and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub resource: Resource,
    pub error: String,
}

/// Runs quick syncs and full refreshes against the local store
pub struct SyncOrchestrator {
    db: LocalDatabase,
    remote: Arc<dyn RemoteService>,
    config: SyncConfig,
    state: SyncStateHandle,
    metrics: Mutex<SyncMetrics>,
    run_lock: Mutex<()>,
    full_waiting: AtomicBool,
    /// Bumped by every `cancel`; a run is cancelled once it moves past the
    /// value seen when the run was requested
    cancel_epoch: AtomicU64,
    /// Epoch the active run was requested under
    run_epoch: AtomicU64,
    closed: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        db: LocalDatabase,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
        state: SyncStateHandle,
    ) -> Self {
        Self {
            db,
            remote,
            config,
            state,
            metrics: Mutex::new(SyncMetrics::new()),
            run_lock: Mutex::new(()),
            full_waiting: AtomicBool::new(false),
            cancel_epoch: AtomicU64::new(0),
            run_epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &SyncStateHandle {
        &self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_syncing(&self) -> bool {
        self.state.snapshot().is_syncing()
    }

    pub fn is_full_refresh(&self) -> bool {
        self.state.snapshot().is_full_refresh()
    }

    pub fn progress(&self) -> Option<SyncProgress> {
        self.state.snapshot().progress
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn record_drain(&self, report: &DrainReport) {
        self.metrics
            .lock()
            .await
            .record_drain(report.submitted, report.dead_lettered);
    }

    /// Stop the active run at its next page or phase boundary, along with
    /// any run already waiting for the lock
    pub fn cancel(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Cancel and refuse every later request
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delta pull of every resource
    pub async fn run_quick_sync(&self) -> SyncOutcome {
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        if self.is_closed() {
            return SyncOutcome::Stopped;
        }
        if self.state.auth_required() {
            return SyncOutcome::AuthRequired;
        }
        if self.full_waiting.load(Ordering::SeqCst) {
            tracing::debug!("Quick sync coalesced into waiting full refresh");
            return SyncOutcome::Coalesced;
        }
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::debug!("Quick sync coalesced into active run");
            return SyncOutcome::Coalesced;
        };
        SyncOutcome::Ran(self.run(SyncKind::QuickSync, epoch).await)
    }

    /// Delta pull followed by count verification and back-fill
    pub async fn run_full_refresh(&self) -> SyncOutcome {
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        if self.is_closed() {
            return SyncOutcome::Stopped;
        }
        if self.state.auth_required() {
            return SyncOutcome::AuthRequired;
        }
        if self.full_waiting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Full refresh coalesced into waiting full refresh");
            return SyncOutcome::Coalesced;
        }
        let _guard = self.run_lock.lock().await;
        self.full_waiting.store(false, Ordering::SeqCst);

        if self.state.auth_required() {
            return SyncOutcome::AuthRequired;
        }
        SyncOutcome::Ran(self.run(SyncKind::FullRefresh, epoch).await)
    }

    /// Caller holds `run_lock`
    async fn run(&self, kind: SyncKind, epoch: u64) -> SyncReport {
        self.run_epoch.store(epoch, Ordering::SeqCst);
        self.state.begin(kind);
        self.metrics.lock().await.record_sync_start();
        tracing::info!("Starting {:?}", kind);

        let mut report = SyncReport {
            kind,
            phases: Vec::new(),
            failure: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let phase_count = self.config.phase_order.len() as u64;
        for (index, resource) in self.config.phase_order.iter().copied().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.state.progress(SyncProgress {
                phase: resource.name().to_string(),
                current: index as u64,
                total: Some(phase_count),
                message: format!("Syncing {}", resource),
            });

            match self.run_phase(resource, kind).await {
                Ok(phase) => {
                    tracing::info!(
                        "Phase {} done: {} page(s), {} written, {} stale",
                        resource,
                        phase.pages,
                        phase.items_written,
                        phase.items_skipped
                    );
                    report.phases.push(phase);
                }
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(error) => {
                    if error.is_auth() {
                        self.state.require_auth(error.to_string());
                    } else if error.is_transient() {
                        tracing::warn!("Phase {} failed: {}", resource, error);
                    } else {
                        tracing::error!("Phase {} failed: {}", resource, error);
                    }
                    report.failure = Some(PhaseFailure {
                        resource,
                        error: error.to_string(),
                    });
                    break;
                }
            }
        }

        report.finished_at = Utc::now();
        self.finish(&report).await;
        report
    }

    /// `complete` and `error` stay visible until the next run begins or the
    /// status consumer settles them
    async fn finish(&self, report: &SyncReport) {
        let mut metrics = self.metrics.lock().await;
        if let Some(failure) = &report.failure {
            metrics.record_sync_failure(report.items_written());
            if !self.state.auth_required() {
                self.state.fail(format!("{}: {}", failure.resource, failure.error));
            }
        } else if report.cancelled {
            tracing::info!("{:?} cancelled", report.kind);
            metrics.record_sync_cancelled(report.items_written());
            self.state.settle();
        } else {
            tracing::info!(
                "{:?} complete: {} written, {} stale",
                report.kind,
                report.items_written(),
                report.items_skipped()
            );
            metrics.record_sync_success(report.items_written(), report.items_skipped());
            self.state.complete();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_epoch.load(Ordering::SeqCst) != self.run_epoch.load(Ordering::SeqCst)
    }

    async fn run_phase(&self, resource: Resource, kind: SyncKind) -> SyncResult<PhaseReport> {
        let mut phase = if resource.is_paginated() {
            self.delta_pass(resource).await?
        } else {
            self.pull_user().await?
        };

        if kind == SyncKind::FullRefresh && resource.is_paginated() {
            phase.verification = Some(self.verify(resource, &mut phase).await?);
        }

        phase.cursor = self.db.cursor_state(resource).await?.cursor;
        Ok(phase)
    }

    async fn pull_user(&self) -> SyncResult<PhaseReport> {
        let user = self.remote.fetch_user().await?;
        let watermark = Some(user.data_updated_at);
        let stats = self
            .db
            .commit_page(&ResourceItems::Users(vec![user]), &Checkpoint::Complete { watermark })
            .await?;

        let mut phase = PhaseReport::new(Resource::User);
        phase.absorb(&stats);
        Ok(phase)
    }

    /// Pages updated after the stored cursor, resuming a partial pass if one
    /// was recorded
    async fn delta_pass(&self, resource: Resource) -> SyncResult<PhaseReport> {
        let stored = self.db.cursor_state(resource).await?;
        let mut page_after = stored.resume_token.clone();
        let mut fresh_pass = page_after.is_none();
        let mut phase = PhaseReport::new(resource);
        let mut fetched: u64 = 0;

        if !fresh_pass {
            tracing::info!("Resuming {} pass at page {:?}", resource, page_after);
        }

        loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let query = PageQuery {
                updated_after: stored.cursor,
                page_after: page_after.clone(),
                page_size: self.config.page_size,
            };
            let page = match self.remote.fetch_page(resource, &query).await {
                Ok(page) => page,
                Err(RemoteError::Validation { message, .. }) if page_after.is_some() && !fresh_pass => {
                    // The server no longer honours the stored token
                    tracing::warn!("Resume token for {} rejected ({}), restarting pass", resource, message);
                    self.db.clear_resume(resource).await?;
                    page_after = None;
                    fresh_pass = true;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let watermark = pass_watermark(&page, fresh_pass && page_after.is_none());
            let checkpoint = match &page.next_page_cursor {
                Some(token) => Checkpoint::Resume {
                    token: token.clone(),
                    watermark,
                },
                None => Checkpoint::Complete { watermark },
            };
            let stats = self.db.commit_page(&page.items, &checkpoint).await?;
            phase.absorb(&stats);
            fetched += page.items.len() as u64;

            tracing::debug!(
                "{} page {}: {} item(s), next {:?}",
                resource,
                phase.pages,
                page.items.len(),
                page.next_page_cursor
            );
            self.state.progress(SyncProgress {
                phase: resource.name().to_string(),
                current: fetched,
                total: page.total_count,
                message: format!("Syncing {}", resource),
            });

            match page.next_page_cursor {
                Some(token) => page_after = Some(token),
                None => break,
            }
        }

        Ok(phase)
    }

    async fn verify(&self, resource: Resource, phase: &mut PhaseReport) -> SyncResult<Verification> {
        let policy = self.config.full_refresh_policy;
        let remote_count = match policy {
            FullRefreshPolicy::AlwaysRefetch => None,
            FullRefreshPolicy::BackfillOnMismatch | FullRefreshPolicy::VerifyOnly => {
                let count_query = PageQuery {
                    updated_after: None,
                    page_after: None,
                    page_size: 1,
                };
                self.remote.fetch_page(resource, &count_query).await?.total_count
            }
        };
        let local_count = self.db.local_count(resource).await?;

        let mismatch = remote_count != Some(local_count);
        let backfill = match policy {
            FullRefreshPolicy::AlwaysRefetch => true,
            FullRefreshPolicy::BackfillOnMismatch => mismatch,
            FullRefreshPolicy::VerifyOnly => false,
        };

        if mismatch && remote_count.is_some() {
            tracing::info!(
                "{} count mismatch: {} local, {:?} on server",
                resource,
                local_count,
                remote_count
            );
        }

        let mut verification = Verification {
            local_count,
            remote_count,
            backfilled: false,
            pruned: 0,
        };

        if backfill {
            let seen = self.backfill(resource, phase).await?;
            verification.pruned = self.db.prune_missing(resource, &seen).await?;
            verification.backfilled = true;
            verification.local_count = self.db.local_count(resource).await?;
            if verification.remote_count.is_none() {
                verification.remote_count = Some(seen.len() as u64);
            }
        }

        if let Some(total) = verification.remote_count {
            self.db.record_verification(resource, total).await?;
        }
        Ok(verification)
    }

    /// Unfiltered traversal; items only, the cursor is left alone
    async fn backfill(&self, resource: Resource, phase: &mut PhaseReport) -> SyncResult<HashSet<i64>> {
        let mut seen = HashSet::new();
        let mut page_after: Option<String> = None;

        loop {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let query = PageQuery {
                updated_after: None,
                page_after: page_after.clone(),
                page_size: self.config.page_size,
            };
            let page = self.remote.fetch_page(resource, &query).await?;
            seen.extend(page.items.ids());

            let stats = self.db.commit_page(&page.items, &Checkpoint::None).await?;
            phase.absorb(&stats);

            self.state.progress(SyncProgress {
                phase: resource.name().to_string(),
                current: seen.len() as u64,
                total: page.total_count,
                message: format!("Verifying {}", resource),
            });

            match page.next_page_cursor {
                Some(token) => page_after = Some(token),
                None => break,
            }
        }

        Ok(seen)
    }
}

/// Watermark a page contributes to its pass. The first page of a pass
/// carries the collection stamp; without one, item stamps are used.
fn pass_watermark(page: &Page, first_page: bool) -> Option<DateTime<Utc>> {
    match (first_page, page.data_updated_at) {
        (true, Some(stamp)) => Some(stamp),
        (false, Some(_)) => None,
        (_, None) => page.items.max_updated_at(),
    }
}
