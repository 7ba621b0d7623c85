//! # Sync Metrics
//!
//! Run counters and timings for pulls and queue drains, exposed next to the
//! status so the UI and the CLI can report on sync health.
//!
//! ## Features
//!
//! - **Run Tracking**: started, succeeded and failed pull runs
//! - **Timings**: last and rolling average run duration
//! - **Throughput**: items written by pulls and mutations acknowledged

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub cancelled_syncs: u64,
    pub average_sync_duration: Duration,
    pub last_sync_duration: Option<Duration>,
    pub last_sync_start: Option<Instant>,
    /// Rows inserted or replaced by pulls
    pub items_written: u64,
    /// Rows skipped as stale by pulls
    pub items_skipped: u64,
    pub mutations_submitted: u64,
    pub mutations_dead_lettered: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sync_start(&mut self) {
        self.last_sync_start = Some(Instant::now());
        self.total_syncs += 1;
    }

    pub fn record_sync_success(&mut self, items_written: u64, items_skipped: u64) {
        if let Some(start) = self.last_sync_start.take() {
            let duration = start.elapsed();
            self.last_sync_duration = Some(duration);
            self.successful_syncs += 1;

            // Rolling average over successful runs
            let total_duration =
                self.average_sync_duration * (self.successful_syncs - 1) as u32 + duration;
            self.average_sync_duration = total_duration / self.successful_syncs as u32;
        }
        self.items_written += items_written;
        self.items_skipped += items_skipped;
    }

    /// A failed run still keeps what its committed phases wrote
    pub fn record_sync_failure(&mut self, items_written: u64) {
        if let Some(start) = self.last_sync_start.take() {
            self.last_sync_duration = Some(start.elapsed());
        }
        self.failed_syncs += 1;
        self.items_written += items_written;
    }

    pub fn record_sync_cancelled(&mut self, items_written: u64) {
        self.last_sync_start = None;
        self.cancelled_syncs += 1;
        self.items_written += items_written;
    }

    pub fn record_drain(&mut self, submitted: u64, dead_lettered: u64) {
        self.mutations_submitted += submitted;
        self.mutations_dead_lettered += dead_lettered;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            0.0
        } else {
            self.successful_syncs as f64 / self.total_syncs as f64
        }
    }
}
