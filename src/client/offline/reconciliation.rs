//! # State Reconciliation
//!
//! Decides what happens when a server version of a row meets the locally
//! stored one. Pulls and mutation acknowledgments both go through
//! [`reconcile`], so the two writers agree on a single rule:
//!
//! - **Newer wins**: an incoming version replaces the stored one only if its
//!   `data_updated_at` is at least as new. Equal stamps replace, which keeps
//!   re-applying a page idempotent.
//! - **Pending rows are shadowed**: while an assignment holds unacknowledged
//!   mutations the canonical columns are still refreshed, but the optimistic
//!   overlay the user sees is left alone until the queue settles.
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use kioku::client::offline::reconciliation::{reconcile, Reconciliation, RowVersion};
//!
//! let stored = RowVersion::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
//! let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! assert_eq!(reconcile(Some(&stored), older), Reconciliation::Stale);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version stamp of a stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVersion {
    pub data_updated_at: DateTime<Utc>,
    /// Creation time of the oldest unacknowledged mutation touching the row
    pub pending_since: Option<DateTime<Utc>>,
}

impl RowVersion {
    pub fn new(data_updated_at: DateTime<Utc>) -> Self {
        Self {
            data_updated_at,
            pending_since: None,
        }
    }

    pub fn with_pending(mut self, pending_since: Option<DateTime<Utc>>) -> Self {
        self.pending_since = pending_since;
        self
    }
}

/// Outcome of reconciling one incoming row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// No local row yet
    Insert,
    /// Incoming version replaces the stored one
    Replace,
    /// Canonical columns replaced; the optimistic overlay stays visible
    ReplaceShadowed,
    /// Incoming version is older than the stored one and is dropped
    Stale,
}

impl Reconciliation {
    /// Whether the incoming version is written at all
    pub fn writes(&self) -> bool {
        !matches!(self, Reconciliation::Stale)
    }
}

/// Decide how an incoming version stamped `incoming` meets the stored row
pub fn reconcile(stored: Option<&RowVersion>, incoming: DateTime<Utc>) -> Reconciliation {
    match stored {
        None => Reconciliation::Insert,
        Some(stored) if incoming < stored.data_updated_at => Reconciliation::Stale,
        Some(stored) if stored.pending_since.is_some() => Reconciliation::ReplaceShadowed,
        Some(_) => Reconciliation::Replace,
    }
}

/// Tally of reconciliation outcomes for one page or pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub inserted: u64,
    pub replaced: u64,
    pub shadowed: u64,
    pub stale: u64,
}

impl ReconcileStats {
    pub fn record(&mut self, outcome: Reconciliation) {
        match outcome {
            Reconciliation::Insert => self.inserted += 1,
            Reconciliation::Replace => self.replaced += 1,
            Reconciliation::ReplaceShadowed => self.shadowed += 1,
            Reconciliation::Stale => self.stale += 1,
        }
    }

    /// Rows written by the page
    pub fn written(&self) -> u64 {
        self.inserted + self.replaced + self.shadowed
    }

    /// Rows dropped as older than the stored version
    pub fn skipped(&self) -> u64 {
        self.stale
    }

    pub fn merge(&mut self, other: &ReconcileStats) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.shadowed += other.shadowed;
        self.stale += other.stale;
    }
}
