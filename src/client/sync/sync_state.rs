//! # Sync State Management
//!
//! Shared status state machine consumed by the triggers and the UI.
//!
//! ```text
//! idle ─▶ quick_syncing ──┬─▶ complete ─▶ idle
//!     └─▶ full_refreshing ┴─▶ error ────▶ idle (message kept)
//! ```
//!
//! ## Features
//!
//! - **State Tracking**: current status, advisory progress and last error
//! - **Status Updates**: every change is broadcast on a `watch` channel
//! - **Error Retention**: the last error survives the return to idle and is
//!   only cleared when the next run begins
//! - **Auth Gate**: once a credential is rejected every sync activity halts
//!   until the flag is cleared

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Kind of pull run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    QuickSync,
    FullRefresh,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    QuickSyncing,
    FullRefreshing,
    Complete,
    Error,
}

/// Advisory progress of the running phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: String,
    pub current: u64,
    pub total: Option<u64>,
    pub message: String,
}

/// Snapshot of the engine's status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub progress: Option<SyncProgress>,
    pub last_error: Option<String>,
    pub auth_required: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self.status, SyncStatus::QuickSyncing | SyncStatus::FullRefreshing)
    }

    pub fn is_full_refresh(&self) -> bool {
        self.status == SyncStatus::FullRefreshing
    }
}

/// Cloneable handle to the shared status
#[derive(Debug, Clone)]
pub struct SyncStateHandle {
    tx: Arc<watch::Sender<SyncState>>,
}

impl Default for SyncStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    pub fn auth_required(&self) -> bool {
        self.tx.borrow().auth_required
    }

    /// A run starts; the previous error is overwritten
    pub fn begin(&self, kind: SyncKind) {
        self.tx.send_modify(|state| {
            state.status = match kind {
                SyncKind::QuickSync => SyncStatus::QuickSyncing,
                SyncKind::FullRefresh => SyncStatus::FullRefreshing,
            };
            state.progress = None;
            state.last_error = None;
        });
    }

    pub fn progress(&self, progress: SyncProgress) {
        self.tx.send_modify(|state| state.progress = Some(progress));
    }

    pub fn complete(&self) {
        self.tx.send_modify(|state| {
            state.status = SyncStatus::Complete;
            state.progress = None;
            state.last_completed_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| {
            state.status = SyncStatus::Error;
            state.progress = None;
            state.last_error = Some(message);
        });
    }

    /// Return to idle after `complete`, `fail` or a cancelled run.
    ///
    /// The orchestrator only settles cancelled runs itself; a finished run's
    /// `complete` or `error` is settled by whoever displays it.
    pub fn settle(&self) {
        self.tx.send_if_modified(|state| {
            if state.status == SyncStatus::Idle {
                return false;
            }
            state.status = SyncStatus::Idle;
            state.progress = None;
            true
        });
    }

    /// Halt all sync activity until the user signs in again
    pub fn require_auth(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("Sync halted: {}", message);
        self.tx.send_modify(|state| {
            state.auth_required = true;
            state.last_error = Some(message);
            if state.is_syncing() {
                state.status = SyncStatus::Error;
                state.progress = None;
            }
        });
    }

    pub fn clear_auth(&self) {
        self.tx.send_if_modified(|state| {
            let was_required = state.auth_required;
            state.auth_required = false;
            was_required
        });
    }

    /// Back to a fresh idle state (logout)
    pub fn reset(&self) {
        self.tx.send_replace(SyncState::default());
    }
}
