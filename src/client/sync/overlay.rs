//! Pull-to-refresh overlay state.
//!
//! ```text
//! idle ─pull─▶ syncing ─run settles─▶ fading_out ─fade done─▶ idle
//! ```
//!
//! The overlay leaves `syncing` only after it has seen the full refresh it
//! requested start and stop, so a request still queued behind another run
//! keeps the spinner up.

use crate::client::sync::sync_state::{SyncProgress, SyncState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPhase {
    #[default]
    Idle,
    Syncing,
    FadingOut,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOverlay {
    phase: OverlayPhase,
    saw_refresh: bool,
    progress: Option<SyncProgress>,
}

impl RefreshOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> OverlayPhase {
        self.phase
    }

    /// Progress to render under the spinner
    pub fn progress(&self) -> Option<&SyncProgress> {
        self.progress.as_ref()
    }

    /// User pulled the view down. Returns `true` when a full refresh should
    /// be requested; a pull while the overlay is showing is ignored.
    pub fn pull_to_refresh(&mut self) -> bool {
        if self.phase != OverlayPhase::Idle {
            return false;
        }
        self.phase = OverlayPhase::Syncing;
        self.saw_refresh = false;
        self.progress = None;
        true
    }

    /// Follow the engine's status
    pub fn observe(&mut self, state: &SyncState) {
        if self.phase != OverlayPhase::Syncing {
            return;
        }

        if state.is_full_refresh() {
            self.saw_refresh = true;
            self.progress = state.progress.clone();
            return;
        }

        // An auth halt means the requested refresh will never start
        if (self.saw_refresh && !state.is_syncing()) || state.auth_required {
            self.phase = OverlayPhase::FadingOut;
            self.progress = None;
        }
    }

    /// Fade-out animation finished
    pub fn fade_finished(&mut self) {
        if self.phase == OverlayPhase::FadingOut {
            self.phase = OverlayPhase::Idle;
        }
    }
}
