//! # Sync Engine
//!
//! Keeps the local store consistent with the remote learning service without
//! ever blocking interaction.
//!
//! ## Architecture
//!
//! - **Orchestrator**: phased incremental pulls (quick sync) and verifying
//!   pulls (full refresh), one run at a time
//! - **Triggers**: foreground, view focus, hourly boundary and manual refresh,
//!   debounced and forwarded as normalized requests on one channel
//! - **Dispatcher**: consumes the request channel, coalesces bursts and drives
//!   the orchestrator and the queue processor
//! - **Sync State**: status state machine broadcast to the UI
//! - **Metrics**: run counters and durations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kioku::client::sync::SyncConfig;
//!
//! let config = SyncConfig::default();
//! config.validate().unwrap();
//! assert_eq!(config.foreground_debounce_secs, 30);
//! ```

pub mod background;
pub mod metrics;
pub mod orchestrator;
pub mod overlay;
pub mod scheduler;
pub mod sync_state;
pub mod triggers;

pub use background::SyncDispatcher;
pub use metrics::SyncMetrics;
pub use orchestrator::{
    PhaseFailure, PhaseReport, SyncOrchestrator, SyncOutcome, SyncReport, Verification,
};
pub use overlay::{OverlayPhase, RefreshOverlay};
pub use sync_state::{SyncKind, SyncProgress, SyncState, SyncStateHandle, SyncStatus};
pub use triggers::{LifecycleEvent, SyncRequest, TriggerHub, TriggerPolicy};

use crate::client::offline::retry::BackoffPolicy;
use crate::shared::{ConfigError, Resource};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// What a full refresh does after its delta pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FullRefreshPolicy {
    /// Compare totals and back-fill only resources that disagree
    #[default]
    BackfillOnMismatch,
    /// Re-fetch every resource unfiltered
    AlwaysRefetch,
    /// Compare totals and report, never back-fill
    VerifyOnly,
}

/// How the queue drain treats a terminally failed mutation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterPolicy {
    /// Stop at the dead letter until the user decides
    #[default]
    Halt,
    /// Continue past dead letters; they stay listed
    Skip,
}

/// Named engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Order resources are pulled in; a resource must follow the ones it
    /// references
    pub phase_order: Vec<Resource>,
    /// Minimum time between two foreground-triggered quick syncs
    pub foreground_debounce_secs: u64,
    /// Minimum time between two view-focus-triggered quick syncs
    pub focus_debounce_secs: u64,
    pub backoff: BackoffPolicy,
    pub full_refresh_policy: FullRefreshPolicy,
    pub dead_letter_policy: DeadLetterPolicy,
    /// Items requested per page
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            phase_order: Resource::PHASE_ORDER.to_vec(),
            foreground_debounce_secs: 30,
            focus_debounce_secs: 30,
            backoff: BackoffPolicy::default(),
            full_refresh_policy: FullRefreshPolicy::default(),
            dead_letter_policy: DeadLetterPolicy::default(),
            page_size: 500,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (position, resource) in self.phase_order.iter().enumerate() {
            if self.phase_order[..position].contains(resource) {
                return Err(ConfigError::InvalidPhaseOrder(format!(
                    "{} appears more than once",
                    resource
                )));
            }
            for dependency in resource.depends_on() {
                match self.phase_order.iter().position(|r| r == dependency) {
                    Some(dep_position) if dep_position < position => {}
                    _ => {
                        return Err(ConfigError::InvalidPhaseOrder(format!(
                            "{} must come after {}",
                            resource, dependency
                        )))
                    }
                }
            }
        }

        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::InvalidValue {
                field: "backoff.jitter",
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.backoff.floor_secs > self.backoff.cap_secs {
            return Err(ConfigError::InvalidValue {
                field: "backoff.floor_secs",
                message: "must not exceed backoff.cap_secs".to_string(),
            });
        }
        Ok(())
    }

    pub fn foreground_debounce(&self) -> TimeDelta {
        TimeDelta::seconds(self.foreground_debounce_secs as i64)
    }

    pub fn focus_debounce(&self) -> TimeDelta {
        TimeDelta::seconds(self.focus_debounce_secs as i64)
    }
}
