//! # Retry Backoff
//!
//! Exponential backoff for mutations that failed transiently.
//!
//! ## Features
//!
//! - **Exponential Backoff**: the wait doubles with each failed attempt
//! - **Floor and Cap**: never retry sooner than `floor_secs` or later than
//!   `cap_secs`
//! - **Jitter**: a random extra of up to `jitter` times the delay spreads
//!   retries from many clients apart
//!
//! ## Usage
//!
//! ```rust
//! use kioku::client::offline::retry::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default();
//! let wait = policy.delay_without_jitter(3);
//! assert!(wait.num_seconds() >= policy.floor_secs as i64);
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule for retryable failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Shortest wait before any retry
    pub floor_secs: u64,
    /// Wait after the first failure, doubled per further attempt
    pub base_secs: u64,
    /// Longest wait between attempts
    pub cap_secs: u64,
    /// Random extra as a fraction of the delay (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor_secs: 2,
            base_secs: 2,
            cap_secs: 300,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), jitter included
    pub fn delay_for(&self, attempt: u32) -> TimeDelta {
        let sample: f64 = rand::rng().random();
        self.delay_with_sample(attempt, sample)
    }

    /// Deterministic delay, as if the jitter sample were zero
    pub fn delay_without_jitter(&self, attempt: u32) -> TimeDelta {
        self.delay_with_sample(attempt, 0.0)
    }

    /// When a mutation failing for the `attempt`th time at `now` is eligible again
    pub fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(attempt)
    }

    fn delay_with_sample(&self, attempt: u32, sample: f64) -> TimeDelta {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_secs.saturating_mul(1u64 << exponent);
        let floor = self.floor_secs.min(self.cap_secs);
        let bounded = raw.clamp(floor, self.cap_secs.max(floor));

        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        let extra_ms = (bounded as f64 * 1000.0 * jitter) as i64;
        let cap_ms = (self.cap_secs.max(floor) as i64).saturating_mul(1000);
        let total_ms = (bounded as i64).saturating_mul(1000).saturating_add(extra_ms).min(cap_ms);

        TimeDelta::milliseconds(total_ms)
    }
}
