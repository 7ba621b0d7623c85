//! # Sync Scheduler
//!
//! Time rules behind the automatic triggers. Both types take the current time
//! as an argument so the rules can be driven by a test clock.
//!
//! - [`Debouncer`]: suppresses a trigger that fires again within its threshold
//! - [`HourlyTimer`]: fires at the top of every hour, is cancelled on suspend
//!   and recomputed on resume, reporting a boundary crossed while suspended

use crate::shared::srs::floor_to_hour;
use chrono::{DateTime, TimeDelta, Utc};

/// Minimum spacing between two firings of one trigger
#[derive(Debug, Clone)]
pub struct Debouncer {
    threshold: TimeDelta,
    last_fired: Option<DateTime<Utc>>,
}

impl Debouncer {
    pub fn new(threshold: TimeDelta) -> Self {
        Self {
            threshold,
            last_fired: None,
        }
    }

    /// Fire unless the previous firing was less than `threshold` before `now`
    pub fn try_fire(&mut self, now: DateTime<Utc>) -> bool {
        match self.last_fired {
            Some(last) if now - last < self.threshold => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }
}

/// Cancel-and-reschedule timer for the top of each hour
#[derive(Debug, Clone, Default)]
pub struct HourlyTimer {
    next_due: Option<DateTime<Utc>>,
    /// Boundary that was pending when the timer was suspended
    suspended_due: Option<DateTime<Utc>>,
}

impl HourlyTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the next boundary strictly after `now`
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.next_due = Some(next_boundary(now));
        self.suspended_due = None;
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Consume the boundary if it is due at `now` and reschedule
    pub fn fire(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(next_boundary(now));
                true
            }
            _ => false,
        }
    }

    /// Cancel the timer; the pending boundary is remembered for [`resume`](Self::resume)
    pub fn suspend(&mut self) {
        if let Some(due) = self.next_due.take() {
            self.suspended_due = Some(due);
        }
    }

    /// Re-arm after a suspension. Returns `true` when at least one boundary
    /// passed while suspended; several missed boundaries yield one catch-up.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        let missed = self.suspended_due.take().is_some_and(|due| now >= due);
        self.next_due = Some(next_boundary(now));
        missed
    }
}

fn next_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_hour(now) + TimeDelta::hours(1)
}
