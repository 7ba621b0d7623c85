//! # Sync Triggers
//!
//! Turns host lifecycle events and the hourly clock into normalized
//! [`SyncRequest`]s on a single channel.
//!
//! | event                 | request      | rule                                   |
//! |-----------------------|--------------|----------------------------------------|
//! | foreground            | quick sync   | debounced, plus hourly catch-up        |
//! | view focus regained   | quick sync   | debounced, own counter                 |
//! | top of the hour       | quick sync   | timer cancelled while backgrounded     |
//! | pull-to-refresh       | full refresh | never debounced                        |
//!
//! [`TriggerPolicy`] holds the rules and takes the time as an argument;
//! [`TriggerHub`] wraps it with the wall clock, the hourly timer task and the
//! request channel.

use crate::client::sync::scheduler::{Debouncer, HourlyTimer};
use crate::client::sync::SyncConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Host lifecycle notifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Foreground,
    Background,
    ViewFocused,
    ManualRefresh,
}

/// Work requested from the dispatcher
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SyncRequest {
    Quick,
    Full,
}

/// Merge a burst of requests into at most one run; a full refresh subsumes
/// any quick sync
pub fn coalesce<I>(requests: I) -> Option<SyncRequest>
where
    I: IntoIterator<Item = SyncRequest>,
{
    requests.into_iter().max()
}

/// Debounce and timer rules of the automatic triggers
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    foreground: Debouncer,
    focus: Debouncer,
    hourly: HourlyTimer,
    backgrounded: bool,
}

impl TriggerPolicy {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            foreground: Debouncer::new(config.foreground_debounce()),
            focus: Debouncer::new(config.focus_debounce()),
            hourly: HourlyTimer::new(),
            backgrounded: false,
        }
    }

    /// Arm the hourly timer when the app starts in the foreground
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.backgrounded = false;
        self.hourly.arm(now);
    }

    pub fn next_hourly_due(&self) -> Option<DateTime<Utc>> {
        self.hourly.next_due()
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded
    }

    /// Apply an event at `now` and return the resulting request, if any
    pub fn handle(&mut self, event: LifecycleEvent, now: DateTime<Utc>) -> Option<SyncRequest> {
        match event {
            LifecycleEvent::Foreground => self.on_foreground(now),
            LifecycleEvent::Background => {
                self.on_background();
                None
            }
            LifecycleEvent::ViewFocused => self.on_view_focus(now),
            LifecycleEvent::ManualRefresh => Some(self.on_manual_refresh()),
        }
    }

    /// App came to the foreground. A boundary missed while backgrounded and
    /// the foreground trigger itself collapse into one request.
    pub fn on_foreground(&mut self, now: DateTime<Utc>) -> Option<SyncRequest> {
        let catch_up = if self.backgrounded {
            self.backgrounded = false;
            self.hourly.resume(now)
        } else {
            if !self.hourly.is_armed() {
                self.hourly.arm(now);
            }
            false
        };
        let foreground = self.foreground.try_fire(now);

        let requests = [catch_up, foreground]
            .into_iter()
            .filter(|fired| *fired)
            .map(|_| SyncRequest::Quick);
        coalesce(requests)
    }

    pub fn on_background(&mut self) {
        self.backgrounded = true;
        self.hourly.suspend();
    }

    pub fn on_view_focus(&mut self, now: DateTime<Utc>) -> Option<SyncRequest> {
        if self.backgrounded {
            return None;
        }
        self.focus.try_fire(now).then_some(SyncRequest::Quick)
    }

    pub fn on_manual_refresh(&mut self) -> SyncRequest {
        SyncRequest::Full
    }

    /// Timer tick; fires only when a boundary is due and the app is in front
    pub fn on_hour_boundary(&mut self, now: DateTime<Utc>) -> Option<SyncRequest> {
        if self.backgrounded {
            return None;
        }
        self.hourly.fire(now).then_some(SyncRequest::Quick)
    }
}

/// Wall-clock front of [`TriggerPolicy`] feeding the request channel
pub struct TriggerHub {
    policy: Arc<Mutex<TriggerPolicy>>,
    tx: mpsc::UnboundedSender<SyncRequest>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerHub {
    pub fn new(config: &SyncConfig) -> (Self, mpsc::UnboundedReceiver<SyncRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            policy: Arc::new(Mutex::new(TriggerPolicy::new(config))),
            tx,
            timer: Mutex::new(None),
        };
        (hub, rx)
    }

    /// Arm the hourly timer and start its task
    pub async fn start(&self) {
        self.policy.lock().await.start(Utc::now());
        self.spawn_timer().await;
        tracing::info!("Sync triggers started");
    }

    pub async fn handle(&self, event: LifecycleEvent) -> Option<SyncRequest> {
        self.handle_at(event, Utc::now()).await
    }

    /// Apply an event at an explicit time and forward the resulting request
    pub async fn handle_at(&self, event: LifecycleEvent, now: DateTime<Utc>) -> Option<SyncRequest> {
        let request = self.policy.lock().await.handle(event, now);
        tracing::debug!("Lifecycle event {:?} -> {:?}", event, request);

        match event {
            LifecycleEvent::Background => self.stop_timer().await,
            LifecycleEvent::Foreground => self.spawn_timer().await,
            _ => {}
        }

        if let Some(request) = request {
            self.send(request);
        }
        request
    }

    /// Forward lifecycle events from `events` until the sender is dropped
    pub fn listen(self: Arc<Self>, mut events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event).await;
            }
            tracing::debug!("Lifecycle event stream closed");
        })
    }

    pub async fn shutdown(&self) {
        self.stop_timer().await;
    }

    fn send(&self, request: SyncRequest) {
        if self.tx.send(request).is_err() {
            tracing::debug!("Dropped {:?}: dispatcher is gone", request);
        }
    }

    async fn spawn_timer(&self) {
        let mut timer = self.timer.lock().await;
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let policy = Arc::clone(&self.policy);
        let tx = self.tx.clone();
        *timer = Some(tokio::spawn(async move {
            loop {
                let Some(due) = policy.lock().await.next_hourly_due() else {
                    break;
                };
                let wait = (due - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                let request = policy.lock().await.on_hour_boundary(Utc::now());
                if let Some(request) = request {
                    tracing::debug!("Hourly boundary reached");
                    if tx.send(request).is_err() {
                        break;
                    }
                }
            }
        }));
    }

    async fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }
}

impl Drop for TriggerHub {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.try_lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}
