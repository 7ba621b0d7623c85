//! Kioku - Main Library
//!
//! Kioku is the offline-first sync engine of a spaced-repetition study client.
//! Lessons and reviews are recorded against a local SQLite store and shown
//! immediately; a background engine replays them to the remote learning
//! service in order and pulls server changes back incrementally.
//!
//! # Module Structure
//!
//! The library is organized into two modules:
//!
//! - **`shared`** - Plain data shared by every layer
//!   - Synced entities and the resource list
//!   - SRS stage table
//!   - Shared error and configuration types
//!
//! - **`client`** - The sync engine
//!   - Local store with cursors, mutation queue and read models
//!   - Offline queue replay with backoff and dead letters
//!   - Phased quick sync and verifying full refresh
//!   - Lifecycle triggers, dispatcher and session container
//!
//! # Usage
//!
//! ```rust,no_run
//! use kioku::client::{Config, Session};
//! use kioku::client::sync::LifecycleEvent;
//!
//! # async fn example() -> kioku::client::SyncResult<()> {
//! let config = Config::load(Config::default_path().as_deref())?;
//! let session = Session::start(&config).await?;
//!
//! // Durable before this returns; submitted in the background
//! session.record_review(440, 1, 0).await?;
//!
//! session.notify(LifecycleEvent::Foreground).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! - **Runs**: one orchestrator run at a time; overlapping requests coalesce
//! - **Queue**: one drain at a time, strictly in sequence order
//! - **Store**: every page and every queue transition is one SQLite
//!   transaction
//!
//! # Error Handling
//!
//! - `SharedError` and `ConfigError` for data and configuration
//! - `RemoteError` classifies service failures
//! - `SyncError` is the engine taxonomy; failures end up in a `SyncReport`
//!   or `DrainReport` rather than escaping to the caller

/// Shared types and data structures
pub mod shared;

/// Sync engine
pub mod client;
