//! Sync Client Module
//!
//! Offline-first sync engine of the study client. Everything the user does
//! is written to the local store first; the engine reconciles that store with
//! the remote learning service in the background.
//!
//! # Architecture
//!
//! The client module is organized into focused submodules:
//!
//! - **`config`** - TOML configuration with environment overrides
//! - **`error`** - Sync engine error taxonomy
//! - **`local_db`** - Local SQLite store: entities, queue, cursors, read models
//! - **`offline`** - Pending mutation queue, optimistic display, queue replay
//! - **`remote`** - Remote service trait and its HTTPS implementation
//! - **`sync`** - Orchestrator, triggers, dispatcher and status
//! - **`session`** - Per-user container wiring the above together
//! - **`main`** - `kioku-sync` command line entry point (binary)
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs      - Module exports and documentation
//! ├── main.rs     - CLI entry point
//! ├── config.rs   - Configuration loading
//! ├── error.rs    - SyncError
//! ├── remote.rs   - RemoteService, HttpRemote
//! ├── session.rs  - Session
//! ├── local_db/   - LocalDatabase
//! ├── offline/    - PendingMutationQueue, QueueProcessor
//! └── sync/       - SyncOrchestrator, TriggerHub, SyncDispatcher
//! ```

pub mod config;
pub mod error;
pub mod local_db;
pub mod offline;
pub mod remote;
pub mod session;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use local_db::LocalDatabase;
pub use remote::{HttpRemote, RemoteError, RemoteService};
pub use session::Session;
