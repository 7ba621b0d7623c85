//! Sync Engine Errors
//!
//! Failure taxonomy shared by the orchestrator, the queue processor and the
//! session. Remote failures arrive as [`RemoteError`] and are mapped here;
//! local store failures arrive as `sqlx::Error` and become `Storage`.

use crate::client::remote::RemoteError;
use crate::shared::{ConfigError, SharedError};
use thiserror::Error;

/// Errors raised by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient; retried with backoff
    #[error("Network error: {0}")]
    Network(String),

    /// Halts all sync activity until the user signs in again
    #[error("Re-authentication required: {0}")]
    Auth(String),

    /// Terminal for the mutation that caused it
    #[error("Validation error: {0}")]
    Validation(String),

    /// Aborts the current phase or drain; committed data is untouched
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Local assumption is stale; the entity is re-pulled before a retry
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        SyncError::Auth(message.into())
    }

    pub fn storage(error: sqlx::Error) -> Self {
        SyncError::Storage(error)
    }

    /// Worth retrying on a later trigger
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Conflict(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Network(message) => SyncError::Network(message),
            RemoteError::Decode(message) => SyncError::Network(format!("undecodable response: {}", message)),
            RemoteError::Auth { status } => SyncError::Auth(format!("server answered HTTP {}", status)),
            RemoteError::Validation { message, .. } => SyncError::Validation(message),
            RemoteError::Conflict { message } => SyncError::Conflict(message),
        }
    }
}

/// Result type for sync engine operations
pub type SyncResult<T> = Result<T, SyncError>;
