//! Shared Module
//!
//! Platform-agnostic types used by the local store, the remote client and the
//! sync engine alike. Everything here is plain data plus pure functions, so it
//! can be exercised without a runtime or a database.

/// Synced entity types and the resource list
pub mod models;

/// Fixed SRS stage table
pub mod srs;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::SharedError;
pub use models::{
    Assignment, LevelProgression, Meaning, Reading, Resource, ReviewStatistic, StudyMaterial,
    Subject, SubjectType, User, VoiceActor,
};
