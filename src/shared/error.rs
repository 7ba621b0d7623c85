//! Shared Error Types
//!
//! Errors raised by the shared domain types when a stored or remote value
//! cannot be turned back into its typed form.
//!
//! # Error Categories
//!
//! - `UnknownName` - A persisted enum name the model does not recognise
//! - `InvalidField` - A field holds a value the model does not allow
//!
//! # Usage
//!
//! ```rust
//! use kioku::shared::error::SharedError;
//!
//! let error = SharedError::invalid("srs_stage", "stage 12 is outside 0..=9");
//! assert!(error.to_string().contains("srs_stage"));
//! ```
use thiserror::Error;

/// Errors produced by the shared domain model
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharedError {
    /// Name column or wire string outside the known set
    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidField { field: String, message: String },
}

impl SharedError {
    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}
