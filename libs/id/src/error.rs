//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID is not a decimal integer.
    #[error("invalid {kind} ID '{actual}': not an integer")]
    NotAnInteger { kind: &'static str, actual: String },

    /// The ID is zero or negative.
    #[error("invalid {kind} ID {value}: must be positive")]
    NotPositive { kind: &'static str, value: i64 },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
