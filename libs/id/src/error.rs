//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The value is not a valid integer ID.
    #[error("invalid {kind} ID '{actual}': expected an integer")]
    NotNumeric { kind: &'static str, actual: String },

    /// A composite ID is missing its `:` separator.
    #[error("scoped UID '{0}' is missing the ':' separator")]
    MissingSeparator(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
