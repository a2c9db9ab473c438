//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object was not found.
    #[error("{kind} not found: {sum}")]
    NotFound {
        /// Object kind ("commit", "table", "block").
        kind: &'static str,
        /// Hex sum of the missing object.
        sum: String,
    },

    /// An object could not be decoded from its canonical encoding.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A sum could not be parsed.
    #[error("invalid sum: {0}")]
    InvalidSum(String),

    /// The backing engine reported a failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
