//! Client error types.

use thiserror::Error;

/// Errors raised while talking to a node.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The node's reply could not be understood.
    #[error(transparent)]
    Protocol(#[from] tably_protocol::ProtocolError),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] tably_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
