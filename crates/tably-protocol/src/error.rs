//! Transfer protocol error types.

use thiserror::Error;

/// Errors that can occur during transfer protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid packfile format.
    #[error("invalid packfile: {0}")]
    InvalidPackfile(String),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// The peer sent a request that cannot be served.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The peer violated the protocol flow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tably_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the error was caused by the peer's input.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidPackfile(_) | Self::InvalidPktLine(_) | Self::BadRequest(_) => true,
            Self::Storage(tably_storage::StorageError::InvalidObject(_))
            | Self::Storage(tably_storage::StorageError::InvalidSum(_)) => true,
            _ => false,
        }
    }
}
