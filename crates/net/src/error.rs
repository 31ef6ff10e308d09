//! Store error types

use std::io;

/// Store result type
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timed out waiting for the store")]
    Timeout,

    #[error("Invalid path '{0}'")]
    InvalidPath(String),

    #[error("Transaction on '{path}' gave up after {attempts} attempts")]
    TransactionAborted { path: String, attempts: u32 },
}
