//! WAL error types.
//!
//! Errors are clonable so a single fsync outcome can fan out to every commit
//! waiting on the same group sync.

use thiserror::Error;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors produced by the write-ahead log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalError {
    /// Appending a record to the log failed.
    #[error("WAL append failed: {0}")]
    Append(String),

    /// An fsync of the log failed. Commits waiting on the covering group
    /// sync all observe this error.
    #[error("WAL fsync failed: {0}")]
    Fsync(String),

    /// A record failed checksum validation on read.
    #[error("WAL corruption: {0}")]
    Corruption(String),

    /// The writer has been closed; no further appends are accepted.
    #[error("WAL is closed")]
    Closed,
}
