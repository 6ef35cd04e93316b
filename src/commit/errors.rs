//! Commit error taxonomy.
//!
//! The first error a batch hits in the pipeline is the one its submitter
//! sees; other in-flight batches are unaffected. The pipeline neither
//! retries nor logs — both belong to the host environment.

use thiserror::Error;

use crate::memtable::MemTableError;
use crate::wal::WalError;

/// Result type for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;

/// Errors surfaced to a batch's submitter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    /// The write hook failed: the batch never reached the log.
    #[error("batch write failed: {0}")]
    Write(#[from] WalError),

    /// The apply hook failed: the memtable rejected the batch.
    #[error("batch apply failed: {0}")]
    Apply(#[from] MemTableError),

    /// The fsync covering this batch's record failed after a successful
    /// append.
    #[error("batch sync failed: {0}")]
    Sync(WalError),

    /// Failure reported by an injected environment hook.
    #[error("commit hook failed: {0}")]
    Hook(String),
}
