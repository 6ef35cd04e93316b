//! The environment contract consumed by the commit pipeline.

use std::sync::Arc;

use super::errors::CommitResult;
use crate::batch::Batch;
use crate::sequence::SequenceCursors;
use crate::wal::SyncWait;

/// Hooks the host engine injects into the pipeline.
///
/// The pipeline drives batches through write and apply but owns neither the
/// log nor the tables; it only sequences and publishes. Memtable selection,
/// rotation on a full table, and WAL ownership all live behind this trait.
pub trait CommitEnv: Send + Sync {
    /// The in-memory table batches are applied into.
    type Table: Send + Sync;

    /// The shared sequence cursors this environment publishes through.
    fn sequences(&self) -> &SequenceCursors;

    /// Durably append the batch's payload to the WAL and return the table
    /// it must be applied into (`None` when there is nothing to apply, as
    /// for log-only batches in stripped-down environments).
    ///
    /// When `sync` is supplied and the return is `Ok`, the environment must
    /// arrange for the slot to be finished once an fsync covering this
    /// record completes, successfully or not. On `Err` the slot must be
    /// left untouched; the pipeline will not wait on it.
    fn write(
        &self,
        batch: &Batch,
        sync: Option<&Arc<SyncWait>>,
    ) -> CommitResult<Option<Arc<Self::Table>>>;

    /// Install the batch into the table returned by `write`.
    fn apply(&self, batch: &Batch, table: Option<&Self::Table>) -> CommitResult<()>;
}
