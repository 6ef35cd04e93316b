//! stratadb - log-structured key-value storage engine core
//!
//! The centerpiece is the commit pipeline: batches are admitted under a
//! concurrency bound, stamped with monotonic sequence numbers, appended to a
//! write-ahead log, applied to a memtable, and published to readers in
//! enqueue order even when the middle stages finish out of order. A batch
//! requesting durability is not acknowledged before an fsync covering its
//! record has returned.

pub mod batch;
pub mod commit;
pub mod engine;
pub mod memtable;
pub mod observability;
pub mod sequence;
pub mod wal;

pub use batch::Batch;
pub use commit::{CommitConfig, CommitEnv, CommitError, CommitPipeline, CommitResult};
pub use engine::{Engine, EngineConfig};
pub use sequence::SequenceCursors;
