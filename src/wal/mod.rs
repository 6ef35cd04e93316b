//! Write-ahead log: framed records, an append-only writer, and group fsync.
//!
//! Durability contract: a commit requesting sync is acknowledged only after
//! an fsync covering its record has returned. Concurrent requests share one
//! fsync where timing allows; the semantics are identical to one fsync per
//! commit, only cheaper.

mod errors;
mod record;
mod sync;
mod writer;

pub use errors::{WalError, WalResult};
pub use record::{checksum, decode_frame, encode_frame, FRAME_HEADER_LEN};
pub use sync::SyncWait;
pub use writer::{LogWriter, WalFile};
