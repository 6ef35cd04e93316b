//! Append-only log writer with group fsync.
//!
//! The writer has no background thread. Appends are serialized by a short
//! lock; fsyncs are coalesced by electing a leader among the threads that
//! requested durability. The first thread to register a sync while no fsync
//! is in flight becomes the leader: it performs the fsync, finishes every
//! slot registered before it re-checks, and keeps going while new slots
//! arrived mid-fsync. Followers return immediately and their submitters
//! block on their own [`SyncWait`].
//!
//! Appends are not blocked by an in-flight fsync, so a slow disk cannot
//! prevent concurrent commits from reaching the log. The pending-slot list
//! is unbounded; admission control caps it upstream.

use std::fs::File;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};

use super::errors::{WalError, WalResult};
use super::record;
use super::sync::SyncWait;

/// Minimal file surface the log writer needs. Methods take `&self` so an
/// fsync can run while another thread appends; implementations must make
/// both safe to call concurrently.
pub trait WalFile: Send + Sync {
    /// Append `buf` at the end of the file.
    fn append(&self, buf: &[u8]) -> io::Result<()>;

    /// Flush written data to stable storage.
    fn sync(&self) -> io::Result<()>;
}

impl WalFile for File {
    fn append(&self, buf: &[u8]) -> io::Result<()> {
        let mut handle = self;
        handle.write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }
}

#[derive(Debug)]
struct AppendState {
    offset: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct SyncState {
    pending: Vec<Arc<SyncWait>>,
    syncing: bool,
}

/// Append-only WAL writer.
pub struct LogWriter<F: WalFile> {
    file: F,
    append_state: Mutex<AppendState>,
    sync_state: Mutex<SyncState>,
    sync_idle: Condvar,
}

impl<F: WalFile> LogWriter<F> {
    pub fn new(file: F) -> Self {
        Self {
            file,
            append_state: Mutex::new(AppendState {
                offset: 0,
                closed: false,
            }),
            sync_state: Mutex::new(SyncState::default()),
            sync_idle: Condvar::new(),
        }
    }

    /// Append a framed record and return its starting offset. The record is
    /// in the OS buffer afterwards, not yet durable.
    pub fn append_record(&self, payload: &[u8]) -> WalResult<u64> {
        let frame = record::encode_frame(payload);
        let mut state = self.append_state.lock().unwrap();
        if state.closed {
            return Err(WalError::Closed);
        }
        self.file
            .append(&frame)
            .map_err(|e| WalError::Append(e.to_string()))?;
        let offset = state.offset;
        state.offset += frame.len() as u64;
        Ok(offset)
    }

    /// Append a framed record and, if a completion slot is supplied,
    /// register it for the next group fsync. The slot is finished by
    /// whichever thread ends up leading that fsync.
    pub fn sync_record(&self, payload: &[u8], waiter: Option<Arc<SyncWait>>) -> WalResult<u64> {
        let offset = self.append_record(payload)?;
        if let Some(waiter) = waiter {
            self.register_sync(waiter);
        }
        Ok(offset)
    }

    /// Bytes appended so far.
    pub fn size(&self) -> u64 {
        self.append_state.lock().unwrap().offset
    }

    /// Close the writer: let in-flight group syncs drain, seal the file
    /// against further appends, and perform a final fsync covering any
    /// records appended without a durability request.
    ///
    /// Submitters blocked on a slow fsync are still acknowledged; close
    /// waits for their group leader rather than abandoning them.
    pub fn close(&self) -> WalResult<()> {
        {
            let mut state = self.sync_state.lock().unwrap();
            while state.syncing {
                state = self.sync_idle.wait(state).unwrap();
            }
        }
        {
            let mut state = self.append_state.lock().unwrap();
            if state.closed {
                return Err(WalError::Closed);
            }
            state.closed = true;
        }
        self.file
            .sync()
            .map_err(|e| WalError::Fsync(e.to_string()))
    }

    fn register_sync(&self, waiter: Arc<SyncWait>) {
        let lead = {
            let mut state = self.sync_state.lock().unwrap();
            state.pending.push(waiter);
            if state.syncing {
                false
            } else {
                state.syncing = true;
                true
            }
        };
        if lead {
            self.lead_sync();
        }
    }

    /// Run group fsync rounds until no slots remain. Registered slots always
    /// have an active leader: a thread registering while `syncing` is set is
    /// covered by a later round of the current leader's loop.
    fn lead_sync(&self) {
        loop {
            let group = {
                let mut state = self.sync_state.lock().unwrap();
                if state.pending.is_empty() {
                    state.syncing = false;
                    self.sync_idle.notify_all();
                    return;
                }
                std::mem::take(&mut state.pending)
            };
            let outcome = self
                .file
                .sync()
                .map_err(|e| WalError::Fsync(e.to_string()));
            for waiter in group {
                waiter.finish(outcome.clone());
            }
        }
    }
}
