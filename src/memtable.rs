//! In-memory table receiving batch applies.
//!
//! Entries are keyed by user key plus sequence number, newest first, so a
//! reader holding a visibility snapshot finds the latest version it is
//! allowed to see without scanning history. Deletes are tombstones; they
//! shadow older versions instead of removing them.
//!
//! The table has a byte budget. Reservation (`prepare`) and installation
//! (`apply`) are split so the host can reserve space while sequencing a
//! batch, rotate to a fresh table when the budget is exhausted, and apply
//! later without the insert failing halfway through.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;

use crate::batch::{Batch, BatchOp};

/// Default byte budget for a single memtable.
pub const DEFAULT_MEMTABLE_CAPACITY: usize = 4 * 1024 * 1024;

/// Errors produced by the memtable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemTableError {
    /// The byte budget is exhausted; the host should rotate to a fresh
    /// table and retry.
    #[error("memtable is full")]
    Full,

    /// The batch has no stamped sequence number.
    #[error("batch is not stamped with a sequence number")]
    Unstamped,
}

/// Composite key: user key ascending, sequence number descending. For one
/// user key the newest version sorts first.
#[derive(Debug, PartialEq, Eq)]
struct InternalKey {
    user_key: Vec<u8>,
    seq_num: u64,
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.seq_num.cmp(&self.seq_num))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Concurrent in-memory table. Inserts are lock-free; concurrent applies
/// from different batches interleave safely because every version gets a
/// distinct sequence number.
pub struct MemTable {
    entries: SkipMap<InternalKey, Option<Vec<u8>>>,
    reserved: AtomicUsize,
    capacity: usize,
}

impl MemTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SkipMap::new(),
            reserved: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Reserve room for a batch. Fails with [`MemTableError::Full`] when the
    /// budget is exhausted, except on an empty table, which accepts any
    /// single batch so an oversized batch cannot rotate forever.
    pub fn prepare(&self, batch: &Batch) -> Result<(), MemTableError> {
        let footprint = batch.payload().len();
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            if current > 0 && current + footprint > self.capacity {
                return Err(MemTableError::Full);
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + footprint,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Install every counted operation of the batch at consecutive sequence
    /// numbers starting from the batch's stamp.
    pub fn apply(&self, batch: &Batch) -> Result<(), MemTableError> {
        let mut seq_num = batch.seq_num();
        if seq_num == 0 && batch.count() > 0 {
            return Err(MemTableError::Unstamped);
        }
        for op in batch.iter() {
            match op {
                BatchOp::Put { key, value } => {
                    self.insert(key, seq_num, Some(value.to_vec()));
                    seq_num += 1;
                }
                BatchOp::Delete { key } => {
                    self.insert(key, seq_num, None);
                    seq_num += 1;
                }
                BatchOp::LogData { .. } => {}
            }
        }
        Ok(())
    }

    /// Look up `key` as of `snapshot`, observing only versions with sequence
    /// numbers strictly below the snapshot. Returns `None` when the key has
    /// no visible version, `Some(None)` when the visible version is a
    /// tombstone.
    pub fn get(&self, key: &[u8], snapshot: u64) -> Option<Option<Vec<u8>>> {
        if snapshot == 0 {
            return None;
        }
        let from = InternalKey {
            user_key: key.to_vec(),
            seq_num: snapshot - 1,
        };
        let entry = self.entries.range(from..).next()?;
        if entry.key().user_key != key {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Number of versions stored, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes reserved through `prepare`.
    pub fn approximate_size(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    fn insert(&self, key: &[u8], seq_num: u64, value: Option<Vec<u8>>) {
        self.entries.insert(
            InternalKey {
                user_key: key.to_vec(),
                seq_num,
            },
            value,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped_batch(seq_num: u64) -> Batch {
        let mut batch = Batch::new();
        batch.set_seq_num(seq_num);
        batch
    }

    #[test]
    fn test_apply_then_get_latest_visible() {
        let table = MemTable::new(DEFAULT_MEMTABLE_CAPACITY);
        let mut batch = stamped_batch(1);
        batch.put(b"k", b"v1");
        table.prepare(&batch).unwrap();
        batch.set_seq_num(1);
        table.apply(&batch).unwrap();

        let mut batch = stamped_batch(2);
        batch.put(b"k", b"v2");
        table.apply(&batch).unwrap();

        // Snapshot above both versions sees the newest.
        assert_eq!(table.get(b"k", 3), Some(Some(b"v2".to_vec())));
        // Snapshot between them sees the first.
        assert_eq!(table.get(b"k", 2), Some(Some(b"v1".to_vec())));
        // Snapshot before either sees nothing.
        assert_eq!(table.get(b"k", 1), None);
    }

    #[test]
    fn test_tombstone_shadows_older_version() {
        let table = MemTable::new(DEFAULT_MEMTABLE_CAPACITY);
        let mut batch = stamped_batch(1);
        batch.put(b"k", b"v");
        batch.delete(b"k");
        table.apply(&batch).unwrap();

        assert_eq!(table.get(b"k", 3), Some(None));
        assert_eq!(table.get(b"k", 2), Some(Some(b"v".to_vec())));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_multi_op_batch_uses_consecutive_seq_nums() {
        let table = MemTable::new(DEFAULT_MEMTABLE_CAPACITY);
        let mut batch = stamped_batch(10);
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.put(b"c", b"3");
        table.apply(&batch).unwrap();

        assert_eq!(table.get(b"a", 11), Some(Some(b"1".to_vec())));
        assert_eq!(table.get(b"b", 11), None);
        assert_eq!(table.get(b"b", 12), Some(Some(b"2".to_vec())));
        assert_eq!(table.get(b"c", 13), Some(Some(b"3".to_vec())));
    }

    #[test]
    fn test_unstamped_batch_is_rejected() {
        let table = MemTable::new(DEFAULT_MEMTABLE_CAPACITY);
        let mut batch = Batch::new();
        batch.put(b"k", b"v");
        assert_eq!(table.apply(&batch), Err(MemTableError::Unstamped));
    }

    #[test]
    fn test_log_data_is_not_installed() {
        let table = MemTable::new(DEFAULT_MEMTABLE_CAPACITY);
        let mut batch = stamped_batch(1);
        batch.log_data(b"wal only");
        table.apply(&batch).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_prepare_enforces_budget() {
        // Each batch payload is 40 bytes: 12 header + 1 kind + 7 framed key
        // + 20 framed value.
        let table = MemTable::new(100);
        let mut batch = Batch::new();
        batch.put(b"key", b"some value bytes");
        table.prepare(&batch).unwrap();
        assert_eq!(table.prepare(&batch), Ok(()));
        // The budget is now exhausted.
        assert_eq!(table.prepare(&batch), Err(MemTableError::Full));
    }

    #[test]
    fn test_oversized_batch_accepted_on_empty_table() {
        let table = MemTable::new(8);
        let mut batch = Batch::new();
        batch.put(b"key", &vec![0u8; 256]);
        assert_eq!(table.prepare(&batch), Ok(()));
        assert_eq!(table.prepare(&batch), Err(MemTableError::Full));
    }
}
