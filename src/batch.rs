//! Write batches: the atomic unit of work submitted to the commit pipeline.
//!
//! A batch is an opaque byte buffer. The first twelve bytes are a header
//! holding the starting sequence number (u64 LE, zero until stamped) and the
//! operation count (u32 LE). Framed operations follow: a kind byte, then
//! length-prefixed key and value slices. The same buffer is what gets
//! appended to the WAL, so the header travels with the payload and replay can
//! re-establish sequence numbers without any side channel.
//!
//! Batches are reusable: after a commit returns, `reset` restores the buffer
//! to its empty state.

use std::fmt;

/// Byte length of the batch header: sequence number slot plus count slot.
pub const BATCH_HEADER_LEN: usize = 12;

const SEQ_NUM_END: usize = 8;
const COUNT_END: usize = 12;

/// Kind of a single framed operation inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    /// Key/value insertion or replacement.
    Put = 0,
    /// Key deletion (tombstone).
    Delete = 1,
    /// Opaque data carried in the WAL only; never applied to a memtable and
    /// not counted as a logical operation.
    LogData = 2,
}

impl OpKind {
    /// Convert from the wire byte, `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OpKind::Put),
            1 => Some(OpKind::Delete),
            2 => Some(OpKind::LogData),
            _ => None,
        }
    }
}

/// A decoded view of one batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
    LogData { data: &'a [u8] },
}

/// A reusable, caller-owned write batch.
pub struct Batch {
    data: Vec<u8>,
    count: u32,
}

impl Batch {
    /// An empty batch with a zeroed header.
    pub fn new() -> Self {
        Self {
            data: vec![0; BATCH_HEADER_LEN],
            count: 0,
        }
    }

    /// An empty batch with room for roughly `bytes` of operation data.
    pub fn with_capacity(bytes: usize) -> Self {
        let mut data = Vec::with_capacity(BATCH_HEADER_LEN + bytes);
        data.resize(BATCH_HEADER_LEN, 0);
        Self { data, count: 0 }
    }

    /// Append a key/value insertion.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.data.push(OpKind::Put as u8);
        self.push_slice(key);
        self.push_slice(value);
        self.bump_count();
    }

    /// Append a key deletion.
    pub fn delete(&mut self, key: &[u8]) {
        self.data.push(OpKind::Delete as u8);
        self.push_slice(key);
        self.bump_count();
    }

    /// Append opaque WAL-only data. Does not change the operation count and
    /// is never applied to a memtable.
    pub fn log_data(&mut self, data: &[u8]) {
        self.data.push(OpKind::LogData as u8);
        self.push_slice(data);
    }

    /// Number of logical operations in the batch.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The starting sequence number stamped into the header, zero until the
    /// batch has been prepared by the pipeline.
    pub fn seq_num(&self) -> u64 {
        u64::from_le_bytes(self.data[..SEQ_NUM_END].try_into().unwrap())
    }

    /// Stamp the starting sequence number into the header.
    pub fn set_seq_num(&mut self, seq_num: u64) {
        self.data[..SEQ_NUM_END].copy_from_slice(&seq_num.to_le_bytes());
    }

    /// The full payload, header included. This is what the WAL stores.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// True when the batch carries no operations and no log data.
    pub fn is_empty(&self) -> bool {
        self.data.len() == BATCH_HEADER_LEN
    }

    /// Restore the batch to its empty state for reuse. The allocation is
    /// kept.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.resize(BATCH_HEADER_LEN, 0);
        self.count = 0;
    }

    /// Iterate over the framed operations in append order.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            buf: &self.data[BATCH_HEADER_LEN..],
        }
    }

    fn push_slice(&mut self, slice: &[u8]) {
        self.data.extend_from_slice(&(slice.len() as u32).to_le_bytes());
        self.data.extend_from_slice(slice);
    }

    fn bump_count(&mut self) {
        self.count += 1;
        self.data[SEQ_NUM_END..COUNT_END].copy_from_slice(&self.count.to_le_bytes());
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("seq_num", &self.seq_num())
            .field("count", &self.count)
            .field("payload_len", &self.data.len())
            .finish()
    }
}

/// Iterator over the operations of a batch. Stops at the first malformed
/// frame, which cannot occur for batches built through the mutation methods.
pub struct BatchIter<'a> {
    buf: &'a [u8],
}

impl<'a> BatchIter<'a> {
    fn take_slice(&mut self) -> Option<&'a [u8]> {
        let len_bytes: [u8; 4] = self.buf.get(..4)?.try_into().ok()?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let slice = self.buf.get(4..4 + len)?;
        self.buf = &self.buf[4 + len..];
        Some(slice)
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = BatchOp<'a>;

    fn next(&mut self) -> Option<BatchOp<'a>> {
        let kind = OpKind::from_u8(*self.buf.first()?)?;
        self.buf = &self.buf[1..];
        match kind {
            OpKind::Put => {
                let key = self.take_slice()?;
                let value = self.take_slice()?;
                Some(BatchOp::Put { key, value })
            }
            OpKind::Delete => {
                let key = self.take_slice()?;
                Some(BatchOp::Delete { key })
            }
            OpKind::LogData => {
                let data = self.take_slice()?;
                Some(BatchOp::LogData { data })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_is_empty_and_unstamped() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.seq_num(), 0);
        assert_eq!(batch.payload().len(), BATCH_HEADER_LEN);
    }

    #[test]
    fn test_header_layout() {
        let mut batch = Batch::new();
        batch.put(b"k", b"v");
        batch.put(b"k2", b"v2");
        batch.set_seq_num(0x0102_0304_0506_0708);

        let payload = batch.payload();
        assert_eq!(
            &payload[..8],
            &0x0102_0304_0506_0708u64.to_le_bytes()
        );
        assert_eq!(&payload[8..12], &2u32.to_le_bytes());
    }

    #[test]
    fn test_count_tracks_puts_and_deletes() {
        let mut batch = Batch::new();
        batch.put(b"a", b"1");
        batch.delete(b"b");
        batch.put(b"c", b"3");
        assert_eq!(batch.count(), 3);
    }

    #[test]
    fn test_log_data_does_not_count() {
        let mut batch = Batch::new();
        batch.log_data(b"marker");
        assert_eq!(batch.count(), 0);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_iter_yields_ops_in_order() {
        let mut batch = Batch::new();
        batch.put(b"alpha", b"one");
        batch.delete(b"beta");
        batch.log_data(b"note");
        batch.put(b"gamma", b"three");

        let ops: Vec<_> = batch.iter().collect();
        assert_eq!(
            ops,
            vec![
                BatchOp::Put {
                    key: b"alpha",
                    value: b"one"
                },
                BatchOp::Delete { key: b"beta" },
                BatchOp::LogData { data: b"note" },
                BatchOp::Put {
                    key: b"gamma",
                    value: b"three"
                },
            ]
        );
    }

    #[test]
    fn test_reset_allows_reuse() {
        let mut batch = Batch::new();
        batch.put(b"k", b"v");
        batch.set_seq_num(42);
        batch.reset();

        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.seq_num(), 0);
        assert_eq!(batch.iter().count(), 0);
    }

    #[test]
    fn test_with_capacity_behaves_like_new() {
        let mut batch = Batch::with_capacity(256);
        assert!(batch.is_empty());
        batch.put(b"k", b"v");
        assert_eq!(batch.count(), 1);
        assert_eq!(batch.seq_num(), 0);
    }

    #[test]
    fn test_empty_values_roundtrip() {
        let mut batch = Batch::new();
        batch.put(b"key", b"");
        let ops: Vec<_> = batch.iter().collect();
        assert_eq!(
            ops,
            vec![BatchOp::Put {
                key: b"key",
                value: b""
            }]
        );
    }
}
