//! Host engine wiring the commit pipeline to a real WAL and memtables.
//!
//! The engine owns the sequence cursors, an append-only log writer over a
//! file, and the active memtable. It implements the pipeline's environment
//! contract: `write` picks (and if necessary rotates) the memtable, then
//! appends the batch to the WAL; `apply` installs the batch into the table
//! that `write` selected. Rotation happens entirely inside `write`, so the
//! pipeline never sees a full table.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::batch::Batch;
use crate::commit::{CommitConfig, CommitEnv, CommitPipeline, CommitResult};
use crate::memtable::{MemTable, MemTableError, DEFAULT_MEMTABLE_CAPACITY};
use crate::observability::Logger;
use crate::sequence::{SequenceCursors, SEQ_START};
use crate::wal::{LogWriter, SyncWait, WalError, WalResult};

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the write-ahead log file. Parent directories are created.
    pub wal_path: PathBuf,
    /// Byte budget of each memtable before rotation.
    pub memtable_capacity: usize,
    /// Commit pipeline tuning.
    pub commit: CommitConfig,
}

impl EngineConfig {
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            memtable_capacity: DEFAULT_MEMTABLE_CAPACITY,
            commit: CommitConfig::default(),
        }
    }
}

struct TableState {
    active: Arc<MemTable>,
    frozen: Vec<Arc<MemTable>>,
    rotations: u64,
}

/// The environment implementation backing [`Engine`].
pub struct EngineCore {
    sequences: SequenceCursors,
    wal: LogWriter<std::fs::File>,
    tables: Mutex<TableState>,
    memtable_capacity: usize,
}

impl EngineCore {
    /// Find a memtable with room for the batch, rotating full ones.
    fn reserve_table(&self, batch: &Batch) -> Result<Arc<MemTable>, MemTableError> {
        loop {
            let current = {
                let tables = self.tables.lock().unwrap();
                Arc::clone(&tables.active)
            };
            match current.prepare(batch) {
                Ok(()) => return Ok(current),
                Err(MemTableError::Full) => self.rotate(&current),
                Err(err) => return Err(err),
            }
        }
    }

    fn rotate(&self, full: &Arc<MemTable>) {
        let mut tables = self.tables.lock().unwrap();
        // Another writer may have rotated while this one was deciding to.
        if !Arc::ptr_eq(&tables.active, full) {
            return;
        }
        let fresh = Arc::new(MemTable::new(self.memtable_capacity));
        let frozen = std::mem::replace(&mut tables.active, fresh);
        tables.rotations += 1;
        Logger::info(
            "memtable_rotate",
            &[
                ("frozen_bytes", &frozen.approximate_size().to_string()),
                ("rotations", &tables.rotations.to_string()),
            ],
        );
        tables.frozen.push(frozen);
    }
}

impl CommitEnv for EngineCore {
    type Table = MemTable;

    fn sequences(&self) -> &SequenceCursors {
        &self.sequences
    }

    fn write(
        &self,
        batch: &Batch,
        sync: Option<&Arc<SyncWait>>,
    ) -> CommitResult<Option<Arc<MemTable>>> {
        if batch.count() == 0 && batch.is_empty() {
            // Sequence-only reservation: nothing to store, nothing to apply.
            self.wal.sync_record(batch.payload(), sync.cloned())?;
            return Ok(None);
        }
        let table = self.reserve_table(batch)?;
        self.wal.sync_record(batch.payload(), sync.cloned())?;
        Ok(Some(table))
    }

    fn apply(&self, batch: &Batch, table: Option<&MemTable>) -> CommitResult<()> {
        match table {
            Some(table) => {
                table.apply(batch)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A minimal log-structured engine: commit pipeline, WAL, memtables.
pub struct Engine {
    pipeline: CommitPipeline<EngineCore>,
}

impl Engine {
    /// Open an engine over the configured WAL path. The log cursor starts
    /// at [`SEQ_START`] so sequence zero is never assigned.
    pub fn open(config: EngineConfig) -> WalResult<Self> {
        if let Some(parent) = config.wal_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    WalError::Append(format!(
                        "create WAL directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.wal_path)
            .map_err(|e| {
                WalError::Append(format!(
                    "open WAL file {}: {e}",
                    config.wal_path.display()
                ))
            })?;

        let core = EngineCore {
            sequences: SequenceCursors::starting_at(SEQ_START),
            wal: LogWriter::new(file),
            tables: Mutex::new(TableState {
                active: Arc::new(MemTable::new(config.memtable_capacity)),
                frozen: Vec::new(),
                rotations: 0,
            }),
            memtable_capacity: config.memtable_capacity,
        };
        Ok(Self {
            pipeline: CommitPipeline::with_config(core, config.commit),
        })
    }

    /// Commit a batch through the pipeline. See
    /// [`CommitPipeline::commit`].
    pub fn apply_batch(&self, batch: &mut Batch, sync: bool) -> CommitResult<()> {
        self.pipeline.commit(batch, sync)
    }

    /// Reserve sequence numbers without a payload. See
    /// [`CommitPipeline::allocate_seq_num`].
    pub fn allocate_seq_num<P, A>(&self, count: u32, prepare: P, apply: A)
    where
        P: FnOnce(),
        A: FnOnce(u64),
    {
        self.pipeline.allocate_seq_num(count, prepare, apply)
    }

    /// Visibility boundary: all sequence numbers below it are readable.
    pub fn visible_seq_num(&self) -> u64 {
        self.pipeline.env().sequences().visible()
    }

    /// Next sequence number that will be assigned.
    pub fn next_seq_num(&self) -> u64 {
        self.pipeline.env().sequences().log()
    }

    /// Number of memtable rotations since open.
    pub fn rotation_count(&self) -> u64 {
        self.pipeline.env().tables.lock().unwrap().rotations
    }

    /// Bytes appended to the WAL since open.
    pub fn wal_size(&self) -> u64 {
        self.pipeline.env().wal.size()
    }

    /// Read a key at the current visibility boundary. Consults the active
    /// and frozen memtables, newest table first.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let snapshot = self.visible_seq_num();
        let tables = self.pipeline.env().tables.lock().unwrap();
        if let Some(found) = tables.active.get(key, snapshot) {
            return Some(found);
        }
        tables
            .frozen
            .iter()
            .rev()
            .find_map(|table| table.get(key, snapshot))
    }

    /// Close the engine, sealing the WAL after in-flight syncs drain.
    pub fn close(self) -> WalResult<()> {
        let result = self.pipeline.env().wal.close();
        match &result {
            Ok(()) => Logger::info(
                "wal_close",
                &[("size", &self.pipeline.env().wal.size().to_string())],
            ),
            Err(err) => Logger::error("wal_close_failed", &[("error", &err.to_string())]),
        }
        result
    }
}
