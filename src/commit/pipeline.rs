//! The commit pipeline: prepare, write, apply, publish.
//!
//! Every batch is pushed through all stages by its submitting thread; the
//! pipeline runs no background workers. Two short locks bound the serial
//! sections: the prepare lock covers sequence stamping and enqueueing, the
//! publish lock covers draining the commit queue and advancing the
//! visibility boundary. The slow stages in between, WAL append and memtable
//! insert, run concurrently across submitters, which is where the pipelining
//! comes from.
//!
//! Applies finish in arbitrary order, so publication scans the queue from
//! the head and stops at the first batch still in flight. A batch becomes
//! visible only once it and everything enqueued before it have been applied.

use std::sync::{Arc, Condvar, Mutex};

use super::env::CommitEnv;
use super::errors::{CommitError, CommitResult};
use super::queue::{CommitNode, CommitQueue};
use crate::batch::Batch;
use crate::wal::SyncWait;

/// Default number of commits allowed in the write and apply stages at once.
pub const DEFAULT_COMMIT_CONCURRENCY: usize = 64;

/// Tuning knobs for the commit pipeline.
#[derive(Debug, Clone)]
pub struct CommitConfig {
    /// Number of batches admitted into the pipeline simultaneously. Bounds
    /// memtable pressure and the coalescing window of the WAL's group sync.
    pub concurrency: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_COMMIT_CONCURRENCY,
        }
    }
}

impl CommitConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

/// Counting semaphore built from a mutex and condvar; admission control for
/// the pipeline.
#[derive(Debug)]
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.available.notify_one();
    }
}

/// Orchestrates concurrent commits over an injected environment.
pub struct CommitPipeline<E: CommitEnv> {
    env: E,
    sem: Semaphore,
    concurrency: usize,
    prepare: Mutex<()>,
    publish: Mutex<()>,
    pending: CommitQueue,
}

impl<E: CommitEnv> CommitPipeline<E> {
    /// A pipeline with the default configuration.
    pub fn new(env: E) -> Self {
        Self::with_config(env, CommitConfig::default())
    }

    pub fn with_config(env: E, config: CommitConfig) -> Self {
        Self {
            env,
            sem: Semaphore::new(config.concurrency),
            concurrency: config.concurrency,
            prepare: Mutex::new(()),
            publish: Mutex::new(()),
            pending: CommitQueue::new(),
        }
    }

    /// The injected environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Admission capacity of this pipeline.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Commit a batch: stamp it, append it to the WAL, apply it to the
    /// memtable chosen by the environment, and publish it once every
    /// earlier batch is applied too.
    ///
    /// With `sync` the call additionally blocks until an fsync covering the
    /// batch's WAL record has completed. The first error from write, apply,
    /// or fsync is returned; an errored batch still flows through
    /// publication so batches behind it are never stalled.
    pub fn commit(&self, batch: &mut Batch, sync: bool) -> CommitResult<()> {
        let sync_wait = sync.then(|| Arc::new(SyncWait::new()));
        self.sem.acquire();

        let node = self.prepare_batch(batch);

        let mut result = Ok(());
        let mut wrote = false;
        match self.env.write(batch, sync_wait.as_ref()) {
            Ok(table) => {
                wrote = true;
                if let Err(err) = self.env.apply(batch, table.as_deref()) {
                    result = Err(err);
                }
            }
            Err(err) => result = Err(err),
        }

        // Errored or not, the batch participates in publication so the
        // queue keeps draining; its reserved range is never handed back.
        self.publish(&node);
        self.sem.release();

        // Another submitter may be the one that dequeues this batch.
        node.wait_published();

        if let Some(sync_wait) = sync_wait {
            // The slot is only registered by a successful write.
            if wrote {
                if let Err(err) = sync_wait.wait() {
                    if result.is_ok() {
                        result = Err(CommitError::Sync(err));
                    }
                }
            }
        }

        result
    }

    /// Reserve `count` sequence numbers without writing a payload.
    ///
    /// `prepare` runs under the prepare lock, before any later commit can
    /// stamp its numbers; `apply` runs after publication with the first
    /// reserved number. A sentinel occupies the commit queue in between so
    /// later batches cannot be published past this reservation. The first
    /// number is never zero: a zero reservation start is skipped at the
    /// cost of one extra number, and a zero count is treated as one.
    pub fn allocate_seq_num<P, A>(&self, count: u32, prepare: P, apply: A)
    where
        P: FnOnce(),
        A: FnOnce(u64),
    {
        let count = count.max(1);
        self.sem.acquire();

        let (node, seq_num) = {
            let _guard = self.prepare.lock().unwrap();
            let cursors = self.env.sequences();
            let mut seq_num = cursors.reserve(u64::from(count));
            if seq_num == 0 {
                seq_num = 1;
                cursors.reserve(1);
            }
            let node = Arc::new(CommitNode::new(seq_num, count));
            self.pending.enqueue(Arc::clone(&node));
            prepare();
            (node, seq_num)
        };

        // The sentinel carries no operations; the write hook sees an empty
        // stamped batch and the memtable is never touched.
        let mut sentinel = Batch::new();
        sentinel.set_seq_num(seq_num);
        let _ = self.env.write(&sentinel, None);

        self.publish(&node);
        self.sem.release();
        node.wait_published();

        apply(seq_num);
    }

    fn prepare_batch(&self, batch: &mut Batch) -> Arc<CommitNode> {
        let _guard = self.prepare.lock().unwrap();
        let count = batch.count();
        let seq_num = self.env.sequences().reserve(u64::from(count));
        batch.set_seq_num(seq_num);
        let node = Arc::new(CommitNode::new(seq_num, count));
        self.pending.enqueue(Arc::clone(&node));
        node
    }

    /// Mark the node applied and drain the longest applied prefix of the
    /// queue, advancing the visibility boundary over each drained batch in
    /// enqueue order.
    fn publish(&self, node: &Arc<CommitNode>) {
        node.mark_applied();
        let _guard = self.publish.lock().unwrap();
        while let Some(done) = self.pending.dequeue() {
            let upto = done.seq_num() + u64::from(done.count());
            self.env.sequences().advance_visible(upto);
            done.mark_published();
        }
    }
}
