//! The commit queue: in-flight batches in enqueue order.
//!
//! Enqueues run under the pipeline's prepare lock and dequeues under its
//! publish lock, so the queue itself only needs to gate the head on the
//! applied flag. A batch is dequeued only after it has been applied and
//! every earlier batch has already been dequeued; out-of-order applies wait
//! their turn at the head.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// The in-flight half of a committing batch.
///
/// Created at prepare time, linked into the commit queue, and released to
/// its submitter once published. The applied flag pairs the apply's side
/// effects with publication: set with release after a successful (or
/// abandoned) apply, read with acquire by the dequeuer.
#[derive(Debug)]
pub(crate) struct CommitNode {
    seq_num: u64,
    count: u32,
    applied: AtomicBool,
    published: Mutex<bool>,
    publish_signal: Condvar,
}

impl CommitNode {
    pub(crate) fn new(seq_num: u64, count: u32) -> Self {
        Self {
            seq_num,
            count,
            applied: AtomicBool::new(false),
            published: Mutex::new(false),
            publish_signal: Condvar::new(),
        }
    }

    pub(crate) fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn mark_applied(&self) {
        self.applied.store(true, Ordering::Release);
    }

    pub(crate) fn is_applied(&self) -> bool {
        self.applied.load(Ordering::Acquire)
    }

    pub(crate) fn mark_published(&self) {
        let mut published = self.published.lock().unwrap();
        *published = true;
        self.publish_signal.notify_all();
    }

    /// Block until some publisher has dequeued this node and advanced the
    /// visibility boundary past it.
    pub(crate) fn wait_published(&self) {
        let mut published = self.published.lock().unwrap();
        while !*published {
            published = self.publish_signal.wait(published).unwrap();
        }
    }
}

/// FIFO of in-flight commit nodes. Unbounded, so admission control upstream
/// can never run it out of room.
#[derive(Debug, Default)]
pub(crate) struct CommitQueue {
    entries: Mutex<VecDeque<Arc<CommitNode>>>,
}

impl CommitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a node at the tail. Callers are serialized by the prepare
    /// lock.
    pub(crate) fn enqueue(&self, node: Arc<CommitNode>) {
        self.entries.lock().unwrap().push_back(node);
    }

    /// Remove and return the head iff it has been applied. Returns `None`
    /// when the queue is empty or the head is still in flight, no matter
    /// how many later nodes are already applied.
    pub(crate) fn dequeue(&self) -> Option<Arc<CommitNode>> {
        let mut entries = self.entries.lock().unwrap();
        if entries.front()?.is_applied() {
            entries.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_empty_queue() {
        let queue = CommitQueue::new();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_unapplied_head_blocks_later_applied_batches() {
        let queue = CommitQueue::new();
        let nodes: Vec<Arc<CommitNode>> = (0..16u64)
            .map(|i| Arc::new(CommitNode::new(i, 1)))
            .collect();
        for node in &nodes {
            queue.enqueue(Arc::clone(node));
        }

        // Nothing applied yet.
        assert!(queue.dequeue().is_none());

        // Applying only the second batch must not let it jump the head.
        nodes[1].mark_applied();
        assert!(queue.dequeue().is_none());

        // As each batch is applied in order, exactly that batch dequeues.
        for node in &nodes {
            node.mark_applied();
            let dequeued = queue.dequeue().expect("applied head should dequeue");
            assert!(Arc::ptr_eq(&dequeued, node));
        }

        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_applied_prefix_drains_in_one_pass() {
        let queue = CommitQueue::new();
        let nodes: Vec<Arc<CommitNode>> = (0..4u64)
            .map(|i| Arc::new(CommitNode::new(i, 1)))
            .collect();
        for node in &nodes {
            queue.enqueue(Arc::clone(node));
        }
        nodes[0].mark_applied();
        nodes[1].mark_applied();

        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &nodes[0]));
        assert!(Arc::ptr_eq(&queue.dequeue().unwrap(), &nodes[1]));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_publish_wait_wakes_on_mark() {
        use std::thread;
        use std::time::Duration;

        let node = Arc::new(CommitNode::new(1, 1));
        let waiter = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.wait_published())
        };
        thread::sleep(Duration::from_millis(10));
        node.mark_published();
        waiter.join().unwrap();
    }
}
