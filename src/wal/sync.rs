//! Completion handles for asynchronous group fsyncs.

use std::sync::{Condvar, Mutex};

use super::errors::WalResult;

/// A one-shot completion slot for a pending fsync.
///
/// The commit pipeline creates one per syncing batch and hands it to the
/// WAL through the write hook; whichever thread performs the covering group
/// fsync finishes it. No commit is acknowledged before its slot is finished.
#[derive(Debug, Default)]
pub struct SyncWait {
    slot: Mutex<Option<WalResult<()>>>,
    completed: Condvar,
}

impl SyncWait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fsync outcome and wake every waiter. The first recorded
    /// outcome wins; later calls are ignored.
    pub fn finish(&self, result: WalResult<()>) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(result);
        }
        self.completed.notify_all();
    }

    /// Block until the fsync covering this slot has completed, then return
    /// its outcome.
    pub fn wait(&self) -> WalResult<()> {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.completed.wait(slot).unwrap();
        }
        slot.clone().unwrap()
    }

    /// The outcome, if the fsync has already completed.
    pub fn result(&self) -> Option<WalResult<()>> {
        self.slot.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalError;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_after_finish_returns_immediately() {
        let wait = SyncWait::new();
        wait.finish(Ok(()));
        assert_eq!(wait.wait(), Ok(()));
    }

    #[test]
    fn test_first_outcome_wins() {
        let wait = SyncWait::new();
        wait.finish(Err(WalError::Fsync("disk gone".into())));
        wait.finish(Ok(()));
        assert_eq!(wait.wait(), Err(WalError::Fsync("disk gone".into())));
    }

    #[test]
    fn test_result_is_none_until_finished() {
        let wait = SyncWait::new();
        assert!(wait.result().is_none());
        wait.finish(Ok(()));
        assert_eq!(wait.result(), Some(Ok(())));
    }

    #[test]
    fn test_waiters_are_woken_by_finish() {
        let wait = Arc::new(SyncWait::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let wait = Arc::clone(&wait);
            handles.push(thread::spawn(move || wait.wait()));
        }
        thread::sleep(Duration::from_millis(10));
        wait.finish(Ok(()));
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
    }
}
