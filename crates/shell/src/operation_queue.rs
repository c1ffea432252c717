//! Engine-side queue of deferred operations.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A deferred unit of engine work.
pub type Operation = Box<dyn FnOnce() + Send + 'static>;

/// Slots reserved up front and after every flush.
pub const OPERATION_QUEUE_CAPACITY: usize = 128;

struct QueuedOperation {
    run: Operation,
    trivial: bool,
}

/// Ordered buffer of engine operations, drained in one flush.
///
/// Trivial operations run like any other but do not count as work done.
pub struct TasmOperationQueue {
    operations: Mutex<Vec<QueuedOperation>>,
}

impl Default for TasmOperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TasmOperationQueue {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(Vec::with_capacity(OPERATION_QUEUE_CAPACITY)),
        }
    }

    pub fn enqueue<F>(&self, operation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(operation), false);
    }

    pub fn enqueue_trivial<F>(&self, operation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(operation), true);
    }

    fn push(&self, run: Operation, trivial: bool) {
        self.lock().push(QueuedOperation { run, trivial });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Run everything queued so far, in order.
    ///
    /// Returns true when at least one non-trivial operation ran. Operations
    /// enqueued while flushing wait for the next flush.
    pub fn flush(&self) -> bool {
        let drained = std::mem::replace(
            &mut *self.lock(),
            Vec::with_capacity(OPERATION_QUEUE_CAPACITY),
        );
        let mut has_work = false;
        for operation in drained {
            has_work |= !operation.trivial;
            (operation.run)();
        }
        has_work
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Operation queue that also buffers work to run after each layout.
///
/// The layout side drains the after-layout buffer with
/// [`LayoutResultManager::run_on_layout_after`].
#[derive(Default)]
pub struct LayoutResultManager {
    queue: TasmOperationQueue,
    on_layout_after: Mutex<Vec<Operation>>,
}

impl LayoutResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &TasmOperationQueue {
        &self.queue
    }

    pub fn enqueue<F>(&self, operation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.enqueue(operation);
    }

    pub fn enqueue_trivial<F>(&self, operation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.enqueue_trivial(operation);
    }

    pub fn flush(&self) -> bool {
        self.queue.flush()
    }

    pub fn enqueue_on_layout_after<F>(&self, operation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock_after().push(Box::new(operation));
    }

    pub fn pending_on_layout_after(&self) -> usize {
        self.lock_after().len()
    }

    /// Run the buffered after-layout work. Returns how many ran.
    pub fn run_on_layout_after(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock_after());
        let count = drained.len();
        for operation in drained {
            operation();
        }
        count
    }

    fn lock_after(&self) -> MutexGuard<'_, Vec<Operation>> {
        self.on_layout_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> Arc<Mutex<Vec<u32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_flush_runs_in_order() {
        let queue = TasmOperationQueue::new();
        let seen = recorder();
        for value in 0..3 {
            let seen = seen.clone();
            queue.enqueue(move || seen.lock().unwrap().push(value));
        }
        assert_eq!(queue.len(), 3);
        assert!(queue.flush());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(queue.is_empty());
        assert!(queue.capacity() >= OPERATION_QUEUE_CAPACITY);
    }

    #[test]
    fn test_trivial_only_flush_reports_no_work() {
        let queue = TasmOperationQueue::new();
        let seen = recorder();
        let inner = seen.clone();
        queue.enqueue_trivial(move || inner.lock().unwrap().push(1));
        assert!(!queue.flush());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert!(!queue.flush());
    }

    #[test]
    fn test_enqueue_during_flush_waits() {
        let queue = Arc::new(TasmOperationQueue::new());
        let seen = recorder();
        let (q, s) = (queue.clone(), seen.clone());
        queue.enqueue(move || {
            let s2 = s.clone();
            q.enqueue(move || s2.lock().unwrap().push(2));
            s.lock().unwrap().push(1);
        });
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_layout_after_buffer() {
        let manager = LayoutResultManager::new();
        let seen = recorder();
        let inner = seen.clone();
        manager.enqueue_on_layout_after(move || inner.lock().unwrap().push(7));
        let inner = seen.clone();
        manager.enqueue(move || inner.lock().unwrap().push(1));

        assert_eq!(manager.pending_on_layout_after(), 1);
        assert!(manager.flush());
        assert_eq!(manager.run_on_layout_after(), 1);
        assert_eq!(manager.run_on_layout_after(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![1, 7]);
    }
}
