//! Two-lane queue of UI operations whose delivery follows the thread mode.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use threading::{TaskRunner, ThreadStrategy};

use crate::operation_queue::Operation;

/// Lane an operation is queued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiOperationPriority {
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Operations are produced on the UI thread and run in place
    Inline,
    /// Operations are produced elsewhere and posted to the UI runner
    Posted,
}

impl Delivery {
    fn for_strategy(strategy: ThreadStrategy) -> Self {
        if strategy.has_engine_thread() {
            Delivery::Posted
        } else {
            Delivery::Inline
        }
    }
}

struct QueueState {
    high: VecDeque<Operation>,
    normal: VecDeque<Operation>,
    strategy: ThreadStrategy,
    delivery: Delivery,
    destroyed: bool,
}

/// UI operation queue that can switch thread mode without losing work.
pub struct DynamicUiOperationQueue {
    state: Mutex<QueueState>,
    ui_runner: TaskRunner,
}

impl DynamicUiOperationQueue {
    pub fn new(strategy: ThreadStrategy, ui_runner: TaskRunner) -> Self {
        Self {
            state: Mutex::new(QueueState {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                strategy,
                delivery: Delivery::for_strategy(strategy),
                destroyed: false,
            }),
            ui_runner,
        }
    }

    pub fn strategy(&self) -> ThreadStrategy {
        self.lock().strategy
    }

    /// Whether flushed operations are posted to the UI runner.
    pub fn is_posted(&self) -> bool {
        self.lock().delivery == Delivery::Posted
    }

    pub fn enqueue<F>(&self, operation: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_with_priority(UiOperationPriority::Normal, operation)
    }

    pub fn enqueue_high_priority<F>(&self, operation: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_with_priority(UiOperationPriority::High, operation)
    }

    /// Queue `operation`. Returns false once the queue is destroyed.
    pub fn enqueue_with_priority<F>(&self, priority: UiOperationPriority, operation: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.destroyed {
            return false;
        }
        let lane = match priority {
            UiOperationPriority::High => &mut state.high,
            UiOperationPriority::Normal => &mut state.normal,
        };
        lane.push_back(Box::new(operation));
        true
    }

    pub fn pending_count(&self) -> usize {
        let state = self.lock();
        state.high.len() + state.normal.len()
    }

    /// Deliver everything queued, high lane first. Returns how many
    /// operations were handed over.
    pub fn flush(&self) -> usize {
        let (batch, delivery) = {
            let mut state = self.lock();
            if state.destroyed {
                return 0;
            }
            let mut batch: Vec<Operation> = state.high.drain(..).collect();
            batch.extend(state.normal.drain(..));
            (batch, state.delivery)
        };
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        if delivery == Delivery::Inline || self.ui_runner.runs_tasks_on_current_thread() {
            for operation in batch {
                operation();
            }
        } else {
            self.ui_runner.post_task(move || {
                for operation in batch {
                    operation();
                }
            });
        }
        count
    }

    /// Switch to the delivery of `strategy`, keeping queued operations.
    ///
    /// Returns false when already in that mode or destroyed.
    pub fn transfer(&self, strategy: ThreadStrategy) -> bool {
        let mut state = self.lock();
        if state.destroyed || state.strategy == strategy {
            return false;
        }
        tracing::debug!(
            target: "shell",
            from = ?state.strategy,
            to = ?strategy,
            pending = state.high.len() + state.normal.len(),
            "ui operation queue transferred"
        );
        state.strategy = strategy;
        state.delivery = Delivery::for_strategy(strategy);
        true
    }

    /// Drop queued operations and refuse new ones.
    pub fn destroy(&self) {
        let dropped = {
            let mut state = self.lock();
            state.destroyed = true;
            let mut dropped: Vec<Operation> = state.high.drain(..).collect();
            dropped.extend(state.normal.drain(..));
            dropped
        };
        if !dropped.is_empty() {
            tracing::debug!(target: "shell", count = dropped.len(), "ui operations dropped on destroy");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DynamicUiOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DynamicUiOperationQueue")
            .field("strategy", &state.strategy)
            .field("delivery", &state.delivery)
            .field("high", &state.high.len())
            .field("normal", &state.normal.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn runner(name: &str) -> TaskRunner {
        TaskRunner::new(name).unwrap()
    }

    #[test]
    fn test_high_lane_runs_first() {
        let queue = DynamicUiOperationQueue::new(ThreadStrategy::AllOnUi, runner("ui-lanes"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for (value, high) in [(1, false), (2, true), (3, false), (4, true)] {
            let seen = seen.clone();
            let op = move || seen.lock().unwrap().push(value);
            if high {
                queue.enqueue_high_priority(op);
            } else {
                queue.enqueue(op);
            }
        }
        assert_eq!(queue.flush(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_posted_delivery_runs_on_ui_runner() {
        let ui = runner("ui-posted");
        let queue = DynamicUiOperationQueue::new(ThreadStrategy::MultiThreads, ui.clone());
        assert!(queue.is_posted());

        let (tx, rx) = mpsc::channel();
        let ui_handle = ui.clone();
        queue.enqueue(move || {
            let _ = tx.send(ui_handle.runs_tasks_on_current_thread());
        });
        assert_eq!(queue.flush(), 1);
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_transfer_keeps_pending_work() {
        let queue = DynamicUiOperationQueue::new(ThreadStrategy::MultiThreads, runner("ui-transfer"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        queue.enqueue(move || inner.lock().unwrap().push("queued before transfer"));

        assert!(queue.transfer(ThreadStrategy::PartOnLayout));
        assert!(!queue.transfer(ThreadStrategy::PartOnLayout));
        assert!(!queue.is_posted());
        assert_eq!(queue.pending_count(), 1);

        assert_eq!(queue.flush(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["queued before transfer"]);
    }

    #[test]
    fn test_destroy_drops_and_refuses() {
        let queue = DynamicUiOperationQueue::new(ThreadStrategy::AllOnUi, runner("ui-destroy"));
        queue.enqueue(|| panic!("must not run"));
        queue.destroy();
        assert!(queue.is_destroyed());
        assert_eq!(queue.pending_count(), 0);
        assert!(!queue.enqueue(|| {}));
        assert_eq!(queue.flush(), 0);
        assert!(!queue.transfer(ThreadStrategy::MultiThreads));
    }
}
