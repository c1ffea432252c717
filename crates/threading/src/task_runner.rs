//! Cloneable handles for posting work onto a message loop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ThreadingError, ThreadingResult};
use crate::message_loop::{current_loop_id, LoopId, MessageLoop, Pending};

/// Handle to a message loop thread.
///
/// Clones share the same loop. The loop thread stops once the last clone is
/// dropped, after finishing the immediate tasks already queued.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    message_loop: Arc<MessageLoop>,
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        self.message_loop.terminate();
    }
}

impl TaskRunner {
    /// Start a new loop thread with the given name.
    pub fn new(name: &str) -> ThreadingResult<Self> {
        let message_loop = MessageLoop::spawn(name)?;
        Ok(Self {
            inner: Arc::new(RunnerInner { message_loop }),
        })
    }

    /// Thread name of the underlying loop.
    pub fn name(&self) -> &str {
        self.inner.message_loop.name()
    }

    /// Identity of the underlying loop.
    pub fn loop_id(&self) -> LoopId {
        self.inner.message_loop.id()
    }

    /// Post a task to run in FIFO order.
    pub fn post_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.message_loop.enqueue(Pending::Now(Box::new(task)));
    }

    /// Post a task to run no earlier than `delay` from now.
    pub fn post_delayed_task<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .message_loop
            .enqueue(Pending::At(Instant::now() + delay, Box::new(task)));
    }

    /// Post a task to run when the loop has nothing else ready.
    pub fn post_idle_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.message_loop.enqueue(Pending::Idle(Box::new(task)));
    }

    /// Whether the calling thread is the one executing this runner's tasks.
    ///
    /// A merged runner reports the thread of the loop it was merged into.
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        current_loop_id() == Some(self.inner.message_loop.effective_id())
    }

    /// Whether both handles drive the same loop.
    pub fn is_same_loop(&self, other: &TaskRunner) -> bool {
        self.loop_id() == other.loop_id()
    }

    /// Route this runner's queued and future tasks onto `target`.
    ///
    /// Returns false when already merged or when `target` is this loop.
    pub fn merge_into(&self, target: &TaskRunner) -> bool {
        self.inner
            .message_loop
            .merge_into(&target.inner.message_loop)
    }

    /// Undo [`TaskRunner::merge_into`].
    pub fn unmerge(&self) -> bool {
        self.inner.message_loop.unmerge()
    }

    /// Whether tasks are currently redirected to another loop.
    pub fn is_merged(&self) -> bool {
        self.inner.message_loop.is_redirected()
    }

    /// Block until every task posted before this call has run.
    ///
    /// Returns immediately when called from the runner's own thread.
    pub fn barrier(&self) -> ThreadingResult<()> {
        if self.runs_tasks_on_current_thread() {
            return Ok(());
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.post_task(move || {
            let _ = tx.send(());
        });
        rx.blocking_recv()
            .map_err(|_| ThreadingError::RunnerTerminated(self.name().to_string()))
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name())
            .field("loop_id", &self.loop_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_runs_tasks_on_current_thread() {
        let runner = TaskRunner::new("test-runner-thread").unwrap();
        assert!(!runner.runs_tasks_on_current_thread());

        let (tx, rx) = mpsc::channel();
        let inner = runner.clone();
        runner.post_task(move || tx.send(inner.runs_tasks_on_current_thread()).unwrap());
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_barrier_waits_for_prior_tasks() {
        let runner = TaskRunner::new("test-barrier").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            runner.post_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        runner.barrier().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_merge_preserves_fifo_and_redirects() {
        let ui = TaskRunner::new("test-merge-ui").unwrap();
        let engine = TaskRunner::new("test-merge-engine").unwrap();

        // Hold the engine loop so its queue is non-empty at merge time.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        engine.post_task(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv();
        });
        started_rx.recv().unwrap();

        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            engine.post_task(move || tx.send(i).unwrap());
        }

        assert!(engine.merge_into(&ui));
        assert!(engine.is_merged());
        assert!(!engine.merge_into(&ui));

        let (thread_tx, thread_rx) = mpsc::channel();
        let ui_handle = ui.clone();
        engine.post_task(move || {
            tx.send(3).unwrap();
            thread_tx.send(ui_handle.runs_tasks_on_current_thread()).unwrap();
        });

        let received: Vec<i32> = (0..4).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(received, vec![0, 1, 2, 3]);
        assert!(thread_rx.recv().unwrap());

        assert!(engine.unmerge());
        assert!(!engine.is_merged());
        gate_tx.send(()).unwrap();
    }

    #[test]
    fn test_cannot_merge_into_self() {
        let runner = TaskRunner::new("test-merge-self").unwrap();
        assert!(!runner.merge_into(&runner.clone()));
    }
}
