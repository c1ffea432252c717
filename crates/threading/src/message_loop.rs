//! Single-threaded message loops.
//!
//! A loop owns one OS thread fed by a channel. Immediate tasks run in FIFO
//! order, delayed tasks run once their deadline has passed, and idle tasks
//! run only when neither of the other lanes has work ready. The delayed and
//! idle lanes live on the loop thread itself.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ThreadingError, ThreadingResult};

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a message loop, stable for the loop's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_LOOP: Cell<Option<LoopId>> = const { Cell::new(None) };
}

/// Loop driving the calling thread, if any.
pub(crate) fn current_loop_id() -> Option<LoopId> {
    CURRENT_LOOP.with(Cell::get)
}

pub(crate) enum Pending {
    Now(Task),
    At(Instant, Task),
    Idle(Task),
}

enum Message {
    Task(Pending),
    /// Re-check the redirect and hand local lanes over.
    Wake,
    Terminate,
}

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Delayed and idle lanes, owned by the loop thread.
#[derive(Default)]
struct Lanes {
    delayed: BinaryHeap<DelayedTask>,
    idle: VecDeque<Task>,
    next_seq: u64,
}

impl Lanes {
    fn push_delayed(&mut self, deadline: Instant, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(DelayedTask {
            deadline,
            seq,
            task,
        });
    }

    fn pop_due(&mut self, now: Instant) -> Option<Task> {
        match self.delayed.peek() {
            Some(next) if next.deadline <= now => self.delayed.pop().map(|delayed| delayed.task),
            _ => None,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|delayed| delayed.deadline)
    }

    /// Move everything to `target`, earliest deadline first.
    fn hand_over(&mut self, target: &MessageLoop) {
        let delayed = std::mem::take(&mut self.delayed);
        for delayed_task in delayed.into_sorted_vec().into_iter().rev() {
            target.enqueue(Pending::At(delayed_task.deadline, delayed_task.task));
        }
        for task in self.idle.drain(..) {
            target.enqueue(Pending::Idle(task));
        }
    }
}

pub(crate) struct MessageLoop {
    id: LoopId,
    name: String,
    sender: Sender<Message>,
    // Kept for draining on merge; the loop thread holds its own clone.
    receiver: Receiver<Message>,
    redirect: RwLock<Option<Arc<MessageLoop>>>,
    terminated: AtomicBool,
}

impl MessageLoop {
    /// Start a loop on a new named thread.
    pub(crate) fn spawn(name: &str) -> ThreadingResult<Arc<Self>> {
        let (sender, receiver) = channel::unbounded();
        let message_loop = Arc::new(Self {
            id: LoopId(NEXT_LOOP_ID.fetch_add(1, AtomicOrdering::Relaxed)),
            name: name.to_string(),
            sender,
            receiver: receiver.clone(),
            redirect: RwLock::new(None),
            terminated: AtomicBool::new(false),
        });

        let worker = Arc::clone(&message_loop);
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run(receiver))
            .map_err(|source| ThreadingError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(message_loop)
    }

    pub(crate) fn id(&self) -> LoopId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn redirect_target(&self) -> Option<Arc<MessageLoop>> {
        self.redirect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Id of the loop that actually executes this loop's tasks.
    pub(crate) fn effective_id(&self) -> LoopId {
        match self.redirect_target() {
            Some(target) => target.effective_id(),
            None => self.id,
        }
    }

    pub(crate) fn is_redirected(&self) -> bool {
        self.redirect_target().is_some()
    }

    pub(crate) fn enqueue(&self, pending: Pending) {
        // Read guard held so a concurrent merge cannot strand this task.
        let redirect = self.redirect.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = redirect.as_ref() {
            target.enqueue(pending);
            return;
        }
        if self.terminated.load(AtomicOrdering::Acquire) {
            drop(redirect);
            tracing::trace!(target: "threading", name = %self.name, "task dropped after terminate");
            return;
        }
        if self.sender.send(Message::Task(pending)).is_err() {
            tracing::trace!(target: "threading", name = %self.name, "task dropped, loop gone");
        }
    }

    /// Redirect this loop's work onto `target`, moving everything queued.
    pub(crate) fn merge_into(&self, target: &Arc<MessageLoop>) -> bool {
        if self.id == target.id || target.effective_id() == self.id {
            return false;
        }

        let mut redirect = self.redirect.write().unwrap_or_else(PoisonError::into_inner);
        if redirect.is_some() || self.terminated.load(AtomicOrdering::Acquire) {
            return false;
        }
        *redirect = Some(Arc::clone(target));

        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Message::Task(pending) => target.enqueue(pending),
                Message::Wake => {}
                Message::Terminate => {
                    // Raced with terminate; let the loop thread see it.
                    let _ = self.sender.send(Message::Terminate);
                }
            }
        }
        drop(redirect);
        // Local lanes move over once the loop thread wakes.
        let _ = self.sender.send(Message::Wake);

        tracing::debug!(target: "threading", from = %self.name, into = %target.name, "loops merged");
        true
    }

    /// Stop redirecting. Tasks already handed to the target stay there.
    pub(crate) fn unmerge(&self) -> bool {
        let previous = self
            .redirect
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match previous {
            Some(target) => {
                tracing::debug!(target: "threading", from = %self.name, into = %target.name, "loops unmerged");
                true
            }
            None => false,
        }
    }

    /// Stop accepting work. Immediate tasks already queued still run;
    /// delayed and idle tasks are discarded.
    pub(crate) fn terminate(&self) {
        if self.terminated.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        self.redirect
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.sender.send(Message::Terminate);
    }

    fn run(self: Arc<Self>, receiver: Receiver<Message>) {
        CURRENT_LOOP.with(|current| current.set(Some(self.id)));
        tracing::debug!(target: "threading", name = %self.name, "message loop started");

        let mut lanes = Lanes::default();
        loop {
            let message = match receiver.try_recv() {
                Ok(message) => message,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    if let Some(task) = lanes.pop_due(Instant::now()) {
                        self.execute(task);
                        continue;
                    }
                    if let Some(task) = lanes.idle.pop_front() {
                        self.execute(task);
                        continue;
                    }
                    let received = match lanes.next_deadline() {
                        Some(deadline) => receiver.recv_deadline(deadline),
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match received {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            };

            match message {
                Message::Task(Pending::Now(task)) => self.execute(task),
                Message::Task(Pending::At(deadline, task)) => lanes.push_delayed(deadline, task),
                Message::Task(Pending::Idle(task)) => lanes.idle.push_back(task),
                Message::Wake => {
                    if let Some(target) = self.redirect_target() {
                        lanes.hand_over(&target);
                    }
                }
                Message::Terminate => {
                    self.drain_after_terminate(&receiver);
                    break;
                }
            }
        }

        // Captured values may post on drop; the lanes go before the thread ends.
        drop(lanes);
        tracing::debug!(target: "threading", name = %self.name, "message loop stopped");
    }

    fn drain_after_terminate(&self, receiver: &Receiver<Message>) {
        while let Ok(message) = receiver.try_recv() {
            if let Message::Task(Pending::Now(task)) = message {
                self.execute(task);
            }
        }
    }

    fn execute(&self, task: Task) {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(target: "threading", name = %self.name, "task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_immediate_tasks_run_in_order() {
        let message_loop = MessageLoop::spawn("test-fifo").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            message_loop.enqueue(Pending::Now(Box::new(move || tx.send(i).unwrap())));
        }
        let received: Vec<i32> = (0..5).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        message_loop.terminate();
    }

    #[test]
    fn test_delayed_task_runs_after_deadline() {
        let message_loop = MessageLoop::spawn("test-delayed").unwrap();
        let (tx, rx) = mpsc::channel();
        let posted = Instant::now();
        message_loop.enqueue(Pending::At(
            posted + Duration::from_millis(30),
            Box::new(move || tx.send(Instant::now()).unwrap()),
        ));
        let ran_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ran_at.duration_since(posted) >= Duration::from_millis(30));
        message_loop.terminate();
    }

    #[test]
    fn test_idle_task_waits_for_immediate_work() {
        let message_loop = MessageLoop::spawn("test-idle").unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();

        message_loop.enqueue(Pending::Now(Box::new(move || {
            gate_rx.recv().unwrap();
        })));
        let idle_tx = tx.clone();
        message_loop.enqueue(Pending::Idle(Box::new(move || idle_tx.send("idle").unwrap())));
        message_loop.enqueue(Pending::Now(Box::new(move || tx.send("task").unwrap())));
        gate_tx.send(()).unwrap();

        assert_eq!(rx.recv().unwrap(), "task");
        assert_eq!(rx.recv().unwrap(), "idle");
        message_loop.terminate();
    }

    #[test]
    fn test_panicking_task_does_not_stop_loop() {
        let message_loop = MessageLoop::spawn("test-panic").unwrap();
        let (tx, rx) = mpsc::channel();
        message_loop.enqueue(Pending::Now(Box::new(|| panic!("boom"))));
        message_loop.enqueue(Pending::Now(Box::new(move || tx.send(1).unwrap())));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        message_loop.terminate();
    }

    #[test]
    fn test_merge_hands_delayed_lane_to_target() {
        let source = MessageLoop::spawn("test-merge-source").unwrap();
        let target = MessageLoop::spawn("test-merge-target").unwrap();
        let (tx, rx) = mpsc::channel();

        let delayed_tx = tx.clone();
        source.enqueue(Pending::At(
            Instant::now() + Duration::from_millis(40),
            Box::new(move || delayed_tx.send(current_loop_id()).unwrap()),
        ));
        // Make sure the delayed task sits in the source's local lane.
        let (seen_tx, seen_rx) = mpsc::channel();
        source.enqueue(Pending::Now(Box::new(move || seen_tx.send(()).unwrap())));
        seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(source.merge_into(&target));
        assert_eq!(source.effective_id(), target.id());
        assert!(!target.merge_into(&source));

        let ran_on = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ran_on, Some(target.id()));
        assert!(source.unmerge());
        source.terminate();
        target.terminate();
    }

    #[test]
    fn test_terminated_loop_rejects_new_tasks() {
        let message_loop = MessageLoop::spawn("test-terminate").unwrap();
        message_loop.terminate();
        let (tx, rx) = mpsc::channel::<i32>();
        message_loop.enqueue(Pending::Now(Box::new(move || tx.send(1).unwrap())));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
