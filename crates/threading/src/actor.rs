//! Actors: a value confined to one task runner.
//!
//! All access to the wrapped value goes through closures executed on the
//! actor's runner. Calls made from that runner's own thread run inline;
//! everything else is posted. A disabled or released actor silently drops
//! incoming work.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::error::{ThreadingError, ThreadingResult};
use crate::instance::InstanceScope;
use crate::task_runner::TaskRunner;

/// A value of type `T` bound to a [`TaskRunner`].
///
/// Calls never take a lock on the caller's thread: they run inline on the
/// runner or are posted to it, and the runner's queue orders them. The value
/// itself sits in a [`Mutex`] that is locked by the runner thread while a
/// closure runs, so it is uncontended in normal use. The only other locker is
/// [`Actor::release`], which waits for an in-flight closure to finish.
pub struct Actor<T> {
    value: Mutex<Option<T>>,
    runner: TaskRunner,
    instance_id: i32,
    enabled: bool,
    released: AtomicBool,
}

impl<T: Send + 'static> Actor<T> {
    /// Create an enabled actor around `value`.
    pub fn new(value: T, runner: TaskRunner, instance_id: i32) -> Arc<Self> {
        Self::with_enabled(Some(value), runner, instance_id, true)
    }

    /// Create an actor with an explicit enable flag.
    pub fn with_enabled(
        value: Option<T>,
        runner: TaskRunner,
        instance_id: i32,
        enabled: bool,
    ) -> Arc<Self> {
        let released = value.is_none();
        Arc::new(Self {
            value: Mutex::new(value),
            runner,
            instance_id,
            enabled,
            released: AtomicBool::new(released),
        })
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    /// Whether submitted work will reach the value.
    pub fn can_run(&self) -> bool {
        self.enabled && !self.released.load(Ordering::Acquire)
    }

    /// Run inline when already on the runner, otherwise post.
    pub fn act<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.act_inline_or_post(f, true);
    }

    /// Like [`Actor::act`] but without instance instrumentation.
    pub fn act_lite<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.act_inline_or_post(f, false);
    }

    /// Always post, even from the runner's own thread.
    pub fn act_async<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.post(f, true);
    }

    /// Post to the runner's idle lane.
    pub fn act_idle<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        if !self.can_run() {
            self.log_dropped();
            return;
        }
        let actor = Arc::clone(self);
        self.runner.post_idle_task(move || {
            actor.invoke(f, true);
        });
    }

    /// Run and wait for the result.
    ///
    /// Inline on the runner's own thread; otherwise blocks the caller until
    /// the runner has executed the closure.
    pub fn act_sync<R, F>(self: &Arc<Self>, f: F) -> ThreadingResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        if !self.enabled {
            return Err(ThreadingError::ActorDisabled(self.instance_id));
        }

        if self.runner.runs_tasks_on_current_thread() {
            let mut guard = match self.value.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    return Err(ThreadingError::Reentrant(self.instance_id))
                }
            };
            return self
                .run_locked(&mut guard, f, true)
                .ok_or(ThreadingError::ActorReleased(self.instance_id));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let actor = Arc::clone(self);
        self.runner.post_task(move || {
            let _ = tx.send(actor.invoke(f, true));
        });

        rx.blocking_recv()
            .map_err(|_| ThreadingError::RunnerTerminated(self.runner.name().to_string()))?
            .ok_or(ThreadingError::ActorReleased(self.instance_id))
    }

    /// Detach and return the value. Later work is dropped.
    ///
    /// Must not be called from inside one of this actor's own closures.
    pub fn release(&self) -> Option<T> {
        self.released.store(true, Ordering::Release);
        self.lock().take()
    }

    /// Detach the value and drop it on the actor's runner.
    pub fn release_on_runner(self: &Arc<Self>) {
        self.released.store(true, Ordering::Release);
        let actor = Arc::clone(self);
        self.runner.post_task(move || {
            let value = actor.lock().take();
            drop(value);
            tracing::trace!(target: "threading", instance_id = actor.instance_id, "actor released");
        });
    }

    fn act_inline_or_post<F>(self: &Arc<Self>, f: F, instrumented: bool)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        if !self.runner.runs_tasks_on_current_thread() {
            self.post(f, instrumented);
            return;
        }

        match self.value.try_lock() {
            Ok(mut guard) => {
                self.run_locked(&mut guard, f, instrumented);
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                self.run_locked(&mut poisoned.into_inner(), f, instrumented);
            }
            // Re-entered from one of our own closures: defer instead.
            Err(TryLockError::WouldBlock) => self.post(f, instrumented),
        }
    }

    fn post<F>(self: &Arc<Self>, f: F, instrumented: bool)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        if !self.can_run() {
            self.log_dropped();
            return;
        }
        let actor = Arc::clone(self);
        self.runner.post_task(move || {
            actor.invoke(f, instrumented);
        });
    }

    fn invoke<R>(&self, f: impl FnOnce(&mut T) -> R, instrumented: bool) -> Option<R> {
        let mut guard = self.lock();
        self.run_locked(&mut guard, f, instrumented)
    }

    fn run_locked<R>(
        &self,
        slot: &mut Option<T>,
        f: impl FnOnce(&mut T) -> R,
        instrumented: bool,
    ) -> Option<R> {
        if !self.enabled {
            self.log_dropped();
            return None;
        }
        let Some(value) = slot.as_mut() else {
            self.log_dropped();
            return None;
        };
        let _scope = instrumented.then(|| InstanceScope::enter(self.instance_id));
        Some(f(value))
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_dropped(&self) {
        tracing::debug!(
            target: "threading",
            instance_id = self.instance_id,
            enabled = self.enabled,
            "actor call dropped"
        );
    }
}

impl<T> fmt::Debug for Actor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("runner", &self.runner)
            .field("instance_id", &self.instance_id)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::current_instance_id;
    use std::sync::mpsc;
    use std::time::Duration;

    fn counter_actor(name: &str, instance_id: i32) -> Arc<Actor<Vec<i32>>> {
        Actor::new(Vec::new(), TaskRunner::new(name).unwrap(), instance_id)
    }

    #[test]
    fn test_act_sync_returns_value() {
        let actor = counter_actor("test-actor-sync", 1);
        actor.act(|values| values.push(1));
        actor.act_async(|values| values.push(2));
        let snapshot = actor.act_sync(|values| values.clone()).unwrap();
        assert_eq!(snapshot, vec![1, 2]);
    }

    #[test]
    fn test_act_runs_inline_on_own_thread() {
        let actor = counter_actor("test-actor-inline", 2);
        let inner = Arc::clone(&actor);
        let order = actor
            .act_sync(move |values| {
                values.push(1);
                // Re-entrant act defers behind the current closure.
                inner.act(|values| values.push(3));
                values.push(2);
                values.clone()
            })
            .unwrap();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(actor.act_sync(|values| values.clone()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_act_async_sets_instance_id() {
        let actor = counter_actor("test-actor-instance", 77);
        let (tx, rx) = mpsc::channel();
        actor.act_async(move |_| tx.send(current_instance_id()).unwrap());
        assert_eq!(rx.recv().unwrap(), 77);

        let (tx, rx) = mpsc::channel();
        actor.act_lite(move |_| tx.send(current_instance_id()).unwrap());
        assert_eq!(rx.recv().unwrap(), crate::instance::UNKNOWN_INSTANCE_ID);
    }

    #[test]
    fn test_disabled_actor_drops_work() {
        let runner = TaskRunner::new("test-actor-disabled").unwrap();
        let actor = Actor::with_enabled(Some(Vec::<i32>::new()), runner, 3, false);
        let (tx, rx) = mpsc::channel::<()>();
        actor.act(move |_| tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(matches!(
            actor.act_sync(|values| values.len()),
            Err(ThreadingError::ActorDisabled(3))
        ));
    }

    #[test]
    fn test_released_actor_reports_release() {
        let actor = counter_actor("test-actor-released", 4);
        actor.act_sync(|values| values.push(9)).unwrap();
        assert_eq!(actor.release(), Some(vec![9]));
        assert!(!actor.can_run());
        assert!(matches!(
            actor.act_sync(|values| values.len()),
            Err(ThreadingError::ActorReleased(4))
        ));
    }

    #[test]
    fn test_release_waits_for_running_closure() {
        let actor = counter_actor("test-actor-release-wait", 6);
        let (started_tx, started_rx) = mpsc::channel();
        actor.act_async(move |values| {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(30));
            values.push(1);
        });
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(actor.release(), Some(vec![1]));

        // Work posted after release never touches the value.
        let (tx, rx) = mpsc::channel::<()>();
        actor.act_async(move |_| tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_act_idle_runs_eventually() {
        let actor = counter_actor("test-actor-idle", 5);
        let (tx, rx) = mpsc::channel();
        actor.act_async(|values| values.push(1));
        actor.act_idle(move |values| {
            values.push(2);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let values = actor.act_sync(|values| values.clone()).unwrap();
        assert_eq!(values, vec![1, 2]);
    }
}
