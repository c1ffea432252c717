//! Deferred destruction for values that may still have work in flight.
//!
//! A value is parked under a key together with the runner it belongs to.
//! It is dropped on that runner either when its owner signals completion
//! through [`DelayedReleaseHolder::release`] or when the timeout expires,
//! whichever comes first.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use crate::task_runner::TaskRunner;

/// Time a parked value may wait for its completion signal.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Key identifying a parked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseKey(u64);

struct Held {
    runner: TaskRunner,
    value: Box<dyn Any + Send>,
}

/// Registry of values waiting to be dropped on their own runner.
#[derive(Default)]
pub struct DelayedReleaseHolder {
    held: Mutex<HashMap<ReleaseKey, Held>>,
    next_key: AtomicU64,
}

static GLOBAL_HOLDER: OnceLock<Arc<DelayedReleaseHolder>> = OnceLock::new();

/// Process-wide holder used by shells on destroy.
pub fn global_release_holder() -> &'static Arc<DelayedReleaseHolder> {
    GLOBAL_HOLDER.get_or_init(|| Arc::new(DelayedReleaseHolder::default()))
}

impl DelayedReleaseHolder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Park `value` until released or until `timeout` elapses.
    pub fn hold<T>(self: &Arc<Self>, runner: TaskRunner, value: T, timeout: Duration) -> ReleaseKey
    where
        T: Send + 'static,
    {
        let key = ReleaseKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            key,
            Held {
                runner: runner.clone(),
                value: Box::new(value),
            },
        );

        let holder: Weak<Self> = Arc::downgrade(self);
        runner.post_delayed_task(
            move || {
                let Some(holder) = holder.upgrade() else {
                    return;
                };
                // Dropped after the guard: the value's Drop may use the holder.
                let held = holder.lock().remove(&key);
                if let Some(held) = held {
                    tracing::debug!(target: "threading", key = key.0, "released after timeout");
                    drop(held);
                }
            },
            timeout,
        );

        tracing::trace!(target: "threading", key = key.0, "value parked");
        key
    }

    /// Signal completion: drop the value on its runner now.
    ///
    /// Returns false when the key is unknown or already released.
    pub fn release(&self, key: ReleaseKey) -> bool {
        let Some(held) = self.lock().remove(&key) else {
            return false;
        };

        if held.runner.runs_tasks_on_current_thread() {
            drop(held);
        } else {
            let runner = held.runner.clone();
            let value = held.value;
            runner.post_task(move || drop(value));
        }
        true
    }

    /// Whether the key is still parked.
    pub fn is_held(&self, key: ReleaseKey) -> bool {
        self.lock().contains_key(&key)
    }

    pub fn held_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop everything parked, on the calling thread.
    pub fn clear(&self) {
        let held: Vec<Held> = self.lock().drain().map(|(_, held)| held).collect();
        drop(held);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReleaseKey, Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
