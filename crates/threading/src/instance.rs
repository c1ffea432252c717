//! Instance context around instrumented actor calls.
//!
//! While an instrumented closure runs, the thread's current instance id is
//! the actor's id. Afterwards the registered flush hooks run for that
//! instance and the previous id is restored, so nested calls unwind cleanly.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Instance id reported outside any actor call.
pub const UNKNOWN_INSTANCE_ID: i32 = -1;

/// Closures running longer than this are reported as long tasks.
pub const LONG_TASK_THRESHOLD: Duration = Duration::from_millis(50);

type FlushHook = Arc<dyn Fn(i32) + Send + Sync>;

static FLUSH_HOOKS: OnceLock<RwLock<Vec<FlushHook>>> = OnceLock::new();
static LONG_TASK_MONITOR_ENABLED: AtomicBool = AtomicBool::new(true);

thread_local! {
    static CURRENT_INSTANCE_ID: Cell<i32> = const { Cell::new(UNKNOWN_INSTANCE_ID) };
}

fn flush_hooks() -> &'static RwLock<Vec<FlushHook>> {
    FLUSH_HOOKS.get_or_init(|| RwLock::new(Vec::new()))
}

/// Instance id of the actor call running on this thread.
pub fn current_instance_id() -> i32 {
    CURRENT_INSTANCE_ID.with(Cell::get)
}

/// Register a hook run after every instrumented actor call.
///
/// Used to flush per-instance event trackers.
pub fn register_flush_hook<F>(hook: F)
where
    F: Fn(i32) + Send + Sync + 'static,
{
    flush_hooks()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Arc::new(hook));
}

/// Toggle long-task reporting for instrumented calls.
pub fn set_long_task_monitor_enabled(enabled: bool) {
    LONG_TASK_MONITOR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether long-task reporting is on.
pub fn long_task_monitor_enabled() -> bool {
    LONG_TASK_MONITOR_ENABLED.load(Ordering::Relaxed)
}

/// Guard installed for the duration of one instrumented call.
pub(crate) struct InstanceScope {
    instance_id: i32,
    previous: i32,
    started: Instant,
}

impl InstanceScope {
    pub(crate) fn enter(instance_id: i32) -> Self {
        let previous = CURRENT_INSTANCE_ID.with(|current| current.replace(instance_id));
        Self {
            instance_id,
            previous,
            started: Instant::now(),
        }
    }
}

impl Drop for InstanceScope {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if long_task_monitor_enabled() && elapsed > LONG_TASK_THRESHOLD {
            tracing::warn!(
                target: "threading",
                instance_id = self.instance_id,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "long task"
            );
        }

        let hooks: Vec<FlushHook> = flush_hooks()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(self.instance_id);
        }

        CURRENT_INSTANCE_ID.with(|current| current.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_scope_sets_and_restores_instance_id() {
        assert_eq!(current_instance_id(), UNKNOWN_INSTANCE_ID);
        {
            let _outer = InstanceScope::enter(3);
            assert_eq!(current_instance_id(), 3);
            {
                let _inner = InstanceScope::enter(9);
                assert_eq!(current_instance_id(), 9);
            }
            assert_eq!(current_instance_id(), 3);
        }
        assert_eq!(current_instance_id(), UNKNOWN_INSTANCE_ID);
    }

    #[test]
    fn test_flush_hooks_see_instance_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        register_flush_hook(move |id| {
            if id == 4242 {
                sink.lock().unwrap().push(id);
            }
        });

        drop(InstanceScope::enter(4242));
        assert_eq!(*seen.lock().unwrap(), vec![4242]);
    }
}
