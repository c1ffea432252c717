//! Temporary merge of the engine loop into the UI loop.
//!
//! While a [`ThreadModeAutoSwitch`] is alive, engine tasks run on the UI
//! thread and the UI operation queue delivers in place as it does for
//! [`ThreadStrategy::PartOnLayout`]. Dropping the guard restores both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use threading::{TaskRunner, ThreadStrategy};

use crate::ui_operation_queue::DynamicUiOperationQueue;

/// Runners and queue a shell may switch between thread modes.
#[derive(Debug)]
pub struct ThreadModeManager {
    ui_runner: TaskRunner,
    engine_runner: TaskRunner,
    queue: Arc<DynamicUiOperationQueue>,
    held: AtomicBool,
}

impl ThreadModeManager {
    pub fn new(
        ui_runner: TaskRunner,
        engine_runner: TaskRunner,
        queue: Arc<DynamicUiOperationQueue>,
    ) -> Self {
        Self {
            ui_runner,
            engine_runner,
            queue,
            held: AtomicBool::new(false),
        }
    }

    /// Whether a switch is currently held.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Whether the engine already shares the UI loop.
    pub fn is_engine_on_ui(&self) -> bool {
        self.engine_runner.is_same_loop(&self.ui_runner)
    }

    pub fn queue(&self) -> &Arc<DynamicUiOperationQueue> {
        &self.queue
    }
}

/// Guard holding the engine loop merged into the UI loop.
///
/// Inert when another guard is held or the engine already runs on the UI
/// thread.
#[must_use = "the merge is undone when the guard drops"]
pub struct ThreadModeAutoSwitch<'a> {
    manager: &'a ThreadModeManager,
    previous: Option<ThreadStrategy>,
}

impl<'a> ThreadModeAutoSwitch<'a> {
    pub fn new(manager: &'a ThreadModeManager) -> Self {
        let inert = Self {
            manager,
            previous: None,
        };
        if manager.is_engine_on_ui() {
            return inert;
        }
        if manager
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return inert;
        }
        if !manager.engine_runner.merge_into(&manager.ui_runner) {
            manager.held.store(false, Ordering::Release);
            return inert;
        }

        let previous = manager.queue.strategy();
        manager.queue.transfer(ThreadStrategy::PartOnLayout);
        tracing::debug!(target: "shell", ?previous, "engine merged into ui thread");
        Self {
            manager,
            previous: Some(previous),
        }
    }

    /// Whether this guard performed the merge.
    pub fn is_active(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for ThreadModeAutoSwitch<'_> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        self.manager.engine_runner.unmerge();
        self.manager.queue.transfer(previous);
        self.manager.held.store(false, Ordering::Release);
        tracing::debug!(target: "shell", ?previous, "engine unmerged from ui thread");
    }
}
