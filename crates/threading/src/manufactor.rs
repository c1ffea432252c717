//! Thread strategies and the runners they produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ThreadingResult;
use crate::task_runner::TaskRunner;

/// Placement of the engine and layout work relative to the UI thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadStrategy {
    /// Engine and layout run on the UI thread
    #[default]
    AllOnUi,
    /// Engine and layout share a dedicated thread
    MostOnTasm,
    /// Engine on the UI thread, layout on its own thread
    PartOnLayout,
    /// Engine and layout each get a dedicated thread
    MultiThreads,
}

impl ThreadStrategy {
    /// Numeric form carried in legacy timing snapshots.
    pub fn as_u32(self) -> u32 {
        match self {
            ThreadStrategy::AllOnUi => 0,
            ThreadStrategy::MostOnTasm => 1,
            ThreadStrategy::PartOnLayout => 2,
            ThreadStrategy::MultiThreads => 3,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ThreadStrategy::AllOnUi),
            1 => Some(ThreadStrategy::MostOnTasm),
            2 => Some(ThreadStrategy::PartOnLayout),
            3 => Some(ThreadStrategy::MultiThreads),
            _ => None,
        }
    }

    pub fn has_engine_thread(self) -> bool {
        matches!(self, ThreadStrategy::MostOnTasm | ThreadStrategy::MultiThreads)
    }

    pub fn has_layout_thread(self) -> bool {
        matches!(self, ThreadStrategy::PartOnLayout | ThreadStrategy::MultiThreads)
    }
}

static UI_RUNNER: OnceLock<TaskRunner> = OnceLock::new();
static REPORT_RUNNER: OnceLock<TaskRunner> = OnceLock::new();
static JS_GROUP_RUNNERS: OnceLock<Mutex<HashMap<String, TaskRunner>>> = OnceLock::new();
static RUNNER_SEQ: AtomicU32 = AtomicU32::new(1);

fn shared_runner(cell: &'static OnceLock<TaskRunner>, name: &str) -> ThreadingResult<TaskRunner> {
    if let Some(runner) = cell.get() {
        return Ok(runner.clone());
    }
    let runner = TaskRunner::new(name)?;
    Ok(cell.get_or_init(|| runner).clone())
}

fn next_name(prefix: &str) -> String {
    format!("{prefix}-{}", RUNNER_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Install the host's UI runner. Returns false if one is already set.
pub fn install_ui_task_runner(runner: TaskRunner) -> bool {
    UI_RUNNER.set(runner).is_ok()
}

/// The process UI runner, started on first use if the host installed none.
pub fn ui_task_runner() -> ThreadingResult<TaskRunner> {
    shared_runner(&UI_RUNNER, "lynx-ui")
}

/// The single process-wide runner hosting every performance controller.
pub fn report_task_runner() -> ThreadingResult<TaskRunner> {
    shared_runner(&REPORT_RUNNER, "lynx-timing")
}

/// JS runner shared by every shell using the same group name.
pub fn js_group_task_runner(group_name: &str) -> ThreadingResult<TaskRunner> {
    let groups = JS_GROUP_RUNNERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut groups = groups.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(runner) = groups.get(group_name) {
        return Ok(runner.clone());
    }
    let runner = TaskRunner::new(&format!("lynx-js-{group_name}"))?;
    groups.insert(group_name.to_string(), runner.clone());
    Ok(runner)
}

/// Runners for one shell, laid out by its [`ThreadStrategy`].
#[derive(Debug, Clone)]
pub struct TaskRunnerManufactor {
    strategy: ThreadStrategy,
    ui: TaskRunner,
    engine: TaskRunner,
    layout: TaskRunner,
    js: TaskRunner,
    reporter: TaskRunner,
}

impl TaskRunnerManufactor {
    /// Build runners around the process UI runner.
    pub fn new(strategy: ThreadStrategy, js_group_name: Option<&str>) -> ThreadingResult<Self> {
        Self::with_ui_runner(strategy, ui_task_runner()?, js_group_name)
    }

    /// Build runners around an explicit UI runner.
    pub fn with_ui_runner(
        strategy: ThreadStrategy,
        ui: TaskRunner,
        js_group_name: Option<&str>,
    ) -> ThreadingResult<Self> {
        let engine = if strategy.has_engine_thread() {
            TaskRunner::new(&next_name("lynx-tasm"))?
        } else {
            ui.clone()
        };
        let layout = if strategy.has_layout_thread() {
            TaskRunner::new(&next_name("lynx-layout"))?
        } else {
            engine.clone()
        };
        let js = match js_group_name {
            Some(name) if !name.is_empty() => js_group_task_runner(name)?,
            _ => TaskRunner::new(&next_name("lynx-js"))?,
        };

        tracing::debug!(target: "threading", ?strategy, "task runners created");

        Ok(Self {
            strategy,
            ui,
            engine,
            layout,
            js,
            reporter: report_task_runner()?,
        })
    }

    pub fn strategy(&self) -> ThreadStrategy {
        self.strategy
    }

    pub fn ui_runner(&self) -> &TaskRunner {
        &self.ui
    }

    pub fn engine_runner(&self) -> &TaskRunner {
        &self.engine
    }

    pub fn layout_runner(&self) -> &TaskRunner {
        &self.layout
    }

    pub fn js_runner(&self) -> &TaskRunner {
        &self.js
    }

    pub fn reporter_runner(&self) -> &TaskRunner {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&ThreadStrategy::PartOnLayout).unwrap();
        assert_eq!(json, "\"PART_ON_LAYOUT\"");
        let parsed: ThreadStrategy = serde_json::from_str("\"MULTI_THREADS\"").unwrap();
        assert_eq!(parsed, ThreadStrategy::MultiThreads);
    }

    #[test]
    fn test_strategy_numeric_form() {
        for strategy in [
            ThreadStrategy::AllOnUi,
            ThreadStrategy::MostOnTasm,
            ThreadStrategy::PartOnLayout,
            ThreadStrategy::MultiThreads,
        ] {
            assert_eq!(ThreadStrategy::from_u32(strategy.as_u32()), Some(strategy));
        }
        assert_eq!(ThreadStrategy::from_u32(9), None);
    }

    #[test]
    fn test_all_on_ui_shares_one_loop() {
        let ui = TaskRunner::new("test-manufactor-ui").unwrap();
        let runners = TaskRunnerManufactor::with_ui_runner(ThreadStrategy::AllOnUi, ui, None).unwrap();
        assert!(runners.engine_runner().is_same_loop(runners.ui_runner()));
        assert!(runners.layout_runner().is_same_loop(runners.ui_runner()));
        assert!(!runners.js_runner().is_same_loop(runners.ui_runner()));
    }

    #[test]
    fn test_multi_threads_separates_engine_and_layout() {
        let ui = TaskRunner::new("test-manufactor-multi").unwrap();
        let runners =
            TaskRunnerManufactor::with_ui_runner(ThreadStrategy::MultiThreads, ui, None).unwrap();
        assert!(!runners.engine_runner().is_same_loop(runners.ui_runner()));
        assert!(!runners.layout_runner().is_same_loop(runners.engine_runner()));
    }

    #[test]
    fn test_js_group_runner_is_shared() {
        let first = js_group_task_runner("test-group").unwrap();
        let second = js_group_task_runner("test-group").unwrap();
        assert!(first.is_same_loop(&second));
        assert!(report_task_runner()
            .unwrap()
            .is_same_loop(&report_task_runner().unwrap()));
    }
}
