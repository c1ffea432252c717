//! Shell of a view.
//!
//! Builds the task runners and actors a view runs on, wires the
//! performance controller to the host and scripting sides, and owns the
//! engine and UI operation queues.

pub mod operation_queue;
pub mod shell;
pub mod thread_mode;
pub mod ui_operation_queue;

pub use operation_queue::{LayoutResultManager, Operation, TasmOperationQueue};
pub use shell::{PerformanceApi, RuntimeRelease, Shell, ShellBuilder};
pub use thread_mode::{ThreadModeAutoSwitch, ThreadModeManager};
pub use ui_operation_queue::{DynamicUiOperationQueue, UiOperationPriority};
