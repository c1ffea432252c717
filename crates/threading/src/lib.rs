//! Threading substrate for the performance pipeline.
//!
//! - [`TaskRunner`] - handle to a single-threaded message loop with
//!   immediate, delayed and idle lanes, plus loop merging
//! - [`Actor`] - a value confined to one runner, reached through closures
//! - [`instance`] - per-call instance id context and flush hooks
//! - [`DelayedReleaseHolder`] - deferred drop of values with work in flight
//! - [`TaskRunnerManufactor`] - runners laid out per [`ThreadStrategy`]

pub mod actor;
pub mod error;
pub mod instance;
pub mod manufactor;
mod message_loop;
pub mod release_holder;
pub mod task_runner;

pub use actor::Actor;
pub use error::{ThreadingError, ThreadingResult};
pub use instance::{current_instance_id, register_flush_hook, UNKNOWN_INSTANCE_ID};
pub use manufactor::{
    install_ui_task_runner, report_task_runner, ui_task_runner, TaskRunnerManufactor,
    ThreadStrategy,
};
pub use message_loop::LoopId;
pub use release_holder::{
    global_release_holder, DelayedReleaseHolder, ReleaseKey, DEFAULT_RELEASE_TIMEOUT,
};
pub use task_runner::TaskRunner;
