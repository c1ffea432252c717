//! Performance services of a view.
//!
//! - [`PerformanceController`] owns the timing handler and memory monitor
//!   of one view and routes every entry they produce
//! - [`MemoryMonitor`] aggregates category-tagged memory and reports when
//!   the total moves past a threshold
//! - [`PerformanceMediator`] and [`TimingMediator`] deliver entries and
//!   legacy timings to the host, the scripting runtimes and the tracker
//! - [`PerformanceConfig`] and [`env`] carry the switches

pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod host;
pub mod mediator;
pub mod memory;
pub mod report;
pub mod timing_mediator;

pub use config::{PerformanceConfig, DEFAULT_MEMORY_CHANGE_THRESHOLD_MB};
pub use controller::{EventDispatcher, PerformanceController};
pub use error::{PerformanceError, PerformanceResult};
pub use host::{
    EngineActor, EngineEventBus, EventTracker, FacadeActor, HostFacade, MessageEvent,
    MessageEventType, PlatformPerformanceObserver, RuntimeActor, RuntimeMessageSink,
};
pub use mediator::PerformanceMediator;
pub use memory::{MemoryMonitor, MemoryRecord};
pub use report::{calculate_duration, ReportEvent};
pub use timing_mediator::TimingMediator;
