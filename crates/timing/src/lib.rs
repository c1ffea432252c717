//! Pipeline timing collection for the performance pipeline.
//!
//! Two generations of timing records live side by side:
//!
//! - [`TimingInfo`] - the legacy, timing-flag based record behind the
//!   setup/update callbacks
//! - [`TimingInfoNg`] - the pipeline-id based record that builds
//!   performance entries (init, pipeline, FCP/FMP/TTI metrics)
//!
//! [`TimingHandler`] owns both and is the only writer. Producers on other
//! threads collect timestamps through [`collector`] scopes and hand the
//! finished [`Timing`] frames to whoever owns the handler.

pub mod collector;
pub mod constants;
pub mod error;
pub mod handler;
pub mod handler_ng;
pub mod pipeline;
pub mod polyfill;
pub mod sender;
pub mod timing_info;
pub mod timing_info_ng;
pub mod timing_map;

pub use collector::{
    register_delegate, reset_delegates, unregister_delegate, DelegateHandle, DelegateRegistry,
    Timing, TimingCollectorDelegate, TimingScope,
};
pub use error::{TimingError, TimingResult};
pub use handler::{TimingHandler, TimingHandlerDelegate, DEFAULT_PIPELINE_MAP_LIMIT};
pub use handler_ng::TimingHandlerNg;
pub use pipeline::{
    generate_pipeline_id, reset_pipeline_id_counter, ListBatch, ListContext, ListItemLifeOption,
    PipelineId, PipelineOptions, PipelineOrigin, TimingFlag,
};
pub use sender::{EventTypes, PerformanceEntry, PerformanceEventSender};
pub use timing_info::TimingInfo;
pub use timing_info_ng::{MetricValue, TimingInfoNg};
pub use timing_map::{current_timestamp_us, us_to_ms, TimestampUs, TimingMap};
