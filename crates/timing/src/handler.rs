//! Single owner of both timing generations.
//!
//! Every write is first handed to [`TimingHandlerNg`], then normalized to
//! its legacy name and routed into [`TimingInfo`], where the setup/update
//! state machine decides when the delegate hears about it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::collector::Timing;
use crate::constants::{keys, origins};
use crate::handler_ng::TimingHandlerNg;
use crate::pipeline::{PipelineId, PipelineOrigin, TimingFlag};
use crate::polyfill::{is_extra_key, is_init_key, polyfill_key, strip_stage_prefixes};
use crate::sender::PerformanceEventSender;
use crate::timing_info::TimingInfo;
use crate::timing_map::TimestampUs;

/// Default number of live pipelines before new starts are refused.
pub const DEFAULT_PIPELINE_MAP_LIMIT: usize = 1000;

/// Receiver of the legacy setup/update callbacks.
pub trait TimingHandlerDelegate: Send + Sync {
    /// Called at most once per page.
    fn on_timing_setup(&self, timing_info: &TimingInfo);

    /// Called at most once per timing flag.
    fn on_timing_update(&self, timing_info: &TimingInfo, flag: &str);
}

pub struct TimingHandler {
    info: TimingInfo,
    ng: TimingHandlerNg,
    delegate: Option<Arc<dyn TimingHandlerDelegate>>,
    origins: HashMap<PipelineId, PipelineOrigin>,
    // Ids written to before (or without) a pipeline start.
    unstarted_pipelines: HashSet<PipelineId>,
    timing_flags: HashMap<PipelineId, Vec<TimingFlag>>,
    has_dispatched_setup_timing: bool,
    dispatched_flags: HashSet<TimingFlag>,
    pending_pipeline_ids: Vec<PipelineId>,
    pipeline_map_limit: usize,
    logged_pipeline_map_exceeded: bool,
}

impl TimingHandler {
    pub fn new(
        delegate: Option<Arc<dyn TimingHandlerDelegate>>,
        sender: Option<Arc<dyn PerformanceEventSender>>,
    ) -> Self {
        tracing::info!(target: "timing", "timing handler created");
        Self {
            info: TimingInfo::new(),
            ng: TimingHandlerNg::new(sender),
            delegate,
            origins: HashMap::new(),
            unstarted_pipelines: HashSet::new(),
            timing_flags: HashMap::new(),
            has_dispatched_setup_timing: false,
            dispatched_flags: HashSet::new(),
            pending_pipeline_ids: Vec::new(),
            pipeline_map_limit: DEFAULT_PIPELINE_MAP_LIMIT,
            logged_pipeline_map_exceeded: false,
        }
    }

    pub fn with_pipeline_map_limit(mut self, limit: usize) -> Self {
        self.pipeline_map_limit = limit;
        self
    }

    // ---- accessors ----

    pub fn timing_info(&self) -> &TimingInfo {
        &self.info
    }

    pub fn handler_ng(&self) -> &TimingHandlerNg {
        &self.ng
    }

    pub fn has_dispatched_setup_timing(&self) -> bool {
        self.has_dispatched_setup_timing
    }

    /// Pipelines holding timing data, started or not.
    pub fn live_pipeline_count(&self) -> usize {
        self.origins.len() + self.unstarted_pipelines.len()
    }

    /// Whether the live pipeline count has reached the configured limit.
    pub fn is_pipeline_map_exceeded(&self) -> bool {
        self.live_pipeline_count() >= self.pipeline_map_limit
    }

    fn log_pipeline_map_exceeded(&mut self) {
        if self.logged_pipeline_map_exceeded {
            return;
        }
        tracing::error!(
            target: "timing",
            size = self.live_pipeline_count(),
            limit = self.pipeline_map_limit,
            "pipeline map exceeded size limit"
        );
        self.logged_pipeline_map_exceeded = true;
    }

    /// Whether writes for `pipeline_id` may be stored. Known pipelines are
    /// always accepted; a new id is refused once the map is full.
    fn admit_pipeline(&mut self, pipeline_id: &str) -> bool {
        if pipeline_id.is_empty()
            || self.origins.contains_key(pipeline_id)
            || self.unstarted_pipelines.contains(pipeline_id)
        {
            return true;
        }
        if self.is_pipeline_map_exceeded() {
            self.log_pipeline_map_exceeded();
            return false;
        }
        self.unstarted_pipelines.insert(pipeline_id.to_string());
        true
    }

    // ---- configuration ----

    pub fn set_enable_js_runtime(&mut self, enable: bool) {
        self.info.set_enable_js_runtime(enable);
    }

    pub fn set_enable_background_runtime(&mut self, enable: bool) {
        self.ng.set_enable_background_runtime(enable);
    }

    pub fn set_enable_engine_callback(&mut self, enable: bool) {
        self.ng.set_enable_engine_callback(enable);
    }

    pub fn set_url(&mut self, url: &str) {
        self.info.set_url(url);
    }

    pub fn set_thread_strategy(&mut self, thread_strategy: u32) {
        self.info.set_thread_strategy(thread_strategy);
    }

    pub fn enable_ssr(&mut self, url: &str, data_size: u64) {
        self.info.enable_ssr(url, data_size);
    }

    // ---- producer API ----

    pub fn on_pipeline_start(&mut self, pipeline_id: &str, origin: &str, start_us: TimestampUs) {
        if pipeline_id.is_empty() {
            tracing::error!(target: "timing", origin, "pipeline started without an id");
            return;
        }
        let tracked = self.unstarted_pipelines.remove(pipeline_id)
            || self.origins.contains_key(pipeline_id);
        if !tracked && self.is_pipeline_map_exceeded() {
            self.log_pipeline_map_exceeded();
            return;
        }
        self.origins
            .insert(pipeline_id.to_string(), origin.to_string());
        self.ng.on_pipeline_start(pipeline_id, origin);
        self.set_timing(keys::PIPELINE_START, start_us, pipeline_id);
    }

    pub fn bind_pipeline_id_with_timing_flag(&mut self, pipeline_id: &str, flag: &str) {
        if pipeline_id.is_empty() || flag.is_empty() {
            tracing::error!(target: "timing", pipeline_id, flag, "invalid pipeline id or timing flag");
            return;
        }
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.timing_flags
            .entry(pipeline_id.to_string())
            .or_default()
            .push(flag.to_string());
        self.ng.bind_pipeline_id_with_timing_flag(pipeline_id, flag);
    }

    /// Replay a frame collected by a timing scope.
    pub fn set_timing_frame(&mut self, timing: Timing) {
        if !self.admit_pipeline(&timing.pipeline_id) {
            return;
        }
        for (key, timestamp) in timing.framework_timings.iter() {
            self.set_framework_timing(key, timestamp, &timing.pipeline_id);
        }
        for (key, timestamp) in timing.timings.iter() {
            self.set_timing(key, timestamp, &timing.pipeline_id);
        }
    }

    /// Record an engine timing. An empty `pipeline_id` is allowed for init
    /// and container keys.
    pub fn set_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid timing key or timestamp");
            return;
        }
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.ng.set_timing(key, timestamp, pipeline_id);
        self.route_legacy(key, timestamp, pipeline_id);
    }

    /// Record a framework timing; known keys also feed the legacy record.
    pub fn set_framework_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid timing key or timestamp");
            return;
        }
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.ng.set_framework_timing(key, timestamp, pipeline_id);
        self.route_legacy(key, timestamp, pipeline_id);
    }

    pub fn set_framework_extra_timing_info(&mut self, pipeline_id: &str, key: &str, value: &str) {
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.ng.set_framework_extra_timing_info(pipeline_id, key, value);
    }

    pub fn set_host_platform_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid timing key or timestamp");
            return;
        }
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.ng.set_host_platform_timing(key, timestamp, pipeline_id);
    }

    pub fn set_host_platform_timing_extra_info(&mut self, pipeline_id: &str, key: &str, value: &str) {
        if !self.admit_pipeline(pipeline_id) {
            return;
        }
        self.ng
            .set_host_platform_timing_extra_info(pipeline_id, key, value);
    }

    /// Record a timing against a flag instead of a pipeline. It is merged
    /// into that flag's update snapshot when the update is dispatched.
    pub fn set_timing_with_timing_flag(&mut self, flag: &str, key: &str, timestamp: TimestampUs) {
        if flag.is_empty() {
            tracing::error!(target: "timing", key, "timing flag is empty");
            return;
        }
        if self.is_pipeline_map_exceeded() {
            self.log_pipeline_map_exceeded();
            return;
        }
        let Some(legacy_key) = polyfill_key(key) else {
            return;
        };
        self.info
            .set_timing_with_flag(flag, &legacy_key, timestamp);
    }

    fn route_legacy(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        let Some(legacy_key) = polyfill_key(key) else {
            return;
        };
        if is_init_key(&legacy_key) {
            self.info.set_init_timing(&legacy_key, timestamp);
        } else if is_extra_key(&legacy_key) {
            self.info.set_extra_timing(&legacy_key, timestamp);
        } else if !pipeline_id.is_empty() {
            self.process_pipeline_timing(&legacy_key, timestamp, pipeline_id);
        }
    }

    fn is_setup_pipeline(&self, pipeline_id: &str) -> bool {
        self.origins
            .get(pipeline_id)
            .is_some_and(|origin| origins::is_setup_origin(origin))
    }

    fn process_pipeline_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        let key = strip_stage_prefixes(key);
        if self.is_setup_pipeline(pipeline_id) {
            self.info
                .set_setup_pipeline_timing(&key, timestamp, pipeline_id);
            self.dispatch_setup_timing_if_needed(pipeline_id);
        } else {
            self.info.set_pipeline_timing(&key, timestamp, pipeline_id);
        }
        self.dispatch_update_timing_if_needed(pipeline_id);
    }

    // ---- legacy dispatch ----

    fn dispatch_setup_timing_if_needed(&mut self, pipeline_id: &str) {
        if !self.info.is_setup_ready(pipeline_id) {
            return;
        }
        if self.has_dispatched_setup_timing {
            tracing::error!(target: "timing", pipeline_id, "setup timing already dispatched");
            return;
        }
        self.has_dispatched_setup_timing = true;
        self.info.prepare_before_dispatch_setup(pipeline_id);
        if let Some(delegate) = &self.delegate {
            delegate.on_timing_setup(&self.info);
        }
        for pending in std::mem::take(&mut self.pending_pipeline_ids) {
            self.dispatch_update_timing(&pending);
        }
    }

    fn dispatch_update_timing_if_needed(&mut self, pipeline_id: &str) {
        if !self.info.is_update_ready(pipeline_id) {
            return;
        }
        if self.has_dispatched_setup_timing {
            self.dispatch_update_timing(pipeline_id);
        } else if !self.pending_pipeline_ids.iter().any(|pending| pending == pipeline_id) {
            self.pending_pipeline_ids.push(pipeline_id.to_string());
        }
    }

    fn dispatch_update_timing(&mut self, pipeline_id: &str) {
        let Some(flags) = self.timing_flags.get(pipeline_id).cloned() else {
            tracing::debug!(target: "timing", pipeline_id, "update without timing flag released");
            self.release_timing(pipeline_id);
            return;
        };
        for flag in flags {
            if !self.dispatched_flags.insert(flag.clone()) {
                continue;
            }
            self.info.prepare_before_dispatch_update(pipeline_id, &flag);
            if let Some(delegate) = &self.delegate {
                delegate.on_timing_update(&self.info, &flag);
            }
        }
        self.release_timing(pipeline_id);
    }

    // ---- snapshots and reset ----

    /// Deep copy of the legacy record with millisecond values.
    pub fn all_timing_info(&self) -> Value {
        self.info.all_timing_info(true)
    }

    pub fn clear_pipeline_timing_info(&mut self) {
        self.info.clear_pipeline_timing_info();
        self.origins.clear();
        self.unstarted_pipelines.clear();
        self.timing_flags.clear();
        self.pending_pipeline_ids.clear();
        self.has_dispatched_setup_timing = false;
        self.dispatched_flags.clear();
        self.ng.clear_pipeline_timing_info();
    }

    pub fn clear_extra_timing_info(&mut self) {
        self.info.clear_extra_timing_info();
        self.ng.clear_container_timing_info();
    }

    pub fn reset_timing_before_reload(&mut self) {
        self.clear_pipeline_timing_info();
        self.info.set_has_reload(true);
    }

    /// Forget the legacy bookkeeping of one pipeline.
    pub fn release_timing(&mut self, pipeline_id: &str) {
        self.timing_flags.remove(pipeline_id);
        self.origins.remove(pipeline_id);
        self.unstarted_pipelines.remove(pipeline_id);
        self.info.release_pipeline(pipeline_id);
    }
}

impl std::fmt::Debug for TimingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingHandler")
            .field("live_pipelines", &self.origins.len())
            .field("has_dispatched_setup_timing", &self.has_dispatched_setup_timing)
            .field("pending_pipeline_ids", &self.pending_pipeline_ids)
            .field("ng", &self.ng)
            .finish()
    }
}
