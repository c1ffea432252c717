//! Legacy timing record behind the setup/update callbacks.
//!
//! Keys here are in their legacy (polyfill) form. A setup snapshot is taken
//! once per page from the first setup-ready pipeline; update snapshots are
//! taken once per timing flag.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};

use crate::constants::{keys, legacy, FMP_FLAG};
use crate::pipeline::{PipelineId, TimingFlag};
use crate::timing_map::{TimestampUs, TimingMap};

const SETUP_READY_KEYS: [&str; 4] = [
    legacy::DRAW_END,
    keys::LAYOUT_END,
    legacy::UI_OPERATION_FLUSH_END,
    legacy::LOAD_TEMPLATE_END,
];

const UPDATE_READY_KEYS: [&str; 3] = [
    legacy::DRAW_END,
    keys::LAYOUT_END,
    legacy::UI_OPERATION_FLUSH_END,
];

#[derive(Debug, Clone, Default)]
struct SsrTiming {
    render_page_timing: TimingMap,
    metrics: TimingMap,
    url: String,
    data_size: u64,
}

fn set_duration(
    target: &mut TimingMap,
    name: &str,
    end: TimestampUs,
    start: Option<TimestampUs>,
) {
    if let Some(duration) = start.and_then(|start| end.checked_sub(start)) {
        target.set_duration(name, duration);
    }
}

/// Legacy timing aggregate.
#[derive(Debug, Clone, Default)]
pub struct TimingInfo {
    init_timing: TimingMap,
    extra_timing: TimingMap,
    pipeline_timing: HashMap<PipelineId, TimingMap>,
    timing_with_flag: HashMap<TimingFlag, TimingMap>,
    setup_timing: TimingMap,
    update_timing: BTreeMap<TimingFlag, TimingMap>,
    metrics: TimingMap,
    ssr: Option<SsrTiming>,
    url: String,
    thread_strategy: u32,
    has_reload: bool,
    enable_js_runtime: bool,
}

impl TimingInfo {
    pub fn new() -> Self {
        Self {
            enable_js_runtime: true,
            ..Self::default()
        }
    }

    // ---- setters ----

    pub fn set_init_timing(&mut self, key: &str, timestamp: TimestampUs) {
        self.init_timing.set(key, timestamp);
    }

    pub fn set_extra_timing(&mut self, key: &str, timestamp: TimestampUs) {
        self.extra_timing.set(key, timestamp);
    }

    /// Store a timing keyed by flag, merged into that flag's update later.
    pub fn set_timing_with_flag(&mut self, flag: &str, key: &str, timestamp: TimestampUs) {
        self.timing_with_flag
            .entry(flag.to_string())
            .or_default()
            .set(key, timestamp);
    }

    pub fn set_pipeline_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        self.pipeline_timing
            .entry(pipeline_id.to_string())
            .or_default()
            .set(key, timestamp);
    }

    /// Store a setup-pipeline timing, splitting out SSR keys when enabled.
    pub fn set_setup_pipeline_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) {
        let Some(ssr) = self.ssr.as_mut() else {
            self.set_pipeline_timing(key, timestamp, pipeline_id);
            return;
        };

        if key.ends_with(legacy::SSR_SUFFIX) {
            ssr.render_page_timing.set(key, timestamp);
            return;
        }
        if legacy::SSR_REUSED_KEYS.contains(&key) {
            ssr.render_page_timing
                .set(&format!("{key}{}", legacy::SSR_SUFFIX), timestamp);
        }
        self.set_pipeline_timing(key, timestamp, pipeline_id);
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn set_thread_strategy(&mut self, thread_strategy: u32) {
        self.thread_strategy = thread_strategy;
    }

    pub fn set_has_reload(&mut self, has_reload: bool) {
        self.has_reload = has_reload;
    }

    pub fn set_enable_js_runtime(&mut self, enable: bool) {
        self.enable_js_runtime = enable;
    }

    /// Switch the setup pipeline to server-side-rendered bookkeeping.
    pub fn enable_ssr(&mut self, url: &str, data_size: u64) {
        self.ssr = Some(SsrTiming {
            url: url.to_string(),
            data_size,
            ..SsrTiming::default()
        });
    }

    // ---- getters ----

    pub fn init_timing(&self) -> &TimingMap {
        &self.init_timing
    }

    pub fn extra_timing(&self) -> &TimingMap {
        &self.extra_timing
    }

    pub fn setup_timing(&self) -> &TimingMap {
        &self.setup_timing
    }

    pub fn metrics(&self) -> &TimingMap {
        &self.metrics
    }

    pub fn update_timing(&self, flag: &str) -> Option<&TimingMap> {
        self.update_timing.get(flag)
    }

    pub fn pipeline_timing(&self, pipeline_id: &str) -> Option<&TimingMap> {
        self.pipeline_timing.get(pipeline_id)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_reload(&self) -> bool {
        self.has_reload
    }

    pub fn thread_strategy(&self) -> u32 {
        self.thread_strategy
    }

    pub fn enable_js_runtime(&self) -> bool {
        self.enable_js_runtime
    }

    // ---- readiness ----

    pub fn is_setup_ready(&self, pipeline_id: &str) -> bool {
        let Some(timing) = self.pipeline_timing.get(pipeline_id) else {
            return false;
        };
        timing.has_all(&SETUP_READY_KEYS)
            && (!self.enable_js_runtime || timing.contains(legacy::LOAD_APP_END))
    }

    pub fn is_update_ready(&self, pipeline_id: &str) -> bool {
        self.pipeline_timing
            .get(pipeline_id)
            .is_some_and(|timing| timing.has_all(&UPDATE_READY_KEYS))
    }

    // ---- dispatch preparation ----

    /// Freeze the setup snapshot and derive the setup metrics.
    pub fn prepare_before_dispatch_setup(&mut self, pipeline_id: &str) {
        let Some(timing) = self.pipeline_timing.get(pipeline_id) else {
            return;
        };
        self.setup_timing = timing.clone();
        self.setup_timing.merge(&self.init_timing);
        if self.ssr.is_some() {
            self.prepare_ssr_metrics();
        }

        let Some(draw_end) = self.setup_timing.get(legacy::DRAW_END) else {
            return;
        };
        let load_app_end = self.setup_timing.get(legacy::LOAD_APP_END).unwrap_or(0);
        let interactive = draw_end.max(load_app_end);

        let load_template_start = self.setup_timing.get(legacy::LOAD_TEMPLATE_START);
        set_duration(&mut self.metrics, legacy::LYNX_FCP, draw_end, load_template_start);
        set_duration(&mut self.metrics, legacy::LYNX_TTI, interactive, load_template_start);

        let prepare_template_start = self.extra_timing.get(keys::PREPARE_TEMPLATE_START);
        set_duration(&mut self.metrics, legacy::FCP, draw_end, prepare_template_start);
        set_duration(&mut self.metrics, legacy::TTI, interactive, prepare_template_start);

        let open_time = self.extra_timing.get(keys::OPEN_TIME);
        set_duration(&mut self.metrics, legacy::TOTAL_FCP, draw_end, open_time);
        set_duration(&mut self.metrics, legacy::TOTAL_TTI, interactive, open_time);
    }

    fn prepare_ssr_metrics(&mut self) {
        let load_app_end = self.setup_timing.get(legacy::LOAD_APP_END).unwrap_or(0);
        let Some(ssr) = self.ssr.as_mut() else {
            return;
        };
        let start = ssr.render_page_timing.get(legacy::RENDER_PAGE_START_SSR);
        let Some(draw_end) = ssr.render_page_timing.get(legacy::DRAW_END_SSR) else {
            return;
        };
        set_duration(&mut ssr.metrics, legacy::LYNX_FCP_SSR, draw_end, start);
        set_duration(
            &mut ssr.metrics,
            legacy::LYNX_TTI_SSR,
            draw_end.max(load_app_end),
            start,
        );
    }

    /// Freeze the update snapshot for `flag` and derive FMP metrics.
    pub fn prepare_before_dispatch_update(&mut self, pipeline_id: &str, flag: &str) {
        let Some(timing) = self.pipeline_timing.get(pipeline_id) else {
            tracing::error!(target: "timing", pipeline_id, "pipeline missing at update dispatch");
            return;
        };
        let update = self
            .update_timing
            .entry(flag.to_string())
            .or_insert_with(|| timing.clone());
        if let Some(flagged) = self.timing_with_flag.remove(flag) {
            update.merge(&flagged);
        }

        if flag != FMP_FLAG {
            return;
        }
        let Some(draw_end) = update.get(legacy::DRAW_END) else {
            return;
        };
        let load_template_start = self.setup_timing.get(legacy::LOAD_TEMPLATE_START);
        set_duration(&mut self.metrics, legacy::LYNX_ACTUAL_FMP, draw_end, load_template_start);
        let prepare_template_start = self.extra_timing.get(keys::PREPARE_TEMPLATE_START);
        set_duration(&mut self.metrics, legacy::ACTUAL_FMP, draw_end, prepare_template_start);
        let open_time = self.extra_timing.get(keys::OPEN_TIME);
        set_duration(&mut self.metrics, legacy::TOTAL_ACTUAL_FMP, draw_end, open_time);
    }

    // ---- snapshots ----

    /// Deep snapshot of everything reported so far.
    pub fn all_timing_info(&self, as_millis: bool) -> Value {
        let update_timings: Map<String, Value> = self
            .update_timing
            .iter()
            .map(|(flag, timing)| (flag.clone(), timing.to_value(as_millis)))
            .collect();

        let mut snapshot = Map::new();
        snapshot.insert(legacy::SETUP_TIMING.into(), self.setup_timing.to_value(as_millis));
        snapshot.insert(legacy::EXTRA_TIMING.into(), self.extra_timing.to_value(as_millis));
        snapshot.insert(legacy::METRICS.into(), self.metrics.to_value(as_millis));
        snapshot.insert(legacy::UPDATE_TIMINGS.into(), Value::Object(update_timings));

        if let Some(ssr) = &self.ssr {
            snapshot.insert(legacy::SSR_METRICS.into(), ssr.metrics.to_value(as_millis));
            snapshot.insert(
                legacy::SSR_RENDER_PAGE_TIMING.into(),
                ssr.render_page_timing.to_value(as_millis),
            );
            snapshot.insert(
                legacy::SSR_EXTRA_INFO.into(),
                json!({ legacy::URL: ssr.url, legacy::SSR_DATA_SIZE: ssr.data_size }),
            );
        }

        snapshot.insert(legacy::URL.into(), Value::from(self.url.clone()));
        snapshot.insert(legacy::THREAD_STRATEGY.into(), Value::from(self.thread_strategy));
        snapshot.insert(legacy::HAS_RELOAD.into(), Value::from(self.has_reload));
        Value::Object(snapshot)
    }

    /// `{flag: timing}` for one dispatched flag; empty when not dispatched.
    pub fn update_timing_info(&self, flag: &str, as_millis: bool) -> Value {
        let mut snapshot = Map::new();
        match self.update_timing.get(flag) {
            Some(timing) => {
                snapshot.insert(flag.to_string(), timing.to_value(as_millis));
            }
            None => tracing::error!(target: "timing", flag, "update flag not ready to report"),
        }
        Value::Object(snapshot)
    }

    // ---- reset ----

    /// Drop every pipeline-scoped record, keeping init and extra timings.
    pub fn clear_pipeline_timing_info(&mut self) {
        self.pipeline_timing.clear();
        self.timing_with_flag.clear();
        self.setup_timing.clear();
        self.update_timing.clear();
        self.metrics.clear();
        if let Some(ssr) = self.ssr.as_mut() {
            ssr.render_page_timing.clear();
            ssr.metrics.clear();
        }
    }

    pub fn clear_extra_timing_info(&mut self) {
        self.extra_timing.clear();
    }

    pub fn release_pipeline(&mut self, pipeline_id: &str) {
        self.pipeline_timing.remove(pipeline_id);
    }
}
