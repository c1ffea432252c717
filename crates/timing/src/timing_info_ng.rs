//! Entry-oriented timing record.
//!
//! Getters here are pull-on-demand: each returns `Some(entry)` only when the
//! entry's readiness predicate holds and the entry carries something not
//! reported before. The handler decides when and where to send.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::constants::{entry, keys, origins};
use crate::pipeline::{PipelineId, PipelineOrigin};
use crate::sender::PerformanceEntry;
use crate::timing_map::{us_to_ms, TimestampUs, TimingMap};

const PIPELINE_READY_KEYS: [&str; 4] = [
    keys::PAINT_END,
    keys::LAYOUT_END,
    keys::LAYOUT_UI_OPERATION_EXECUTE_END,
    keys::PIPELINE_END,
];

const LYNXVIEW_KEYS: [&str; 2] = [keys::CREATE_LYNX_START, keys::CREATE_LYNX_END];
const BACKGROUND_RUNTIME_KEYS: [&str; 2] = [keys::LOAD_CORE_START, keys::LOAD_CORE_END];

const FCP_METRICS: [&str; 3] = [entry::LYNX_FCP, entry::FCP, entry::TOTAL_FCP];
const FMP_METRICS: [&str; 3] = [entry::LYNX_ACTUAL_FMP, entry::ACTUAL_FMP, entry::TOTAL_ACTUAL_FMP];
const TTI_METRICS: [&str; 3] = [entry::LYNX_TTI, entry::TTI, entry::TOTAL_TTI];

/// One derived duration, cached once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricValue {
    pub name: &'static str,
    pub start_name: &'static str,
    pub start_us: TimestampUs,
    pub end_name: &'static str,
    pub end_us: TimestampUs,
}

impl MetricValue {
    pub fn duration_us(&self) -> TimestampUs {
        self.end_us - self.start_us
    }

    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        value.insert(entry::NAME.into(), Value::from(self.name));
        value.insert(entry::START_TIMESTAMP_NAME.into(), Value::from(self.start_name));
        value.insert(entry::START_TIMESTAMP.into(), Value::from(us_to_ms(self.start_us)));
        value.insert(entry::END_TIMESTAMP_NAME.into(), Value::from(self.end_name));
        value.insert(entry::END_TIMESTAMP.into(), Value::from(us_to_ms(self.end_us)));
        value.insert(entry::DURATION.into(), Value::from(us_to_ms(self.duration_us())));
        Value::Object(value)
    }
}

fn tag(mut entry_value: PerformanceEntry, entry_type: &str, name: &str) -> PerformanceEntry {
    entry_value.insert(entry::ENTRY_TYPE.into(), Value::from(entry_type));
    entry_value.insert(entry::NAME.into(), Value::from(name));
    entry_value
}

fn sub_timing_value(
    timing: Option<&TimingMap>,
    extra: Option<&BTreeMap<String, String>>,
) -> Value {
    let mut value = timing.map(|timing| timing.to_object(false)).unwrap_or_default();
    for (key, info) in extra.into_iter().flatten() {
        value.insert(key.clone(), Value::from(info.as_str()));
    }
    Value::Object(value)
}

/// Pipeline-id keyed timing aggregate behind the performance entries.
#[derive(Debug, Clone)]
pub struct TimingInfoNg {
    pipeline_timing: HashMap<PipelineId, TimingMap>,
    framework_timing: HashMap<PipelineId, TimingMap>,
    framework_extra: HashMap<PipelineId, BTreeMap<String, String>>,
    host_platform_timing: HashMap<PipelineId, TimingMap>,
    host_platform_extra: HashMap<PipelineId, BTreeMap<String, String>>,
    init_timing: TimingMap,
    emitted_init_entries: HashSet<&'static str>,
    metrics: HashMap<&'static str, MetricValue>,
    origins: HashMap<PipelineId, PipelineOrigin>,
    load_bundle_pipeline_id: Option<PipelineId>,
    enable_background_runtime: bool,
    enable_engine_callback: bool,
}

impl Default for TimingInfoNg {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingInfoNg {
    pub fn new() -> Self {
        Self {
            pipeline_timing: HashMap::new(),
            framework_timing: HashMap::new(),
            framework_extra: HashMap::new(),
            host_platform_timing: HashMap::new(),
            host_platform_extra: HashMap::new(),
            init_timing: TimingMap::new(),
            emitted_init_entries: HashSet::new(),
            metrics: HashMap::new(),
            origins: HashMap::new(),
            load_bundle_pipeline_id: None,
            enable_background_runtime: true,
            enable_engine_callback: false,
        }
    }

    // ---- configuration ----

    pub fn set_enable_background_runtime(&mut self, enable: bool) {
        self.enable_background_runtime = enable;
    }

    pub fn enable_background_runtime(&self) -> bool {
        self.enable_background_runtime
    }

    pub fn set_enable_engine_callback(&mut self, enable: bool) {
        self.enable_engine_callback = enable;
    }

    pub fn enable_engine_callback(&self) -> bool {
        self.enable_engine_callback
    }

    // ---- pipeline identity ----

    pub fn bind_origin(&mut self, pipeline_id: &str, origin: &str) {
        self.origins
            .insert(pipeline_id.to_string(), origin.to_string());
    }

    pub fn origin(&self, pipeline_id: &str) -> Option<&str> {
        self.origins.get(pipeline_id).map(String::as_str)
    }

    pub fn set_load_bundle_pipeline_id(&mut self, pipeline_id: &str) {
        self.load_bundle_pipeline_id = Some(pipeline_id.to_string());
    }

    pub fn load_bundle_pipeline_id(&self) -> Option<&str> {
        self.load_bundle_pipeline_id.as_deref()
    }

    pub fn is_load_bundle_pipeline(&self, pipeline_id: &str) -> bool {
        self.load_bundle_pipeline_id.as_deref() == Some(pipeline_id)
    }

    // ---- setters ----

    pub fn set_pipeline_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) -> bool {
        self.pipeline_timing
            .entry(pipeline_id.to_string())
            .or_default()
            .set(key, timestamp)
    }

    pub fn set_init_timing(&mut self, key: &str, timestamp: TimestampUs) -> bool {
        self.init_timing.set(key, timestamp)
    }

    pub fn set_framework_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) -> bool {
        self.framework_timing
            .entry(pipeline_id.to_string())
            .or_default()
            .set(key, timestamp)
    }

    /// Attach a string such as `dsl` or `stage` to the framework sub-map.
    /// The first value for a key wins.
    pub fn set_framework_extra_timing_info(
        &mut self,
        pipeline_id: &str,
        key: &str,
        value: &str,
    ) -> bool {
        insert_extra(&mut self.framework_extra, pipeline_id, key, value)
    }

    pub fn set_host_platform_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) -> bool {
        self.host_platform_timing
            .entry(pipeline_id.to_string())
            .or_default()
            .set(key, timestamp)
    }

    pub fn set_host_platform_timing_extra_info(
        &mut self,
        pipeline_id: &str,
        key: &str,
        value: &str,
    ) -> bool {
        insert_extra(&mut self.host_platform_extra, pipeline_id, key, value)
    }

    // ---- getters ----

    pub fn pipeline_timing(&self, pipeline_id: &str) -> Option<&TimingMap> {
        self.pipeline_timing.get(pipeline_id)
    }

    pub fn init_timing(&self) -> &TimingMap {
        &self.init_timing
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipeline_timing.len()
    }

    // ---- reset ----

    pub fn clear_pipeline_timing_info(&mut self) {
        self.pipeline_timing.clear();
        self.framework_timing.clear();
        self.framework_extra.clear();
        self.host_platform_timing.clear();
        self.host_platform_extra.clear();
        self.metrics.clear();
        self.origins.clear();
        self.load_bundle_pipeline_id = None;
    }

    /// Forget container keys so a reloaded container reports again.
    pub fn clear_container_timing_info(&mut self) {
        for key in keys::CONTAINER_KEYS {
            self.init_timing.erase(key);
        }
        self.emitted_init_entries.remove(entry::NAME_CONTAINER);
    }

    pub fn release_pipeline(&mut self, pipeline_id: &str) {
        self.pipeline_timing.remove(pipeline_id);
        self.framework_timing.remove(pipeline_id);
        self.framework_extra.remove(pipeline_id);
        self.host_platform_timing.remove(pipeline_id);
        self.host_platform_extra.remove(pipeline_id);
        self.origins.remove(pipeline_id);
    }

    // ---- init entries ----

    pub fn init_container_entry(&mut self, current_key: &str) -> Option<PerformanceEntry> {
        self.init_entry(
            current_key,
            &keys::CONTAINER_KEYS,
            &[keys::OPEN_TIME, keys::PREPARE_TEMPLATE_END],
            entry::NAME_CONTAINER,
        )
    }

    pub fn init_lynxview_entry(&mut self, current_key: &str) -> Option<PerformanceEntry> {
        self.init_entry(
            current_key,
            &LYNXVIEW_KEYS,
            &[keys::CREATE_LYNX_END],
            entry::NAME_LYNXVIEW,
        )
    }

    pub fn init_background_runtime_entry(
        &mut self,
        current_key: &str,
    ) -> Option<PerformanceEntry> {
        self.init_entry(
            current_key,
            &BACKGROUND_RUNTIME_KEYS,
            &[keys::LOAD_CORE_END],
            entry::NAME_BACKGROUND_RUNTIME,
        )
    }

    fn init_entry(
        &mut self,
        current_key: &str,
        pick_keys: &[&str],
        ready_keys: &[&str],
        name: &'static str,
    ) -> Option<PerformanceEntry> {
        if !pick_keys.contains(&current_key)
            || !self.init_timing.has_all(ready_keys)
            || self.emitted_init_entries.contains(name)
        {
            return None;
        }
        self.emitted_init_entries.insert(name);
        let picked = self.init_timing.sub_map(pick_keys).to_object(false);
        Some(tag(picked, entry::TYPE_INIT, name))
    }

    // ---- pipeline entry ----

    /// Pipeline entry for `pipeline_id` once every end key its origin needs
    /// is present.
    pub fn pipeline_entry(&self, pipeline_id: &str) -> Option<PerformanceEntry> {
        let timing = self.pipeline_timing.get(pipeline_id)?;
        if !timing.has_all(&PIPELINE_READY_KEYS) {
            return None;
        }
        let origin = self.origin(pipeline_id).unwrap_or(entry::TYPE_PIPELINE);
        let bundle_keys: &[&str] = match origin {
            origins::LOAD_BUNDLE if self.enable_background_runtime => {
                &[keys::LOAD_BUNDLE_END, keys::LOAD_BACKGROUND_END]
            }
            origins::LOAD_BUNDLE => &[keys::LOAD_BUNDLE_END],
            origins::RELOAD_BUNDLE_FROM_NATIVE | origins::RELOAD_BUNDLE_FROM_BTS
                if self.enable_background_runtime =>
            {
                &[keys::RELOAD_BUNDLE_END, keys::RELOAD_BACKGROUND_END]
            }
            origins::RELOAD_BUNDLE_FROM_NATIVE | origins::RELOAD_BUNDLE_FROM_BTS => {
                &[keys::RELOAD_BUNDLE_END]
            }
            _ => &[],
        };
        if !timing.has_all(bundle_keys) {
            return None;
        }

        let mut value = timing.to_object(false);
        value.insert(
            entry::FRAMEWORK_RENDERING_TIMING.into(),
            sub_timing_value(
                self.framework_timing.get(pipeline_id),
                self.framework_extra.get(pipeline_id),
            ),
        );
        value.insert(
            entry::HOST_PLATFORM_TIMING.into(),
            sub_timing_value(
                self.host_platform_timing.get(pipeline_id),
                self.host_platform_extra.get(pipeline_id),
            ),
        );
        Some(tag(value, entry::TYPE_PIPELINE, origin))
    }

    // ---- metrics ----

    fn load_bundle_timing(&self) -> Option<&TimingMap> {
        let pipeline_id = self.load_bundle_pipeline_id.as_deref()?;
        self.pipeline_timing.get(pipeline_id)
    }

    /// `(bundle start key, background end key)` for the load-bundle pipeline.
    fn load_bundle_keys(&self) -> Option<(&'static str, &'static str)> {
        let origin = self
            .load_bundle_pipeline_id
            .as_deref()
            .and_then(|pipeline_id| self.origin(pipeline_id));
        match origin {
            Some(origins::LOAD_BUNDLE) => Some((keys::LOAD_BUNDLE_START, keys::LOAD_BACKGROUND_END)),
            Some(origins::RELOAD_BUNDLE_FROM_NATIVE | origins::RELOAD_BUNDLE_FROM_BTS) => {
                Some((keys::RELOAD_BUNDLE_START, keys::RELOAD_BACKGROUND_END))
            }
            _ => {
                tracing::debug!(target: "timing", "metrics need a loadBundle or reloadBundle pipeline");
                None
            }
        }
    }

    fn update_metric(
        &mut self,
        name: &'static str,
        start_name: &'static str,
        end_name: &'static str,
        start_us: Option<TimestampUs>,
        end_us: TimestampUs,
    ) -> bool {
        let Some(start_us) = start_us else {
            return false;
        };
        if self.metrics.contains_key(name) {
            return false;
        }
        if start_us > end_us {
            tracing::error!(target: "timing", metric = name, start_us, end_us, "metric ends before it starts");
            return false;
        }
        self.metrics.insert(
            name,
            MetricValue {
                name,
                start_name,
                start_us,
                end_name,
                end_us,
            },
        );
        true
    }

    /// Compute the three variants of one metric ending at `end_us`.
    fn update_metric_family(
        &mut self,
        names: [&'static str; 3],
        end_name: &'static str,
        end_us: TimestampUs,
    ) -> bool {
        let mut updated = false;
        if let Some((start_name, _)) = self.load_bundle_keys() {
            let start_us = self
                .load_bundle_timing()
                .and_then(|timing| timing.get(start_name));
            updated |= self.update_metric(names[0], start_name, end_name, start_us, end_us);
        }
        let prepare_template_start = self.init_timing.get(keys::PREPARE_TEMPLATE_START);
        updated |= self.update_metric(
            names[1],
            keys::PREPARE_TEMPLATE_START,
            end_name,
            prepare_template_start,
            end_us,
        );
        let open_time = self.init_timing.get(keys::OPEN_TIME);
        updated |= self.update_metric(names[2], keys::OPEN_TIME, end_name, open_time, end_us);
        updated
    }

    fn metric_entry(&self, names: &[&str], name: &str) -> PerformanceEntry {
        let metrics = names
            .iter()
            .filter_map(|metric| self.metrics.get(*metric))
            .map(|metric| (metric.name.to_string(), metric.to_value()))
            .collect();
        tag(metrics, entry::TYPE_METRIC, name)
    }

    /// FCP entry, computed from the load-bundle pipeline's `paint_end`.
    pub fn metric_fcp_entry(&mut self) -> Option<PerformanceEntry> {
        let paint_end = self.load_bundle_timing()?.get(keys::PAINT_END)?;
        self.update_metric_family(FCP_METRICS, keys::PAINT_END, paint_end)
            .then(|| self.metric_entry(&FCP_METRICS, entry::NAME_FCP))
    }

    /// FMP entry from the flagged pipeline's `paint_end`.
    ///
    /// Without a pipeline the previously captured FMP end is reused, so init
    /// timings arriving late can still complete the remaining variants.
    pub fn metric_fmp_entry(&mut self, pipeline_id: Option<&str>) -> Option<PerformanceEntry> {
        let paint_end = match pipeline_id {
            Some(pipeline_id) => self.pipeline_timing.get(pipeline_id)?.get(keys::PAINT_END)?,
            None => self.metrics.get(entry::LYNX_ACTUAL_FMP)?.end_us,
        };
        self.update_metric_family(FMP_METRICS, keys::PAINT_END, paint_end)
            .then(|| self.metric_entry(&FMP_METRICS, entry::NAME_FMP))
    }

    /// TTI entry: the later of first paint and background-runtime readiness.
    pub fn metric_tti_entry(&mut self) -> Option<PerformanceEntry> {
        let (_, background_end_key) = self.load_bundle_keys()?;
        let timing = self.load_bundle_timing()?;
        let paint_end = timing.get(keys::PAINT_END)?;
        let background_end = timing.get(background_end_key);
        if self.enable_background_runtime && background_end.is_none() {
            return None;
        }
        let (end_name, end_us) = match background_end {
            Some(background_end) if background_end > paint_end => {
                (background_end_key, background_end)
            }
            _ => (keys::PAINT_END, paint_end),
        };
        self.update_metric_family(TTI_METRICS, end_name, end_us)
            .then(|| self.metric_entry(&TTI_METRICS, entry::NAME_TTI))
    }
}

fn insert_extra(
    target: &mut HashMap<PipelineId, BTreeMap<String, String>>,
    pipeline_id: &str,
    key: &str,
    value: &str,
) -> bool {
    let extra = target.entry(pipeline_id.to_string()).or_default();
    if extra.contains_key(key) {
        return false;
    }
    extra.insert(key.to_string(), value.to_string());
    true
}
