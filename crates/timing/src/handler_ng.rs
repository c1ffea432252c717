//! Dispatcher of performance entries built by [`TimingInfoNg`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::constants::{entry, keys, origins, FMP_FLAG};
use crate::pipeline::{PipelineId, TimingFlag};
use crate::sender::{EventTypes, PerformanceEntry, PerformanceEventSender};
use crate::timing_info_ng::TimingInfoNg;
use crate::timing_map::TimestampUs;

/// Value recorded as `hostPlatformType` for every started pipeline.
pub const HOST_PLATFORM_TYPE: &str = std::env::consts::OS;

/// Owns the entry-oriented timing state and sends finished entries.
///
/// Entries are held back until the scripting side can receive them: the
/// background runtime finished loading, or, with the background runtime
/// disabled, the bundle finished loading.
pub struct TimingHandlerNg {
    info: TimingInfoNg,
    sender: Option<Arc<dyn PerformanceEventSender>>,
    timing_flags: HashMap<PipelineId, Vec<TimingFlag>>,
    dispatched_flags: HashSet<TimingFlag>,
    dispatched_pipelines: HashSet<PipelineId>,
    pending_entries: Vec<PerformanceEntry>,
    background_runtime_ready: bool,
    main_thread_runtime_ready: bool,
}

impl TimingHandlerNg {
    pub fn new(sender: Option<Arc<dyn PerformanceEventSender>>) -> Self {
        Self {
            info: TimingInfoNg::new(),
            sender,
            timing_flags: HashMap::new(),
            dispatched_flags: HashSet::new(),
            dispatched_pipelines: HashSet::new(),
            pending_entries: Vec::new(),
            background_runtime_ready: false,
            main_thread_runtime_ready: false,
        }
    }

    pub fn info(&self) -> &TimingInfoNg {
        &self.info
    }

    pub fn set_enable_background_runtime(&mut self, enable: bool) {
        self.info.set_enable_background_runtime(enable);
    }

    pub fn set_enable_engine_callback(&mut self, enable: bool) {
        self.info.set_enable_engine_callback(enable);
    }

    pub fn has_dispatched_flag(&self, flag: &str) -> bool {
        self.dispatched_flags.contains(flag)
    }

    pub fn pending_entry_count(&self) -> usize {
        self.pending_entries.len()
    }

    pub fn on_pipeline_start(&mut self, pipeline_id: &str, origin: &str) {
        self.info.bind_origin(pipeline_id, origin);
        self.info.set_host_platform_timing_extra_info(
            pipeline_id,
            entry::HOST_PLATFORM_TYPE,
            HOST_PLATFORM_TYPE,
        );
        if origins::is_load_bundle_origin(origin) {
            self.info.set_load_bundle_pipeline_id(pipeline_id);
        }
    }

    pub fn bind_pipeline_id_with_timing_flag(&mut self, pipeline_id: &str, flag: &str) {
        if pipeline_id.is_empty() || flag.is_empty() {
            return;
        }
        self.timing_flags
            .entry(pipeline_id.to_string())
            .or_default()
            .push(flag.to_string());

        let painted = self
            .info
            .pipeline_timing(pipeline_id)
            .is_some_and(|timing| timing.contains(keys::PAINT_END));
        if flag == FMP_FLAG && painted {
            self.dispatch_metric_fmp_entry(Some(pipeline_id));
        }
    }

    /// Record an engine timing. An empty `pipeline_id` marks an init timing.
    pub fn set_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid timing key or timestamp");
            return;
        }
        if pipeline_id.is_empty() {
            if self.info.set_init_timing(key, timestamp) {
                self.dispatch_if_needed(key, None);
            }
        } else {
            self.process_pipeline_timing(key, timestamp, pipeline_id);
        }
    }

    fn process_pipeline_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        if self.info.set_pipeline_timing(key, timestamp, pipeline_id) {
            match key {
                keys::LOAD_BACKGROUND_END | keys::RELOAD_BACKGROUND_END => {
                    self.background_runtime_ready = true;
                    self.flush_pending_entries();
                }
                keys::LOAD_BUNDLE_END | keys::RELOAD_BUNDLE_END => {
                    self.main_thread_runtime_ready = true;
                    self.flush_pending_entries();
                }
                _ => {}
            }
            self.dispatch_if_needed(key, Some(pipeline_id));
        }
        if key == keys::PAINT_END {
            self.process_pipeline_timing(keys::PIPELINE_END, timestamp, pipeline_id);
        }
    }

    pub fn set_framework_timing(&mut self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid framework timing");
            return;
        }
        self.info.set_framework_timing(key, timestamp, pipeline_id);
    }

    pub fn set_framework_extra_timing_info(&mut self, pipeline_id: &str, key: &str, value: &str) {
        self.info.set_framework_extra_timing_info(pipeline_id, key, value);
    }

    pub fn set_host_platform_timing(
        &mut self,
        key: &str,
        timestamp: TimestampUs,
        pipeline_id: &str,
    ) {
        if key.is_empty() || timestamp == 0 {
            tracing::error!(target: "timing", key, timestamp, "invalid host platform timing");
            return;
        }
        self.info.set_host_platform_timing(key, timestamp, pipeline_id);
    }

    pub fn set_host_platform_timing_extra_info(&mut self, pipeline_id: &str, key: &str, value: &str) {
        self.info
            .set_host_platform_timing_extra_info(pipeline_id, key, value);
    }

    pub fn clear_pipeline_timing_info(&mut self) {
        self.info.clear_pipeline_timing_info();
        self.timing_flags.clear();
        self.dispatched_flags.clear();
        self.dispatched_pipelines.clear();
        self.pending_entries.clear();
        self.background_runtime_ready = false;
        self.main_thread_runtime_ready = false;
    }

    pub fn clear_container_timing_info(&mut self) {
        self.info.clear_container_timing_info();
    }

    pub fn release_pipeline_timing(&mut self, pipeline_id: &str) {
        self.timing_flags.remove(pipeline_id);
        self.info.release_pipeline(pipeline_id);
    }

    // ---- dispatch ----

    fn dispatch_if_needed(&mut self, key: &str, pipeline_id: Option<&str>) {
        match pipeline_id {
            Some(pipeline_id) => self.dispatch_pipeline_entry(pipeline_id),
            None => {
                let init_entries = [
                    self.info.init_container_entry(key),
                    self.info.init_lynxview_entry(key),
                    self.info.init_background_runtime_entry(key),
                ];
                for init in init_entries.into_iter().flatten() {
                    self.send_or_pend(init);
                }
            }
        }

        let for_load_bundle =
            pipeline_id.map_or(true, |pipeline_id| self.info.is_load_bundle_pipeline(pipeline_id));
        if for_load_bundle {
            if let Some(fcp) = self.info.metric_fcp_entry() {
                self.send_or_pend(fcp);
            }
            if let Some(tti) = self.info.metric_tti_entry() {
                self.send_or_pend(tti);
            }
        }

        let for_fmp = pipeline_id.map_or(true, |pipeline_id| self.is_fmp_pipeline(pipeline_id));
        if for_fmp {
            self.dispatch_metric_fmp_entry(pipeline_id);
        }
    }

    fn is_fmp_pipeline(&self, pipeline_id: &str) -> bool {
        self.timing_flags
            .get(pipeline_id)
            .is_some_and(|flags| flags.iter().any(|flag| flag == FMP_FLAG))
    }

    fn dispatch_metric_fmp_entry(&mut self, pipeline_id: Option<&str>) {
        if let Some(fmp) = self.info.metric_fmp_entry(pipeline_id) {
            self.send_or_pend(fmp);
        }
    }

    /// Send the pipeline entry once per bound flag, or once for a flagless
    /// load-bundle pipeline. Other pipelines are released once ready.
    fn dispatch_pipeline_entry(&mut self, pipeline_id: &str) {
        let Some(pipeline_entry) = self.info.pipeline_entry(pipeline_id) else {
            return;
        };
        let is_load_bundle = self.info.is_load_bundle_pipeline(pipeline_id);

        match self.timing_flags.get(pipeline_id).cloned() {
            Some(flags) => {
                for flag in flags {
                    if self.dispatched_flags.contains(&flag) {
                        continue;
                    }
                    let mut flagged = pipeline_entry.clone();
                    flagged.insert(entry::IDENTIFIER.into(), Value::from(flag.as_str()));
                    self.send_or_pend(flagged);
                    self.dispatched_flags.insert(flag);
                }
            }
            None if is_load_bundle => {
                if self.dispatched_pipelines.insert(pipeline_id.to_string()) {
                    self.send_or_pend(pipeline_entry);
                }
            }
            None => {}
        }

        if !is_load_bundle {
            self.release_pipeline_timing(pipeline_id);
        }
    }

    fn ready_to_dispatch(&self) -> bool {
        self.background_runtime_ready
            || (!self.info.enable_background_runtime() && self.main_thread_runtime_ready)
    }

    fn send_or_pend(&mut self, performance_entry: PerformanceEntry) {
        if self.sender.is_none() {
            // Nothing would ever drain the queue.
            return;
        }
        if self.ready_to_dispatch() {
            self.send(performance_entry);
        } else {
            self.pending_entries.push(performance_entry);
        }
    }

    fn flush_pending_entries(&mut self) {
        if !self.ready_to_dispatch() {
            return;
        }
        for pending in std::mem::take(&mut self.pending_entries) {
            self.send(pending);
        }
    }

    fn event_types(&self) -> EventTypes {
        let mut event_types = EventTypes::PLATFORM;
        if self.info.enable_engine_callback() {
            event_types |= EventTypes::MTS;
        }
        if self.info.enable_background_runtime() {
            event_types |= EventTypes::BTS;
        }
        event_types
    }

    fn send(&self, performance_entry: PerformanceEntry) {
        let Some(sender) = &self.sender else {
            return;
        };
        tracing::trace!(
            target: "timing",
            entry_type = ?performance_entry.get(entry::ENTRY_TYPE),
            name = ?performance_entry.get(entry::NAME),
            "performance entry"
        );
        sender.on_performance_event(performance_entry, self.event_types());
    }
}

impl std::fmt::Debug for TimingHandlerNg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingHandlerNg")
            .field("info", &self.info)
            .field("has_sender", &self.sender.is_some())
            .field("pending_entries", &self.pending_entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        entries: Mutex<Vec<(PerformanceEntry, EventTypes)>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|(entry_value, _)| {
                    format!(
                        "{}/{}",
                        entry_value[entry::ENTRY_TYPE].as_str().unwrap_or_default(),
                        entry_value[entry::NAME].as_str().unwrap_or_default()
                    )
                })
                .collect()
        }
    }

    impl PerformanceEventSender for Recorder {
        fn on_performance_event(&self, entry_value: PerformanceEntry, event_types: EventTypes) {
            self.entries.lock().unwrap().push((entry_value, event_types));
        }
    }

    fn handler() -> (TimingHandlerNg, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let handler = TimingHandlerNg::new(Some(recorder.clone() as Arc<dyn PerformanceEventSender>));
        (handler, recorder)
    }

    fn finish_update(handler: &mut TimingHandlerNg, pipeline_id: &str) {
        handler.set_timing(keys::LAYOUT_END, 10, pipeline_id);
        handler.set_timing(keys::LAYOUT_UI_OPERATION_EXECUTE_END, 20, pipeline_id);
        handler.set_timing(keys::PAINT_END, 30, pipeline_id);
    }

    #[test]
    fn test_entries_wait_for_background_runtime() {
        let (mut handler, recorder) = handler();
        handler.set_timing(keys::CREATE_LYNX_END, 100, "");
        assert_eq!(handler.pending_entry_count(), 1);
        assert!(recorder.names().is_empty());

        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BACKGROUND_END, 200, "L");
        assert_eq!(recorder.names(), vec!["init/lynxview"]);
        assert_eq!(handler.pending_entry_count(), 0);
    }

    #[test]
    fn test_entries_without_sender_are_not_queued() {
        let mut handler = TimingHandlerNg::new(None);
        handler.set_timing(keys::CREATE_LYNX_END, 100, "");
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        for index in 0..20 {
            let pipeline_id = format!("U{index}");
            handler.on_pipeline_start(&pipeline_id, "updateTriggeredByBts");
            handler.bind_pipeline_id_with_timing_flag(&pipeline_id, &format!("flag{index}"));
            finish_update(&mut handler, &pipeline_id);
        }
        assert_eq!(handler.pending_entry_count(), 0);
    }

    #[test]
    fn test_bundle_end_suffices_without_background_runtime() {
        let (mut handler, recorder) = handler();
        handler.set_enable_background_runtime(false);
        handler.set_timing(keys::LOAD_CORE_END, 100, "");
        handler.on_pipeline_start("R", origins::RELOAD_BUNDLE_FROM_NATIVE);
        handler.set_timing(keys::RELOAD_BUNDLE_END, 200, "R");
        assert_eq!(recorder.names(), vec!["init/backgroundRuntime"]);
        let (_, event_types) = recorder.entries.lock().unwrap()[0].clone();
        assert_eq!(event_types, EventTypes::PLATFORM);
    }

    #[test]
    fn test_paint_end_synthesizes_pipeline_end() {
        let (mut handler, _recorder) = handler();
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::PAINT_END, 500, "L");
        let timing = handler.info().pipeline_timing("L").unwrap();
        assert_eq!(timing.get(keys::PIPELINE_END), Some(500));
    }

    #[test]
    fn test_flagged_pipeline_entry_per_flag() {
        let (mut handler, recorder) = handler();
        handler.set_enable_engine_callback(true);
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BACKGROUND_END, 1, "L");

        handler.on_pipeline_start("U", "updateTriggeredByBts");
        handler.bind_pipeline_id_with_timing_flag("U", "a");
        handler.bind_pipeline_id_with_timing_flag("U", "b");
        finish_update(&mut handler, "U");

        let entries = recorder.entries.lock().unwrap().clone();
        let identifiers: Vec<_> = entries
            .iter()
            .filter_map(|(entry_value, _)| entry_value.get(entry::IDENTIFIER).cloned())
            .collect();
        assert_eq!(identifiers, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(entries[0].1, EventTypes::ALL);
        assert!(entries[0].0[entry::HOST_PLATFORM_TIMING]
            .get(entry::HOST_PLATFORM_TYPE)
            .is_some());
        assert!(handler.has_dispatched_flag("a"));
        assert!(handler.info().pipeline_timing("U").is_none());

        handler.on_pipeline_start("V", "updateTriggeredByBts");
        handler.bind_pipeline_id_with_timing_flag("V", "a");
        finish_update(&mut handler, "V");
        assert_eq!(recorder.entries.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_flagless_update_is_released_silently() {
        let (mut handler, recorder) = handler();
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BACKGROUND_END, 1, "L");
        handler.on_pipeline_start("U", "updateTriggeredByNative");
        finish_update(&mut handler, "U");
        assert!(recorder.names().is_empty());
        assert!(handler.info().pipeline_timing("U").is_none());
    }

    #[test]
    fn test_late_fmp_binding() {
        let (mut handler, recorder) = handler();
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BUNDLE_START, 1_000, "L");
        handler.set_timing(keys::LOAD_BACKGROUND_END, 1_100, "L");
        handler.set_timing(keys::PAINT_END, 3_000, "L");
        let before = recorder.names();
        assert!(!before.contains(&"metric/fmp".to_string()));

        handler.bind_pipeline_id_with_timing_flag("L", FMP_FLAG);
        assert_eq!(recorder.names().last().map(String::as_str), Some("metric/fmp"));
    }

    #[test]
    fn test_clear_resets_readiness_and_flags() {
        let (mut handler, recorder) = handler();
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BACKGROUND_END, 1, "L");
        handler.on_pipeline_start("U", "update");
        handler.bind_pipeline_id_with_timing_flag("U", "a");
        finish_update(&mut handler, "U");
        assert!(handler.has_dispatched_flag("a"));

        handler.clear_pipeline_timing_info();
        assert!(!handler.has_dispatched_flag("a"));
        handler.set_timing(keys::CREATE_LYNX_END, 5, "");
        assert_eq!(handler.pending_entry_count(), 1);
        assert_eq!(recorder.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_load_bundle_entry_sent_once() {
        let (mut handler, recorder) = handler();
        handler.on_pipeline_start("L", origins::LOAD_BUNDLE);
        handler.set_timing(keys::LOAD_BUNDLE_END, 5, "L");
        handler.set_timing(keys::LOAD_BACKGROUND_END, 6, "L");
        finish_update(&mut handler, "L");
        handler.set_timing(keys::RESOLVE_END, 40, "L");

        let pipelines: Vec<_> = recorder
            .names()
            .into_iter()
            .filter(|name| name.starts_with("pipeline/"))
            .collect();
        assert_eq!(pipelines, vec!["pipeline/loadBundle"]);
    }
}
