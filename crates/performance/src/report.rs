//! Legacy timing report events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use timing::constants::{keys, legacy};
use timing::{us_to_ms, TimestampUs, TimingInfo, TimingMap};
use uuid::Uuid;

pub const SETUP_TIMING_EVENT: &str = "lynxsdk_setup_timing";
pub const UPDATE_TIMING_EVENT: &str = "lynxsdk_update_timing";

/// Start timestamp missing.
pub const DURATION_NO_START: f64 = -1.0;
/// End timestamp missing.
pub const DURATION_NO_END: f64 = -2.0;
/// Both timestamps missing.
pub const DURATION_NO_START_AND_END: f64 = -3.0;
/// Start after end.
pub const DURATION_NEGATIVE: f64 = -4.0;

/// A named event with flat properties, delivered to an event tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub event_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub props: BTreeMap<String, Value>,
}

impl ReportEvent {
    pub fn new(name: &str) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            timestamp: Utc::now(),
            props: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn set_prop(&mut self, key: &str, value: impl Into<Value>) {
        self.props.insert(key.to_string(), value.into());
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

/// Milliseconds between two timestamps, or a negative code naming what is
/// wrong with them.
pub fn calculate_duration(start: Option<TimestampUs>, end: Option<TimestampUs>) -> f64 {
    let start = start.filter(|ts| *ts > 0);
    let end = end.filter(|ts| *ts > 0);
    match (start, end) {
        (None, None) => DURATION_NO_START_AND_END,
        (None, Some(_)) => DURATION_NO_START,
        (Some(_), None) => DURATION_NO_END,
        (Some(start), Some(end)) if start > end => DURATION_NEGATIVE,
        (Some(start), Some(end)) => us_to_ms(end - start),
    }
}

fn span(map: &TimingMap, start: &str, end: &str) -> f64 {
    calculate_duration(map.get(start), map.get(end))
}

/// Setup durations read from the setup map.
const SETUP_SPANS: [(&str, &str, &str); 15] = [
    ("create_lynx_view", keys::CREATE_LYNX_START, keys::CREATE_LYNX_END),
    ("load_template", legacy::LOAD_TEMPLATE_START, legacy::LOAD_TEMPLATE_END),
    ("decode", legacy::DECODE_START, legacy::DECODE_END),
    ("setup_lepus_execute", legacy::LEPUS_EXECUTE_START, legacy::LEPUS_EXECUTE_END),
    ("setup_data_processor", keys::DATA_PROCESSOR_START, keys::DATA_PROCESSOR_END),
    ("setup_set_init_data", keys::SET_INIT_DATA_START, keys::SET_INIT_DATA_END),
    ("setup_create_vdom", legacy::CREATE_VDOM_START, legacy::CREATE_VDOM_END),
    ("setup_dispatch", legacy::DISPATCH_START, legacy::DISPATCH_END),
    ("setup_layout", keys::LAYOUT_START, keys::LAYOUT_END),
    ("setup_ui_operation_flush", legacy::UI_OPERATION_FLUSH_START, legacy::UI_OPERATION_FLUSH_END),
    (
        "setup_painting_ui_operation_flush",
        legacy::UI_OPERATION_FLUSH_START,
        legacy::PAINTING_UI_OPERATION_FLUSH_END,
    ),
    (
        "setup_layout_ui_operation_flush",
        legacy::LAYOUT_UI_OPERATION_FLUSH_START,
        legacy::UI_OPERATION_FLUSH_END,
    ),
    ("load_core", keys::LOAD_CORE_START, keys::LOAD_CORE_END),
    ("load_app", legacy::LOAD_APP_START, legacy::LOAD_APP_END),
    ("setup_load_template_waiting", keys::CREATE_LYNX_END, legacy::LOAD_TEMPLATE_START),
];

/// Update durations read from the flag's update map.
const UPDATE_SPANS: [(&str, &str, &str); 10] = [
    ("update_create_vdom", legacy::CREATE_VDOM_START, legacy::CREATE_VDOM_END),
    ("update_dispatch", legacy::DISPATCH_START, legacy::DISPATCH_END),
    ("update_layout", keys::LAYOUT_START, keys::LAYOUT_END),
    ("update_ui_operation_flush", legacy::UI_OPERATION_FLUSH_START, legacy::UI_OPERATION_FLUSH_END),
    (
        "update_painting_ui_operation_flush",
        legacy::UI_OPERATION_FLUSH_START,
        legacy::PAINTING_UI_OPERATION_FLUSH_END,
    ),
    (
        "update_layout_ui_operation_flush",
        legacy::LAYOUT_UI_OPERATION_FLUSH_START,
        legacy::UI_OPERATION_FLUSH_END,
    ),
    ("update_draw_waiting", legacy::UI_OPERATION_FLUSH_END, legacy::DRAW_END),
    ("list_render_children", legacy::LIST_RENDER_CHILDREN_START, legacy::LIST_RENDER_CHILDREN_END),
    ("list_patch_changes", legacy::LIST_PATCH_CHANGES_START, legacy::LIST_PATCH_CHANGES_END),
    ("list_diff_vdom", legacy::LIST_DIFF_VDOM_START, legacy::LIST_DIFF_VDOM_END),
];

/// The `lynxsdk_setup_timing` event for a dispatched setup.
pub fn build_setup_report(info: &TimingInfo) -> ReportEvent {
    let setup = info.setup_timing();
    let extra = info.extra_timing();
    let mut event = ReportEvent::new(SETUP_TIMING_EVENT);

    for (name, ts) in info.metrics().iter() {
        event.set_prop(name, us_to_ms(ts));
    }
    for (prop, start, end) in SETUP_SPANS {
        event.set_prop(prop, span(setup, start, end));
    }
    event.set_prop(
        "prepare_template",
        span(extra, keys::PREPARE_TEMPLATE_START, keys::PREPARE_TEMPLATE_END),
    );
    event.set_prop(
        "list_render_children",
        span(setup, legacy::LIST_RENDER_CHILDREN_START, legacy::LIST_RENDER_CHILDREN_END),
    );
    event.set_prop(
        legacy::TEMPLATE_BUNDLE_DECODE,
        span(
            setup,
            legacy::TEMPLATE_BUNDLE_DECODE_START,
            legacy::TEMPLATE_BUNDLE_DECODE_END,
        ),
    );
    let draw_waiting = span(setup, legacy::LOAD_TEMPLATE_END, legacy::DRAW_END)
        .max(span(setup, legacy::UI_OPERATION_FLUSH_END, legacy::DRAW_END));
    event.set_prop("setup_draw_waiting", draw_waiting);

    event.set_prop(legacy::HAS_RELOAD, info.has_reload());
    event.set_prop(legacy::USE_NATIVE_TIMING, 1);
    event
}

/// The `lynxsdk_update_timing` event for a dispatched update of `flag`.
pub fn build_update_report(info: &TimingInfo, flag: &str) -> ReportEvent {
    let empty = TimingMap::new();
    let update = info.update_timing(flag).unwrap_or(&empty);
    let setup = info.setup_timing();
    let mut event = ReportEvent::new(UPDATE_TIMING_EVENT);

    for (prop, start, end) in UPDATE_SPANS {
        event.set_prop(prop, span(update, start, end));
    }

    let update_start = update
        .get(keys::PIPELINE_START)
        .or_else(|| update.get(legacy::SET_STATE_TRIGGER));
    event.set_prop(
        "update_trigger_waiting",
        calculate_duration(update_start, update.get(legacy::CREATE_VDOM_START)),
    );
    event.set_prop(
        "update_waiting",
        calculate_duration(setup.get(legacy::DRAW_END), update_start),
    );
    event.set_prop(
        "update_timing",
        calculate_duration(update_start, update.get(legacy::DRAW_END)),
    );
    event.set_prop(
        "load_template_to_update_draw_end",
        calculate_duration(
            setup.get(legacy::LOAD_TEMPLATE_START),
            update.get(legacy::DRAW_END),
        ),
    );

    event.set_prop(legacy::UPDATE_FLAG, flag);
    event.set_prop(legacy::HAS_RELOAD, info.has_reload());
    event.set_prop(legacy::USE_NATIVE_TIMING, 1);
    event
}

/// Replace the snapshot's update timings with those of `flag` alone.
pub fn scope_update_timings(mut timing: Value, update_timing: Value) -> Value {
    if let Some(object) = timing.as_object_mut() {
        object.insert(legacy::UPDATE_TIMINGS.to_string(), update_timing);
    }
    timing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_duration_codes() {
        assert_eq!(calculate_duration(Some(1000), Some(3500)), 2.5);
        assert_eq!(calculate_duration(None, Some(10)), DURATION_NO_START);
        assert_eq!(calculate_duration(Some(0), Some(10)), DURATION_NO_START);
        assert_eq!(calculate_duration(Some(10), None), DURATION_NO_END);
        assert_eq!(calculate_duration(None, Some(0)), DURATION_NO_START_AND_END);
        assert_eq!(calculate_duration(Some(20), Some(10)), DURATION_NEGATIVE);
        assert_eq!(calculate_duration(Some(10), Some(10)), 0.0);
    }

    #[test]
    fn test_report_event_props() {
        let event = ReportEvent::new(SETUP_TIMING_EVENT)
            .with_prop("load_app", 12.5)
            .with_prop("has_reload", false);
        assert_eq!(event.name, "lynxsdk_setup_timing");
        assert_eq!(event.prop("load_app"), Some(&json!(12.5)));
        assert!(Uuid::parse_str(&event.event_id).is_ok());
    }

    #[test]
    fn test_scope_update_timings() {
        let timing = json!({"url": "a", "update_timings": {"x": {}, "y": {}}});
        let scoped = scope_update_timings(timing, json!({"y": {"draw_end": 1}}));
        assert_eq!(scoped["update_timings"], json!({"y": {"draw_end": 1}}));
        assert_eq!(scoped["url"], "a");
    }

    #[test]
    fn test_update_report_with_unknown_flag() {
        let info = TimingInfo::new();
        let event = build_update_report(&info, "missing");
        assert_eq!(event.prop("update_layout"), Some(&json!(DURATION_NO_START_AND_END)));
        assert_eq!(event.prop("update_flag"), Some(&json!("missing")));
        assert_eq!(event.prop("use_native_timing"), Some(&json!(1)));
    }
}
