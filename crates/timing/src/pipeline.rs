//! Pipeline identity and per-pipeline options.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::origins;
use crate::timing_map::{current_timestamp_us, TimestampUs};

/// Opaque id of one rendering pass, unique within the process.
pub type PipelineId = String;

/// Cause of a pipeline, e.g. `loadBundle`.
pub type PipelineOrigin = String;

/// Legacy marker bound to one or more pipelines.
pub type TimingFlag = String;

static NEXT_THREAD_ORDINAL: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ORDINAL: u32 = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
    static PIPELINE_COUNTER: Cell<u64> = const { Cell::new(0) };
}

/// Next id for the calling thread, formatted `"<thread>_<counter>"`.
pub fn generate_pipeline_id() -> PipelineId {
    let thread = THREAD_ORDINAL.with(|ordinal| *ordinal);
    let counter = PIPELINE_COUNTER.with(|counter| {
        let next = counter.get() + 1;
        counter.set(next);
        next
    });
    format!("{thread}_{counter}")
}

/// Restart the calling thread's counter. Ids issued before the reset may
/// be issued again.
pub fn reset_pipeline_id_counter() {
    PIPELINE_COUNTER.with(|counter| counter.set(0));
}

/// Render timings of a single list item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListItemLifeOption {
    pub start_render_time: TimestampUs,
    pub end_render_time: TimestampUs,
    pub start_dispatch_time: TimestampUs,
    pub end_dispatch_time: TimestampUs,
    pub start_layout_time: TimestampUs,
    pub end_layout_time: TimestampUs,
}

/// List the pipeline renders into, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListContext {
    pub list_id: i32,
    pub list_comp_id: i32,
    pub item_life_option: ListItemLifeOption,
}

/// Ids touched by a batched list render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBatch {
    pub operation_ids: Vec<i64>,
    pub list_item_ids: Vec<i32>,
    pub updated_list_element_ids: Vec<i32>,
}

/// Options created when a pipeline starts and consumed when it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub pipeline_id: PipelineId,
    pub origin: PipelineOrigin,
    pub start_timestamp_us: TimestampUs,
    pub need_timestamps: bool,
    pub is_first_screen: bool,
    pub is_reload_template: bool,
    pub has_layout: bool,
    pub trigger_layout: bool,
    pub force_resolve_style: bool,
    pub force_update_style_sheet: bool,
    pub native_update_data_order: u32,
    pub list_context: Option<ListContext>,
    pub list_batch: ListBatch,
}

impl PipelineOptions {
    /// Fresh options with a newly generated id, started now.
    pub fn new(origin: &str) -> Self {
        Self {
            pipeline_id: generate_pipeline_id(),
            origin: origin.to_string(),
            start_timestamp_us: current_timestamp_us(),
            need_timestamps: false,
            is_first_screen: false,
            is_reload_template: false,
            has_layout: false,
            trigger_layout: false,
            force_resolve_style: false,
            force_update_style_sheet: false,
            native_update_data_order: 0,
            list_context: None,
            list_batch: ListBatch::default(),
        }
    }

    /// Request timestamp collection for this pipeline.
    pub fn with_need_timestamps(mut self, need: bool) -> Self {
        self.need_timestamps = need;
        self
    }

    pub fn with_first_screen(mut self, first_screen: bool) -> Self {
        self.is_first_screen = first_screen;
        self
    }

    pub fn with_reload_template(mut self, reload: bool) -> Self {
        self.is_reload_template = reload;
        self
    }

    pub fn with_start_timestamp(mut self, start_us: TimestampUs) -> Self {
        self.start_timestamp_us = start_us;
        self
    }

    pub fn with_list_context(mut self, context: ListContext) -> Self {
        self.list_context = Some(context);
        self
    }

    /// Whether this pipeline produces the legacy setup snapshot.
    pub fn is_setup(&self) -> bool {
        origins::is_setup_origin(&self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn thread_prefix(id: &str) -> &str {
        id.split('_').next().unwrap()
    }

    #[test]
    fn test_ids_increase_per_thread() {
        let first = generate_pipeline_id();
        let second = generate_pipeline_id();
        assert_ne!(first, second);
        assert_eq!(thread_prefix(&first), thread_prefix(&second));
    }

    #[test]
    fn test_thread_prefix_differs_across_threads() {
        let here = generate_pipeline_id();
        let there = std::thread::spawn(generate_pipeline_id).join().unwrap();
        assert_ne!(thread_prefix(&here), thread_prefix(&there));
    }

    #[test]
    fn test_reset_restarts_counter() {
        reset_pipeline_id_counter();
        let id = generate_pipeline_id();
        assert!(id.ends_with("_1"));
    }

    #[test]
    fn test_options_defaults() {
        let options = PipelineOptions::new(origins::LOAD_BUNDLE).with_need_timestamps(true);
        assert!(options.is_setup());
        assert!(options.need_timestamps);
        assert!(options.start_timestamp_us > 0);
        assert!(!PipelineOptions::new("update").is_setup());
    }

    proptest! {
        #[test]
        fn prop_ids_unique_on_one_thread(count in 1usize..200) {
            let ids: HashSet<PipelineId> = (0..count).map(|_| generate_pipeline_id()).collect();
            prop_assert_eq!(ids.len(), count);
        }
    }
}
