//! Well-known timing keys, pipeline origins and entry field names.

/// Timing keys recorded by the next-generation pipeline.
pub mod keys {
    // Container and engine bring-up
    pub const OPEN_TIME: &str = "open_time";
    pub const CONTAINER_INIT_START: &str = "container_init_start";
    pub const CONTAINER_INIT_END: &str = "container_init_end";
    pub const PREPARE_TEMPLATE_START: &str = "prepare_template_start";
    pub const PREPARE_TEMPLATE_END: &str = "prepare_template_end";
    pub const CREATE_LYNX_START: &str = "create_lynx_start";
    pub const CREATE_LYNX_END: &str = "create_lynx_end";
    pub const LOAD_CORE_START: &str = "load_core_start";
    pub const LOAD_CORE_END: &str = "load_core_end";
    pub const TEMPLATE_BUNDLE_PARSE_START: &str = "template_bundle_parse_start";
    pub const TEMPLATE_BUNDLE_PARSE_END: &str = "template_bundle_parse_end";

    // Pipeline stages
    pub const PIPELINE_START: &str = "pipeline_start";
    pub const PIPELINE_END: &str = "pipeline_end";
    pub const LOAD_BUNDLE_START: &str = "load_bundle_start";
    pub const LOAD_BUNDLE_END: &str = "load_bundle_end";
    pub const RELOAD_BUNDLE_START: &str = "reload_bundle_start";
    pub const RELOAD_BUNDLE_END: &str = "reload_bundle_end";
    pub const LOAD_BACKGROUND_START: &str = "load_background_start";
    pub const LOAD_BACKGROUND_END: &str = "load_background_end";
    pub const RELOAD_BACKGROUND_START: &str = "reload_background_start";
    pub const RELOAD_BACKGROUND_END: &str = "reload_background_end";
    pub const PARSE_START: &str = "parse_start";
    pub const PARSE_END: &str = "parse_end";
    pub const VM_EXECUTE_START: &str = "vm_execute_start";
    pub const VM_EXECUTE_END: &str = "vm_execute_end";
    pub const DATA_PROCESSOR_START: &str = "data_processor_start";
    pub const DATA_PROCESSOR_END: &str = "data_processor_end";
    pub const SET_INIT_DATA_START: &str = "set_init_data_start";
    pub const SET_INIT_DATA_END: &str = "set_init_data_end";
    pub const MTS_RENDER_START: &str = "mts_render_start";
    pub const MTS_RENDER_END: &str = "mts_render_end";
    pub const RESOLVE_START: &str = "resolve_start";
    pub const RESOLVE_END: &str = "resolve_end";
    pub const LAYOUT_START: &str = "layout_start";
    pub const LAYOUT_END: &str = "layout_end";
    pub const PAINTING_UI_OPERATION_EXECUTE_START: &str = "painting_ui_operation_execute_start";
    pub const PAINTING_UI_OPERATION_EXECUTE_END: &str = "painting_ui_operation_execute_end";
    pub const LAYOUT_UI_OPERATION_EXECUTE_START: &str = "layout_ui_operation_execute_start";
    pub const LAYOUT_UI_OPERATION_EXECUTE_END: &str = "layout_ui_operation_execute_end";
    pub const PAINT_END: &str = "paint_end";

    /// Keys that belong to the container entry.
    pub const CONTAINER_KEYS: [&str; 5] = [
        OPEN_TIME,
        CONTAINER_INIT_START,
        CONTAINER_INIT_END,
        PREPARE_TEMPLATE_START,
        PREPARE_TEMPLATE_END,
    ];
}

/// Keys of the legacy (polyfill) timing generation.
pub mod legacy {
    pub const DRAW_END: &str = "draw_end";
    pub const LOAD_TEMPLATE_START: &str = "load_template_start";
    pub const LOAD_TEMPLATE_END: &str = "load_template_end";
    pub const DECODE_START: &str = "decode_start";
    pub const DECODE_END: &str = "decode_end";
    pub const TEMPLATE_BUNDLE_DECODE_START: &str = "template_bundle_decode_start";
    pub const TEMPLATE_BUNDLE_DECODE_END: &str = "template_bundle_decode_end";
    pub const LEPUS_EXECUTE_START: &str = "lepus_excute_start";
    pub const LEPUS_EXECUTE_END: &str = "lepus_excute_end";
    pub const CREATE_VDOM_START: &str = "create_vdom_start";
    pub const CREATE_VDOM_END: &str = "create_vdom_end";
    pub const DISPATCH_START: &str = "dispatch_start";
    pub const DISPATCH_END: &str = "dispatch_end";
    pub const UI_OPERATION_FLUSH_START: &str = "ui_operation_flush_start";
    pub const UI_OPERATION_FLUSH_END: &str = "ui_operation_flush_end";
    pub const PAINTING_UI_OPERATION_FLUSH_END: &str = "painting_ui_operation_flush_end";
    pub const LAYOUT_UI_OPERATION_FLUSH_START: &str = "layout_ui_operation_flush_start";
    pub const LOAD_APP_START: &str = "load_app_start";
    pub const LOAD_APP_END: &str = "load_app_end";
    pub const SET_STATE_TRIGGER: &str = "set_state_trigger";
    pub const LIST_RENDER_CHILDREN_START: &str = "list_render_children_start";
    pub const LIST_RENDER_CHILDREN_END: &str = "list_render_children_end";
    pub const LIST_PATCH_CHANGES_START: &str = "list_patch_changes_start";
    pub const LIST_PATCH_CHANGES_END: &str = "list_patch_changes_end";
    pub const LIST_DIFF_VDOM_START: &str = "list_diff_vdom_start";
    pub const LIST_DIFF_VDOM_END: &str = "list_diff_vdom_end";

    pub const RENDER_PAGE_START_SSR: &str = "render_page_start_ssr";
    pub const DRAW_END_SSR: &str = "draw_end_ssr";
    pub const SSR_DATA_SIZE: &str = "data_size";

    pub const SETUP_PREFIX: &str = "setup_";
    pub const UPDATE_PREFIX: &str = "update_";
    pub const SSR_SUFFIX: &str = "_ssr";

    // Metrics
    pub const LYNX_TTI: &str = "lynx_tti";
    pub const TOTAL_TTI: &str = "total_tti";
    pub const TTI: &str = "tti";
    pub const LYNX_FCP: &str = "lynx_fcp";
    pub const TOTAL_FCP: &str = "total_fcp";
    pub const FCP: &str = "fcp";
    pub const ACTUAL_FMP: &str = "actual_fmp";
    pub const LYNX_ACTUAL_FMP: &str = "lynx_actual_fmp";
    pub const TOTAL_ACTUAL_FMP: &str = "total_actual_fmp";
    pub const LYNX_FCP_SSR: &str = "lynx_fcp_ssr";
    pub const LYNX_TTI_SSR: &str = "lynx_tti_ssr";

    // Snapshot fields
    pub const SETUP_TIMING: &str = "setup_timing";
    pub const EXTRA_TIMING: &str = "extra_timing";
    pub const UPDATE_TIMINGS: &str = "update_timings";
    pub const METRICS: &str = "metrics";
    pub const SSR_METRICS: &str = "ssr_metrics";
    pub const SSR_RENDER_PAGE_TIMING: &str = "ssr_render_page_timing";
    pub const SSR_EXTRA_INFO: &str = "ssr_extra_info";
    pub const THREAD_STRATEGY: &str = "thread_strategy";
    pub const HAS_RELOAD: &str = "has_reload";
    pub const URL: &str = "url";
    pub const UPDATE_FLAG: &str = "update_flag";
    pub const USE_NATIVE_TIMING: &str = "use_native_timing";
    pub const TEMPLATE_BUNDLE_DECODE: &str = "template_bundle_decode";

    /// Init keys land in the init map regardless of pipeline.
    pub const INIT_KEYS: [&str; 6] = [
        super::keys::CREATE_LYNX_START,
        super::keys::CREATE_LYNX_END,
        super::keys::LOAD_CORE_START,
        super::keys::LOAD_CORE_END,
        TEMPLATE_BUNDLE_DECODE_START,
        TEMPLATE_BUNDLE_DECODE_END,
    ];

    /// Setup keys mirrored into the SSR render-page map.
    pub const SSR_REUSED_KEYS: [&str; 5] = [
        DRAW_END,
        UI_OPERATION_FLUSH_START,
        UI_OPERATION_FLUSH_END,
        super::keys::LAYOUT_START,
        super::keys::LAYOUT_END,
    ];

    /// Extra keys land in the extra map regardless of pipeline.
    pub const EXTRA_KEYS: [&str; 5] = super::keys::CONTAINER_KEYS;
}

/// Pipeline origins the timing handlers treat specially.
pub mod origins {
    pub const LOAD_BUNDLE: &str = "loadBundle";
    pub const RELOAD_BUNDLE_FROM_NATIVE: &str = "reloadBundleFromNative";
    pub const RELOAD_BUNDLE_FROM_BTS: &str = "reloadBundleFromBts";
    pub const LOAD_TEMPLATE: &str = "loadTemplate";
    pub const RELOAD_TEMPLATE: &str = "reloadTemplate";
    pub const LOAD_SSR_DATA: &str = "loadSSRData";
    pub const LOAD_COMPONENT: &str = "loadComponent";
    pub const AIR_RENDER_PAGE_START: &str = "air:renderPageStart";
    pub const AIR_RENDER_PAGE_END: &str = "air:renderPageEnd";

    /// Origins whose pipeline produces the legacy setup snapshot.
    pub fn is_setup_origin(origin: &str) -> bool {
        matches!(
            origin,
            LOAD_BUNDLE
                | RELOAD_BUNDLE_FROM_NATIVE
                | RELOAD_BUNDLE_FROM_BTS
                | LOAD_TEMPLATE
                | RELOAD_TEMPLATE
                | LOAD_SSR_DATA
        )
    }

    /// Origins that become the page's load-bundle pipeline.
    pub fn is_load_bundle_origin(origin: &str) -> bool {
        matches!(
            origin,
            LOAD_BUNDLE | RELOAD_BUNDLE_FROM_NATIVE | RELOAD_BUNDLE_FROM_BTS
        )
    }
}

/// Timing flag that marks the first meaningful paint.
pub const FMP_FLAG: &str = "__lynx_timing_actual_fmp";

/// Field names and values of performance entries.
pub mod entry {
    pub const ENTRY_TYPE: &str = "entryType";
    pub const NAME: &str = "name";
    pub const IDENTIFIER: &str = "identifier";
    pub const INSTANCE_ID: &str = "instanceId";
    pub const FRAMEWORK_RENDERING_TIMING: &str = "frameworkRenderingTiming";
    pub const HOST_PLATFORM_TIMING: &str = "hostPlatformTiming";
    pub const HOST_PLATFORM_TYPE: &str = "hostPlatformType";

    pub const TYPE_INIT: &str = "init";
    pub const TYPE_PIPELINE: &str = "pipeline";
    pub const TYPE_METRIC: &str = "metric";
    pub const TYPE_MEMORY: &str = "memory";

    pub const NAME_CONTAINER: &str = "container";
    pub const NAME_LYNXVIEW: &str = "lynxview";
    pub const NAME_BACKGROUND_RUNTIME: &str = "backgroundRuntime";
    pub const NAME_FCP: &str = "fcp";
    pub const NAME_FMP: &str = "fmp";
    pub const NAME_TTI: &str = "tti";
    pub const NAME_MEMORY: &str = "memory";

    // Metric names
    pub const LYNX_FCP: &str = "lynxFcp";
    pub const FCP: &str = "fcp";
    pub const TOTAL_FCP: &str = "totalFcp";
    pub const LYNX_ACTUAL_FMP: &str = "lynxActualFmp";
    pub const ACTUAL_FMP: &str = "actualFmp";
    pub const TOTAL_ACTUAL_FMP: &str = "totalActualFmp";
    pub const LYNX_TTI: &str = "lynxTti";
    pub const TTI: &str = "tti";
    pub const TOTAL_TTI: &str = "totalTti";

    // Metric value fields
    pub const START_TIMESTAMP_NAME: &str = "startTimestampName";
    pub const START_TIMESTAMP: &str = "startTimestamp";
    pub const END_TIMESTAMP_NAME: &str = "endTimestampName";
    pub const END_TIMESTAMP: &str = "endTimestamp";
    pub const DURATION: &str = "duration";
}

/// Names of events delivered to the scripting sides.
pub mod events {
    pub const PERFORMANCE_EVENT: &str = "lynx.performance.onPerformanceEvent";
    pub const TIMING_SETUP: &str = "lynx.performance.timing.onSetup";
    pub const TIMING_UPDATE: &str = "lynx.performance.timing.onUpdate";
}
