//! Mapping from current timing keys to their legacy names.

use crate::constants::{keys, legacy};

const POLYFILL_TABLE: &[(&str, &str)] = &[
    (keys::OPEN_TIME, keys::OPEN_TIME),
    (keys::CONTAINER_INIT_START, keys::CONTAINER_INIT_START),
    (keys::CONTAINER_INIT_END, keys::CONTAINER_INIT_END),
    (keys::PREPARE_TEMPLATE_START, keys::PREPARE_TEMPLATE_START),
    (keys::PREPARE_TEMPLATE_END, keys::PREPARE_TEMPLATE_END),
    (keys::CREATE_LYNX_START, keys::CREATE_LYNX_START),
    (keys::CREATE_LYNX_END, keys::CREATE_LYNX_END),
    (keys::LOAD_CORE_START, keys::LOAD_CORE_START),
    (keys::LOAD_CORE_END, keys::LOAD_CORE_END),
    (keys::TEMPLATE_BUNDLE_PARSE_START, legacy::TEMPLATE_BUNDLE_DECODE_START),
    (keys::TEMPLATE_BUNDLE_PARSE_END, legacy::TEMPLATE_BUNDLE_DECODE_END),
    (keys::PIPELINE_START, keys::PIPELINE_START),
    (keys::PIPELINE_END, keys::PIPELINE_END),
    (keys::LOAD_BUNDLE_START, legacy::LOAD_TEMPLATE_START),
    (keys::LOAD_BUNDLE_END, legacy::LOAD_TEMPLATE_END),
    (keys::PARSE_START, legacy::DECODE_START),
    (keys::PARSE_END, legacy::DECODE_END),
    (keys::VM_EXECUTE_START, legacy::LEPUS_EXECUTE_START),
    (keys::VM_EXECUTE_END, legacy::LEPUS_EXECUTE_END),
    (keys::DATA_PROCESSOR_START, keys::DATA_PROCESSOR_START),
    (keys::DATA_PROCESSOR_END, keys::DATA_PROCESSOR_END),
    (keys::SET_INIT_DATA_START, keys::SET_INIT_DATA_START),
    (keys::SET_INIT_DATA_END, keys::SET_INIT_DATA_END),
    (keys::MTS_RENDER_START, legacy::CREATE_VDOM_START),
    (keys::MTS_RENDER_END, legacy::CREATE_VDOM_END),
    (keys::RESOLVE_START, legacy::DISPATCH_START),
    (keys::RESOLVE_END, legacy::DISPATCH_END),
    (keys::LAYOUT_START, keys::LAYOUT_START),
    (keys::LAYOUT_END, keys::LAYOUT_END),
    (keys::PAINTING_UI_OPERATION_EXECUTE_START, legacy::UI_OPERATION_FLUSH_START),
    (keys::PAINTING_UI_OPERATION_EXECUTE_END, legacy::PAINTING_UI_OPERATION_FLUSH_END),
    (keys::LAYOUT_UI_OPERATION_EXECUTE_START, legacy::LAYOUT_UI_OPERATION_FLUSH_START),
    (keys::LAYOUT_UI_OPERATION_EXECUTE_END, legacy::UI_OPERATION_FLUSH_END),
    (keys::PAINT_END, legacy::DRAW_END),
    (keys::LOAD_BACKGROUND_START, legacy::LOAD_APP_START),
    (keys::LOAD_BACKGROUND_END, legacy::LOAD_APP_END),
];

// Legacy-only keys producers may still send directly.
const LEGACY_ONLY: &[&str] = &[
    legacy::SET_STATE_TRIGGER,
    legacy::LIST_RENDER_CHILDREN_START,
    legacy::LIST_RENDER_CHILDREN_END,
    legacy::LIST_PATCH_CHANGES_START,
    legacy::LIST_PATCH_CHANGES_END,
    legacy::LIST_DIFF_VDOM_START,
    legacy::LIST_DIFF_VDOM_END,
];

fn is_legacy_name(key: &str) -> bool {
    LEGACY_ONLY.contains(&key) || POLYFILL_TABLE.iter().any(|(_, old)| *old == key)
}

/// Remove every `setup_` and `update_` marker from a key.
pub fn strip_stage_prefixes(key: &str) -> String {
    key.replace(legacy::SETUP_PREFIX, "")
        .replace(legacy::UPDATE_PREFIX, "")
}

/// Legacy name for `key`, or `None` if the legacy path does not track it.
///
/// Current names are translated; names that already are legacy (optionally
/// carrying a `setup_`/`update_` marker) pass through unchanged.
pub fn polyfill_key(key: &str) -> Option<String> {
    if let Some((_, old)) = POLYFILL_TABLE.iter().find(|(new, _)| *new == key) {
        return Some((*old).to_string());
    }
    if is_legacy_name(key) || is_legacy_name(&strip_stage_prefixes(key)) {
        return Some(key.to_string());
    }
    None
}

pub fn is_init_key(key: &str) -> bool {
    legacy::INIT_KEYS.contains(&key)
}

pub fn is_extra_key(key: &str) -> bool {
    legacy::EXTRA_KEYS.contains(&key)
}
