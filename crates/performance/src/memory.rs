//! Category-tagged memory accounting with throttled reporting.

use std::collections::{BTreeMap, HashMap};
use std::ops::{AddAssign, SubAssign};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use timing::constants::entry;
use timing::{EventTypes, PerformanceEntry, PerformanceEventSender};

use crate::config::{PerformanceConfig, MAX_MEMORY_CHANGE_THRESHOLD_MB};
use crate::error::{PerformanceError, PerformanceResult};

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Key under which the scripting engine hands over its raw GC JSON.
pub const RAW_SCRIPTING_ENGINE_INFO: &str = "raw_runtime_memory_info";
/// Key naming the category of a scripting engine record.
pub const CATEGORY_KEY: &str = "category";

const GC_INFO: &str = "gc_info";
const HEAP_SIZE_AFTER_KB: &str = "heapsize_after";

/// Memory held by one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub category: String,
    pub size_bytes: i64,
    pub instance_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<BTreeMap<String, String>>,
}

impl MemoryRecord {
    pub fn new(category: &str, size_bytes: i64, instance_count: i32) -> Self {
        Self {
            category: category.to_string(),
            size_bytes,
            instance_count,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: BTreeMap<String, String>) -> Self {
        self.detail = Some(detail);
        self
    }

    fn to_value(&self) -> Value {
        let mut value = json!({
            "category": self.category,
            "sizeBytes": self.size_bytes,
            "instanceCount": self.instance_count,
        });
        if let (Some(detail), Some(object)) = (&self.detail, value.as_object_mut()) {
            object.insert("detail".to_string(), json!(detail));
        }
        value
    }
}

impl AddAssign<&MemoryRecord> for MemoryRecord {
    fn add_assign(&mut self, rhs: &MemoryRecord) {
        self.size_bytes += rhs.size_bytes;
        self.instance_count += rhs.instance_count;
        if rhs.detail.is_some() {
            self.detail = rhs.detail.clone();
        }
    }
}

impl SubAssign<&MemoryRecord> for MemoryRecord {
    fn sub_assign(&mut self, rhs: &MemoryRecord) {
        self.size_bytes -= rhs.size_bytes;
        self.instance_count -= rhs.instance_count;
        if rhs.detail.is_some() {
            self.detail = rhs.detail.clone();
        }
    }
}

// ============================================================================
// Enable switch
// ============================================================================

const LEVEL_UNSET: u8 = 0;
const LEVEL_OFF: u8 = 1;
const LEVEL_ON: u8 = 2;

static FORCE_LEVEL: AtomicU8 = AtomicU8::new(LEVEL_UNSET);
static ENV_LEVEL: OnceLock<Option<bool>> = OnceLock::new();

/// Pick the first level that is set, in `force > env > default` order.
pub fn resolve_enable(force: Option<bool>, env: Option<bool>, default: bool) -> bool {
    force.or(env).unwrap_or(default)
}

/// Override every other level. `None` removes the override.
pub fn set_force_enable(force: Option<bool>) {
    let level = match force {
        None => LEVEL_UNSET,
        Some(false) => LEVEL_OFF,
        Some(true) => LEVEL_ON,
    };
    FORCE_LEVEL.store(level, Ordering::Release);
}

fn force_level() -> Option<bool> {
    match FORCE_LEVEL.load(Ordering::Acquire) {
        LEVEL_OFF => Some(false),
        LEVEL_ON => Some(true),
        _ => None,
    }
}

fn env_level() -> Option<bool> {
    *ENV_LEVEL.get_or_init(|| crate::env::installed().map(|c| c.enable_memory_monitor))
}

/// Whether memory monitoring is on for a view whose own setting is `default`.
pub fn is_enabled(default: bool) -> bool {
    resolve_enable(force_level(), env_level(), default)
}

/// Build a record from the scripting engine's GC report.
///
/// The raw JSON is taken out of `info`; the newest `gc_info` element gives
/// the heap size (in KB) and the remaining entries become the detail.
pub fn build_scripting_engine_record(
    mut info: HashMap<String, String>,
) -> PerformanceResult<MemoryRecord> {
    let raw = info
        .remove(RAW_SCRIPTING_ENGINE_INFO)
        .ok_or(PerformanceError::MissingField(RAW_SCRIPTING_ENGINE_INFO))?;
    let parsed: Value = serde_json::from_str(&raw)?;
    let root = parsed
        .as_object()
        .ok_or_else(|| PerformanceError::InvalidMemoryInfo("root is not an object".to_string()))?;
    let latest = root
        .get(GC_INFO)
        .and_then(Value::as_array)
        .ok_or(PerformanceError::MissingField(GC_INFO))?
        .last()
        .and_then(Value::as_object)
        .ok_or_else(|| PerformanceError::InvalidMemoryInfo("gc_info is empty".to_string()))?;
    let heap_kb = latest
        .get(HEAP_SIZE_AFTER_KB)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or(PerformanceError::MissingField(HEAP_SIZE_AFTER_KB))?;
    let category = info
        .get(CATEGORY_KEY)
        .cloned()
        .ok_or(PerformanceError::MissingField(CATEGORY_KEY))?;

    let mut detail: BTreeMap<String, String> = info.into_iter().collect();
    for (key, value) in latest {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        detail.insert(key.clone(), text);
    }

    Ok(MemoryRecord::new(&category, heap_kb * 1024, 1).with_detail(detail))
}

// ============================================================================
// Monitor
// ============================================================================

/// Aggregates memory records of one view and reports the total when it
/// moves by at least the threshold.
pub struct MemoryMonitor {
    enabled: bool,
    threshold_mb: u32,
    records: BTreeMap<String, MemoryRecord>,
    last_reported_bytes: i64,
    sender: Option<Arc<dyn PerformanceEventSender>>,
}

impl MemoryMonitor {
    pub fn new(config: &PerformanceConfig, sender: Option<Arc<dyn PerformanceEventSender>>) -> Self {
        Self {
            enabled: is_enabled(config.enable_memory_monitor),
            threshold_mb: config.capped_memory_threshold_mb(),
            records: BTreeMap::new(),
            last_reported_bytes: 0,
            sender,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_threshold_mb(mut self, threshold_mb: u32) -> Self {
        self.threshold_mb = threshold_mb.min(MAX_MEMORY_CHANGE_THRESHOLD_MB);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn threshold_mb(&self) -> u32 {
        self.threshold_mb
    }

    /// Threshold packed into the top byte, as the scripting engine expects.
    pub fn scripting_engine_mode(&self) -> u32 {
        if self.enabled {
            self.threshold_mb << 24
        } else {
            0
        }
    }

    pub fn record(&self, category: &str) -> Option<&MemoryRecord> {
        self.records.get(category)
    }

    pub fn total_size_bytes(&self) -> i64 {
        self.records.values().map(|r| r.size_bytes).sum()
    }

    pub fn allocate(&mut self, record: MemoryRecord) {
        if !self.enabled {
            return;
        }
        match self.records.get_mut(&record.category) {
            Some(existing) => *existing += &record,
            None => {
                self.records.insert(record.category.clone(), record);
            }
        }
        self.report(false);
    }

    pub fn deallocate(&mut self, record: MemoryRecord) {
        if !self.enabled {
            return;
        }
        let Some(existing) = self.records.get_mut(&record.category) else {
            tracing::debug!(target: "performance", category = %record.category, "deallocate of unknown category");
            return;
        };
        *existing -= &record;
        self.report(false);
    }

    /// Replace the record of a category.
    pub fn update(&mut self, record: MemoryRecord) {
        if !self.enabled {
            return;
        }
        if self
            .records
            .get(&record.category)
            .is_some_and(|r| r.size_bytes == record.size_bytes)
        {
            return;
        }
        self.records.insert(record.category.clone(), record);
        self.report(false);
    }

    pub fn update_scripting_engine(&mut self, info: HashMap<String, String>) {
        if !self.enabled {
            return;
        }
        match build_scripting_engine_record(info) {
            Ok(record) => self.update(record),
            Err(err) => {
                tracing::error!(target: "performance", error = %err, "bad scripting engine memory info")
            }
        }
    }

    fn report(&mut self, force: bool) {
        let total = self.total_size_bytes();
        let threshold_bytes = i64::from(self.threshold_mb) * BYTES_PER_MB;
        if !force && (total - self.last_reported_bytes).abs() < threshold_bytes {
            return;
        }
        self.last_reported_bytes = total;
        let Some(sender) = &self.sender else {
            return;
        };
        sender.on_performance_event(self.build_entry(total), EventTypes::PLATFORM);
    }

    fn build_entry(&self, total: i64) -> PerformanceEntry {
        let mut out = Map::new();
        out.insert(entry::ENTRY_TYPE.to_string(), json!(entry::TYPE_MEMORY));
        out.insert(entry::NAME.to_string(), json!(entry::NAME_MEMORY));
        out.insert("sizeBytes".to_string(), json!(total));
        if !self.records.is_empty() {
            let detail: Map<String, Value> = self
                .records
                .iter()
                .map(|(category, record)| (category.clone(), record.to_value()))
                .collect();
            out.insert("detail".to_string(), Value::Object(detail));
        }
        out
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        if self.enabled {
            self.records.clear();
            self.report(true);
        }
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("enabled", &self.enabled)
            .field("threshold_mb", &self.threshold_mb)
            .field("categories", &self.records.len())
            .field("last_reported_bytes", &self.last_reported_bytes)
            .finish()
    }
}
