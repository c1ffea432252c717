//! Configuration of the performance services.

use serde::{Deserialize, Serialize};
use threading::ThreadStrategy;
use timing::DEFAULT_PIPELINE_MAP_LIMIT;

use crate::error::PerformanceResult;

/// Default memory change that triggers a memory report.
pub const DEFAULT_MEMORY_CHANGE_THRESHOLD_MB: u32 = 10;

/// Largest threshold expressible in the scripting engine mode word.
pub const MAX_MEMORY_CHANGE_THRESHOLD_MB: u32 = u8::MAX as u32;

/// Switches threaded through the pipeline at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    pub enable_memory_monitor: bool,
    pub memory_change_threshold_mb: u32,
    pub long_task_monitor_disabled: bool,
    pub enable_js_runtime: bool,
    pub enable_background_runtime: bool,
    pub enable_main_thread_engine_callback: bool,
    pub enable_air_strict_mode: bool,
    pub thread_strategy: ThreadStrategy,
    pub pipeline_map_limit: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable_memory_monitor: false,
            memory_change_threshold_mb: DEFAULT_MEMORY_CHANGE_THRESHOLD_MB,
            long_task_monitor_disabled: false,
            enable_js_runtime: true,
            enable_background_runtime: true,
            enable_main_thread_engine_callback: false,
            enable_air_strict_mode: false,
            thread_strategy: ThreadStrategy::default(),
            pipeline_map_limit: DEFAULT_PIPELINE_MAP_LIMIT,
        }
    }
}

impl PerformanceConfig {
    /// Parse from JSON. Absent keys keep their defaults.
    pub fn from_json(json: &str) -> PerformanceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_memory_monitor(mut self, enable: bool) -> Self {
        self.enable_memory_monitor = enable;
        self
    }

    pub fn with_memory_change_threshold_mb(mut self, threshold_mb: u32) -> Self {
        self.memory_change_threshold_mb = threshold_mb;
        self
    }

    pub fn with_long_task_monitor_disabled(mut self, disabled: bool) -> Self {
        self.long_task_monitor_disabled = disabled;
        self
    }

    pub fn with_js_runtime(mut self, enable: bool) -> Self {
        self.enable_js_runtime = enable;
        self
    }

    pub fn with_background_runtime(mut self, enable: bool) -> Self {
        self.enable_background_runtime = enable;
        self
    }

    pub fn with_main_thread_engine_callback(mut self, enable: bool) -> Self {
        self.enable_main_thread_engine_callback = enable;
        self
    }

    pub fn with_air_strict_mode(mut self, enable: bool) -> Self {
        self.enable_air_strict_mode = enable;
        self
    }

    pub fn with_thread_strategy(mut self, strategy: ThreadStrategy) -> Self {
        self.thread_strategy = strategy;
        self
    }

    pub fn with_pipeline_map_limit(mut self, limit: usize) -> Self {
        self.pipeline_map_limit = limit;
        self
    }

    /// Threshold capped to what fits in eight bits.
    pub fn capped_memory_threshold_mb(&self) -> u32 {
        self.memory_change_threshold_mb
            .min(MAX_MEMORY_CHANGE_THRESHOLD_MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PerformanceConfig::default();
        assert!(!config.enable_memory_monitor);
        assert_eq!(config.memory_change_threshold_mb, 10);
        assert!(config.enable_js_runtime);
        assert_eq!(config.thread_strategy, ThreadStrategy::AllOnUi);
        assert_eq!(config.pipeline_map_limit, 1000);
    }

    #[test]
    fn test_from_json_uses_wire_names() {
        let config = PerformanceConfig::from_json(
            r#"{
                "enableMemoryMonitor": true,
                "memoryChangeThresholdMb": 300,
                "threadStrategy": "MULTI_THREADS",
                "enableMainThreadEngineCallback": true
            }"#,
        )
        .unwrap();
        assert!(config.enable_memory_monitor);
        assert!(config.enable_main_thread_engine_callback);
        assert_eq!(config.thread_strategy, ThreadStrategy::MultiThreads);
        assert_eq!(config.capped_memory_threshold_mb(), 255);
        assert!(config.enable_background_runtime);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(PerformanceConfig::from_json("not json").is_err());
        assert!(PerformanceConfig::from_json(r#"{"threadStrategy": "SIDEWAYS"}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let config = PerformanceConfig::default()
            .with_memory_monitor(true)
            .with_memory_change_threshold_mb(4)
            .with_js_runtime(false)
            .with_thread_strategy(ThreadStrategy::PartOnLayout)
            .with_pipeline_map_limit(8);
        assert!(config.enable_memory_monitor);
        assert_eq!(config.memory_change_threshold_mb, 4);
        assert!(!config.enable_js_runtime);
        assert_eq!(config.thread_strategy, ThreadStrategy::PartOnLayout);
        assert_eq!(config.pipeline_map_limit, 8);
    }
}
