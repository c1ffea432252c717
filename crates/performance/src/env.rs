//! Process-wide performance configuration.
//!
//! Installed once by the embedder; read by components that are not handed
//! a config explicitly.

use std::sync::{OnceLock, PoisonError, RwLock};

use crate::config::PerformanceConfig;

static ENV: OnceLock<RwLock<Option<PerformanceConfig>>> = OnceLock::new();

fn env() -> &'static RwLock<Option<PerformanceConfig>> {
    ENV.get_or_init(|| RwLock::new(None))
}

/// Replace the process configuration and apply its global switches.
pub fn install(config: PerformanceConfig) {
    threading::instance::set_long_task_monitor_enabled(!config.long_task_monitor_disabled);
    tracing::info!(
        target: "performance",
        memory_monitor = config.enable_memory_monitor,
        threshold_mb = config.memory_change_threshold_mb,
        thread_strategy = ?config.thread_strategy,
        "performance env installed"
    );
    *env().write().unwrap_or_else(PoisonError::into_inner) = Some(config);
}

/// The installed configuration, if any.
pub fn installed() -> Option<PerformanceConfig> {
    env().read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// The installed configuration, or defaults.
pub fn current() -> PerformanceConfig {
    installed().unwrap_or_default()
}

/// Forget the installed configuration.
pub fn reset() {
    threading::instance::set_long_task_monitor_enabled(true);
    *env().write().unwrap_or_else(PoisonError::into_inner) = None;
}
