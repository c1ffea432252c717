//! Per-view coordinator of timing and memory reporting.
//!
//! A [`PerformanceController`] lives inside an actor on the reporter runner.
//! Every entry its timing handler or memory monitor produces goes through
//! one [`EventDispatcher`], which stamps the view's instance id and fans the
//! entry out to the host observer and the scripting-side delegate.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::json;
use timing::constants::entry;
use timing::{
    EventTypes, PerformanceEntry, PerformanceEventSender, TimingHandler, TimingHandlerDelegate,
};

use crate::config::PerformanceConfig;
use crate::host::PlatformPerformanceObserver;
use crate::memory::MemoryMonitor;

/// Stamps and routes entries for one view.
pub struct EventDispatcher {
    instance_id: AtomicI32,
    platform: RwLock<Option<Arc<dyn PlatformPerformanceObserver>>>,
    delegate: Option<Arc<dyn PerformanceEventSender>>,
}

impl EventDispatcher {
    pub fn new(instance_id: i32, delegate: Option<Arc<dyn PerformanceEventSender>>) -> Self {
        Self {
            instance_id: AtomicI32::new(instance_id),
            platform: RwLock::new(None),
            delegate,
        }
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id.load(Ordering::Acquire)
    }

    pub fn set_instance_id(&self, instance_id: i32) {
        self.instance_id.store(instance_id, Ordering::Release);
    }

    pub fn set_platform_observer(&self, observer: Option<Arc<dyn PlatformPerformanceObserver>>) {
        *self.platform.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }
}

impl PerformanceEventSender for EventDispatcher {
    fn on_performance_event(&self, mut entry: PerformanceEntry, event_types: EventTypes) {
        entry.insert(entry::INSTANCE_ID.to_string(), json!(self.instance_id()));
        if event_types.contains(EventTypes::PLATFORM) {
            let platform = self
                .platform
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(platform) = platform {
                platform.on_performance_event(&entry);
            }
        }
        if let Some(delegate) = &self.delegate {
            delegate.on_performance_event(entry, event_types);
        }
    }

    fn set_enable_main_thread_callback(&self, enable: bool) {
        if let Some(delegate) = &self.delegate {
            delegate.set_enable_main_thread_callback(enable);
        }
    }
}

/// Owns the timing handler and memory monitor of one view.
pub struct PerformanceController {
    dispatcher: Arc<EventDispatcher>,
    timing_handler: TimingHandler,
    memory_monitor: MemoryMonitor,
}

impl PerformanceController {
    pub fn new(
        instance_id: i32,
        delegate: Option<Arc<dyn PerformanceEventSender>>,
        timing_delegate: Option<Arc<dyn TimingHandlerDelegate>>,
        config: &PerformanceConfig,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new(instance_id, delegate));
        let sender: Arc<dyn PerformanceEventSender> = dispatcher.clone();

        let mut timing_handler = TimingHandler::new(timing_delegate, Some(sender.clone()))
            .with_pipeline_map_limit(config.pipeline_map_limit);
        timing_handler.set_enable_js_runtime(config.enable_js_runtime);
        timing_handler.set_enable_background_runtime(config.enable_background_runtime);
        timing_handler.set_enable_engine_callback(config.enable_main_thread_engine_callback);
        timing_handler.set_thread_strategy(config.thread_strategy.as_u32());

        let memory_monitor = MemoryMonitor::new(config, Some(sender));

        tracing::debug!(
            target: "performance",
            instance_id,
            memory_monitor = memory_monitor.is_enabled(),
            "performance controller created"
        );
        Self {
            dispatcher,
            timing_handler,
            memory_monitor,
        }
    }

    pub fn instance_id(&self) -> i32 {
        self.dispatcher.instance_id()
    }

    pub fn set_instance_id(&mut self, instance_id: i32) {
        self.dispatcher.set_instance_id(instance_id);
    }

    pub fn set_platform_observer(&mut self, observer: Option<Arc<dyn PlatformPerformanceObserver>>) {
        self.dispatcher.set_platform_observer(observer);
    }

    /// Stamp `entry` with the instance id and deliver it.
    pub fn on_performance_event(&self, entry: PerformanceEntry, event_types: EventTypes) {
        self.dispatcher.on_performance_event(entry, event_types);
    }

    pub fn set_enable_main_thread_callback(&mut self, enable: bool) {
        self.dispatcher.set_enable_main_thread_callback(enable);
        self.timing_handler.set_enable_engine_callback(enable);
    }

    pub fn timing_handler(&self) -> &TimingHandler {
        &self.timing_handler
    }

    pub fn timing_handler_mut(&mut self) -> &mut TimingHandler {
        &mut self.timing_handler
    }

    pub fn memory_monitor(&self) -> &MemoryMonitor {
        &self.memory_monitor
    }

    pub fn memory_monitor_mut(&mut self) -> &mut MemoryMonitor {
        &mut self.memory_monitor
    }
}

impl std::fmt::Debug for PerformanceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceController")
            .field("instance_id", &self.instance_id())
            .field("timing_handler", &self.timing_handler)
            .field("memory_monitor", &self.memory_monitor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        entries: Mutex<Vec<(PerformanceEntry, EventTypes)>>,
        main_thread_callback: AtomicBool,
    }

    impl PerformanceEventSender for Recorder {
        fn on_performance_event(&self, entry: PerformanceEntry, event_types: EventTypes) {
            self.entries.lock().unwrap().push((entry, event_types));
        }

        fn set_enable_main_thread_callback(&self, enable: bool) {
            self.main_thread_callback.store(enable, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Observer {
        entries: Mutex<Vec<PerformanceEntry>>,
    }

    impl PlatformPerformanceObserver for Observer {
        fn on_performance_event(&self, entry: &PerformanceEntry) {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }

    fn named(name: &str) -> PerformanceEntry {
        let mut entry = Map::new();
        entry.insert("name".to_string(), json!(name));
        entry
    }

    #[test]
    fn test_entries_are_stamped_and_fanned_out() {
        let recorder = Arc::new(Recorder::default());
        let observer = Arc::new(Observer::default());
        let mut controller =
            PerformanceController::new(7, Some(recorder.clone()), None, &PerformanceConfig::default());
        controller.set_platform_observer(Some(observer.clone()));

        controller.on_performance_event(named("a"), EventTypes::PLATFORM | EventTypes::BTS);
        controller.on_performance_event(named("b"), EventTypes::BTS);

        let seen = observer.entries.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["instanceId"], 7);

        let delivered = recorder.entries.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].0["name"], "b");
        assert_eq!(delivered[1].0["instanceId"], 7);
        assert_eq!(delivered[1].1, EventTypes::BTS);
    }

    #[test]
    fn test_instance_id_can_change() {
        let recorder = Arc::new(Recorder::default());
        let mut controller =
            PerformanceController::new(1, Some(recorder.clone()), None, &PerformanceConfig::default());
        controller.set_instance_id(42);
        controller.on_performance_event(named("a"), EventTypes::ALL);
        assert_eq!(controller.instance_id(), 42);
        assert_eq!(recorder.entries.lock().unwrap()[0].0["instanceId"], 42);
    }

    #[test]
    fn test_main_thread_callback_reaches_delegate() {
        let recorder = Arc::new(Recorder::default());
        let mut controller =
            PerformanceController::new(1, Some(recorder.clone()), None, &PerformanceConfig::default());
        controller.set_enable_main_thread_callback(true);
        assert!(recorder.main_thread_callback.load(Ordering::SeqCst));
    }

    #[test]
    fn test_config_reaches_components() {
        let config = PerformanceConfig::default()
            .with_pipeline_map_limit(3)
            .with_memory_change_threshold_mb(400);
        let controller = PerformanceController::new(1, None, None, &config);
        assert_eq!(controller.memory_monitor().threshold_mb(), 255);
        assert!(!controller.timing_handler().is_pipeline_map_exceeded());
    }
}
