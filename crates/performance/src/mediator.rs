//! Routes performance entries to the scripting runtimes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{json, Value};
use timing::constants::events;
use timing::{EventTypes, PerformanceEntry, PerformanceEventSender};

use crate::host::{EngineActor, MessageEvent, RuntimeActor};

/// Delivers entries addressed to the background runtime or the
/// main-thread engine by posting to their actors.
#[derive(Default)]
pub struct PerformanceMediator {
    runtime: RwLock<Option<Arc<RuntimeActor>>>,
    engine: RwLock<Option<Arc<EngineActor>>>,
    enable_main_thread_callback: AtomicBool,
}

impl PerformanceMediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_runtime_actor(&self, runtime: Option<Arc<RuntimeActor>>) {
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = runtime;
    }

    pub fn set_engine_actor(&self, engine: Option<Arc<EngineActor>>) {
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = engine;
    }

    pub fn main_thread_callback_enabled(&self) -> bool {
        self.enable_main_thread_callback.load(Ordering::Acquire)
    }

    fn runtime(&self) -> Option<Arc<RuntimeActor>> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn engine(&self) -> Option<Arc<EngineActor>> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PerformanceEventSender for PerformanceMediator {
    fn on_performance_event(&self, entry: PerformanceEntry, event_types: EventTypes) {
        let entry = Value::Object(entry);
        if event_types.contains(EventTypes::MTS) && self.main_thread_callback_enabled() {
            if let Some(engine) = self.engine() {
                let args = json!([entry.clone()]);
                engine.act_async(move |engine| {
                    engine.trigger_event_bus(events::PERFORMANCE_EVENT, args);
                });
            }
        }
        if event_types.contains(EventTypes::BTS) {
            match self.runtime() {
                Some(runtime) => runtime.act_async(move |runtime| {
                    runtime.on_receive_message_event(MessageEvent::global_event(
                        events::PERFORMANCE_EVENT,
                        entry,
                    ));
                }),
                None => tracing::trace!(target: "performance", "no runtime for performance entry"),
            }
        }
    }

    fn set_enable_main_thread_callback(&self, enable: bool) {
        self.enable_main_thread_callback
            .store(enable, Ordering::Release);
    }
}
