//! Boundary traits towards the host platform, the scripting runtimes and
//! the event reporter.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use threading::Actor;
use timing::PerformanceEntry;

use crate::report::ReportEvent;

/// The embedding view as seen from the performance pipeline.
pub trait HostFacade: Send {
    fn on_performance_event(&mut self, entry: Value);

    /// Legacy setup snapshot, in milliseconds.
    fn on_timing_setup(&mut self, timing: Value);

    /// Legacy update snapshot, in milliseconds.
    fn on_timing_update(&mut self, timing: Value, update_timing: Value, flag: &str);
}

/// Kinds of messages a scripting runtime accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageEventType {
    #[serde(rename = "sendGlobalEvent")]
    SendGlobalEvent,
}

impl MessageEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageEventType::SendGlobalEvent => "sendGlobalEvent",
        }
    }
}

/// A message posted to the background scripting runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event_type: MessageEventType,
    pub args: Value,
}

impl MessageEvent {
    /// A global event whose arguments are `[name, payload]`.
    pub fn global_event(name: &str, payload: Value) -> Self {
        Self {
            event_type: MessageEventType::SendGlobalEvent,
            args: json!([name, payload]),
        }
    }

    /// Name of a global event.
    pub fn name(&self) -> Option<&str> {
        self.args.get(0).and_then(Value::as_str)
    }

    /// Payload of a global event.
    pub fn payload(&self) -> Option<&Value> {
        self.args.get(1)
    }
}

/// Background scripting runtime.
pub trait RuntimeMessageSink: Send {
    fn on_receive_message_event(&mut self, event: MessageEvent);

    /// Begin teardown. `false` means callbacks are still pending and the
    /// runtime must be kept alive a while longer.
    fn try_to_destroy(&mut self) -> bool {
        true
    }
}

/// Main-thread scripting engine.
pub trait EngineEventBus: Send {
    fn trigger_event_bus(&mut self, name: &str, args: Value);
}

/// Sink of legacy report events.
pub trait EventTracker: Send + Sync {
    fn on_event(&self, instance_id: i32, event: ReportEvent);
}

/// Host-side receiver of performance entries.
pub trait PlatformPerformanceObserver: Send + Sync {
    fn on_performance_event(&self, entry: &PerformanceEntry);
}

pub type FacadeActor = Actor<Box<dyn HostFacade>>;
pub type RuntimeActor = Actor<Box<dyn RuntimeMessageSink>>;
pub type EngineActor = Actor<Box<dyn EngineEventBus>>;
