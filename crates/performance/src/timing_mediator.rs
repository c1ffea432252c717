//! Delivers legacy setup and update timings.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{json, Value};
use timing::constants::events;
use timing::{TimingHandlerDelegate, TimingInfo};

use crate::config::PerformanceConfig;
use crate::host::{EngineActor, EventTracker, FacadeActor, MessageEvent, RuntimeActor};
use crate::report::{build_setup_report, build_update_report, scope_update_timings};

/// Receives legacy timing dispatches and forwards them to the host, the
/// scripting side and the event tracker.
///
/// The host facade gets millisecond snapshots; the scripting side and the
/// tracker get fractional milliseconds.
pub struct TimingMediator {
    instance_id: AtomicI32,
    facade: Option<Arc<FacadeActor>>,
    runtime: RwLock<Option<Arc<RuntimeActor>>>,
    engine: Option<Arc<EngineActor>>,
    event_tracker: Option<Arc<dyn EventTracker>>,
    enable_js_runtime: bool,
    enable_air_strict_mode: bool,
}

impl TimingMediator {
    pub fn new(instance_id: i32, config: &PerformanceConfig) -> Self {
        Self {
            instance_id: AtomicI32::new(instance_id),
            facade: None,
            runtime: RwLock::new(None),
            engine: None,
            event_tracker: None,
            enable_js_runtime: config.enable_js_runtime,
            enable_air_strict_mode: config.enable_air_strict_mode,
        }
    }

    pub fn with_facade(mut self, facade: Arc<FacadeActor>) -> Self {
        self.facade = Some(facade);
        self
    }

    pub fn with_engine(mut self, engine: Arc<EngineActor>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_event_tracker(mut self, tracker: Arc<dyn EventTracker>) -> Self {
        self.event_tracker = Some(tracker);
        self
    }

    pub fn set_runtime_actor(&self, runtime: Option<Arc<RuntimeActor>>) {
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = runtime;
    }

    pub fn set_instance_id(&self, instance_id: i32) {
        self.instance_id.store(instance_id, Ordering::Release);
    }

    fn instance_id(&self) -> i32 {
        self.instance_id.load(Ordering::Acquire)
    }

    fn dispatch_to_scripting(&self, name: &'static str, timing: Value) {
        if self.enable_js_runtime {
            let runtime = self
                .runtime
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(runtime) = runtime {
                runtime.act_async(move |runtime| {
                    runtime.on_receive_message_event(MessageEvent::global_event(name, timing));
                });
                return;
            }
        }
        if self.enable_air_strict_mode {
            if let Some(engine) = &self.engine {
                engine.act_async(move |engine| engine.trigger_event_bus(name, json!([timing])));
            }
        }
    }
}

impl TimingHandlerDelegate for TimingMediator {
    fn on_timing_setup(&self, timing_info: &TimingInfo) {
        tracing::debug!(target: "performance", instance_id = self.instance_id(), "timing setup");
        if let Some(tracker) = &self.event_tracker {
            tracker.on_event(self.instance_id(), build_setup_report(timing_info));
        }
        if let Some(facade) = &self.facade {
            let timing = timing_info.all_timing_info(true);
            facade.act_async(move |facade| facade.on_timing_setup(timing));
        }
        self.dispatch_to_scripting(events::TIMING_SETUP, timing_info.all_timing_info(false));
    }

    fn on_timing_update(&self, timing_info: &TimingInfo, flag: &str) {
        tracing::debug!(target: "performance", instance_id = self.instance_id(), flag, "timing update");
        if let Some(tracker) = &self.event_tracker {
            tracker.on_event(self.instance_id(), build_update_report(timing_info, flag));
        }
        if let Some(facade) = &self.facade {
            let timing = timing_info.all_timing_info(true);
            let update = timing_info.update_timing_info(flag, true);
            let flag = flag.to_string();
            facade.act_async(move |facade| facade.on_timing_update(timing, update, &flag));
        }
        let timing = scope_update_timings(
            timing_info.all_timing_info(false),
            timing_info.update_timing_info(flag, false),
        );
        self.dispatch_to_scripting(events::TIMING_UPDATE, timing);
    }
}

impl std::fmt::Debug for TimingMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingMediator")
            .field("instance_id", &self.instance_id())
            .field("enable_js_runtime", &self.enable_js_runtime)
            .field("enable_air_strict_mode", &self.enable_air_strict_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EngineEventBus, HostFacade, RuntimeMessageSink};
    use crate::report::ReportEvent;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use threading::TaskRunner;
    use timing::constants::{keys, legacy};

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Debug)]
    enum Seen {
        Setup(Value),
        Update(Value, Value, String),
        Runtime(MessageEvent),
        Engine(String, Value),
    }

    struct Facade(mpsc::Sender<Seen>);

    impl HostFacade for Facade {
        fn on_performance_event(&mut self, _entry: Value) {}

        fn on_timing_setup(&mut self, timing: Value) {
            let _ = self.0.send(Seen::Setup(timing));
        }

        fn on_timing_update(&mut self, timing: Value, update_timing: Value, flag: &str) {
            let _ = self.0.send(Seen::Update(timing, update_timing, flag.to_string()));
        }
    }

    struct Runtime(mpsc::Sender<Seen>);

    impl RuntimeMessageSink for Runtime {
        fn on_receive_message_event(&mut self, event: MessageEvent) {
            let _ = self.0.send(Seen::Runtime(event));
        }
    }

    struct Engine(mpsc::Sender<Seen>);

    impl EngineEventBus for Engine {
        fn trigger_event_bus(&mut self, name: &str, args: Value) {
            let _ = self.0.send(Seen::Engine(name.to_string(), args));
        }
    }

    #[derive(Default)]
    struct Tracker(Mutex<Vec<(i32, ReportEvent)>>);

    impl EventTracker for Tracker {
        fn on_event(&self, instance_id: i32, event: ReportEvent) {
            self.0.lock().unwrap().push((instance_id, event));
        }
    }

    fn ready_setup_info() -> TimingInfo {
        let mut info = TimingInfo::new();
        info.set_enable_js_runtime(false);
        info.set_init_timing(keys::CREATE_LYNX_START, 1_000);
        info.set_init_timing(keys::CREATE_LYNX_END, 3_000);
        for (key, ts) in [
            (legacy::LOAD_TEMPLATE_START, 4_000),
            (legacy::LOAD_TEMPLATE_END, 5_000),
            (keys::LAYOUT_START, 5_500),
            (keys::LAYOUT_END, 6_000),
            (legacy::UI_OPERATION_FLUSH_START, 6_000),
            (legacy::UI_OPERATION_FLUSH_END, 7_000),
            (legacy::DRAW_END, 9_000),
        ] {
            info.set_setup_pipeline_timing(key, ts, "S");
        }
        info.prepare_before_dispatch_setup("S");
        info
    }

    #[test]
    fn test_setup_reaches_facade_runtime_and_tracker() {
        let (tx, rx) = mpsc::channel();
        let runner = TaskRunner::new("timing-mediator").unwrap();
        let tracker = Arc::new(Tracker::default());
        let mediator = TimingMediator::new(5, &PerformanceConfig::default())
            .with_facade(FacadeActor::new(Box::new(Facade(tx.clone())), runner.clone(), 5))
            .with_event_tracker(tracker.clone());
        mediator.set_runtime_actor(Some(RuntimeActor::new(Box::new(Runtime(tx)), runner, 5)));

        mediator.on_timing_setup(&ready_setup_info());

        let Seen::Setup(timing) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected the facade first");
        };
        assert_eq!(timing["setup_timing"]["draw_end"], 9);

        let Seen::Runtime(event) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected the runtime event");
        };
        assert_eq!(event.name(), Some("lynx.performance.timing.onSetup"));
        assert_eq!(event.payload().unwrap()["setup_timing"]["draw_end"], 9.0);

        let reports = tracker.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let (instance_id, report) = &reports[0];
        assert_eq!(*instance_id, 5);
        assert_eq!(report.name, "lynxsdk_setup_timing");
        assert_eq!(report.prop("create_lynx_view"), Some(&json!(2.0)));
        assert_eq!(report.prop("setup_layout"), Some(&json!(0.5)));
        assert_eq!(report.prop("setup_draw_waiting"), Some(&json!(4.0)));
        assert_eq!(report.prop("load_app"), Some(&json!(-3.0)));
    }

    #[test]
    fn test_update_scopes_update_timings_to_flag() {
        let (tx, rx) = mpsc::channel();
        let runner = TaskRunner::new("timing-mediator-update").unwrap();
        let mediator = TimingMediator::new(1, &PerformanceConfig::default())
            .with_facade(FacadeActor::new(Box::new(Facade(tx.clone())), runner.clone(), 1));
        mediator.set_runtime_actor(Some(RuntimeActor::new(Box::new(Runtime(tx)), runner, 1)));

        let mut info = ready_setup_info();
        info.set_pipeline_timing(keys::LAYOUT_END, 20_000, "U");
        info.prepare_before_dispatch_update("U", "myFlag");
        mediator.on_timing_update(&info, "myFlag");

        let Seen::Update(_, update, flag) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected the facade first");
        };
        assert_eq!(flag, "myFlag");
        assert_eq!(update["myFlag"]["layout_end"], 20);

        let Seen::Runtime(event) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected the runtime event");
        };
        assert_eq!(event.name(), Some("lynx.performance.timing.onUpdate"));
        let payload = event.payload().unwrap();
        assert_eq!(payload["update_timings"]["myFlag"]["layout_end"], 20.0);
    }

    #[test]
    fn test_air_strict_mode_uses_engine_event_bus() {
        let (tx, rx) = mpsc::channel();
        let runner = TaskRunner::new("timing-mediator-air").unwrap();
        let config = PerformanceConfig::default()
            .with_js_runtime(false)
            .with_air_strict_mode(true);
        let mediator = TimingMediator::new(1, &config)
            .with_engine(EngineActor::new(Box::new(Engine(tx)), runner, 1));

        mediator.on_timing_setup(&ready_setup_info());
        let Seen::Engine(name, args) = rx.recv_timeout(WAIT).unwrap() else {
            panic!("expected the engine event");
        };
        assert_eq!(name, "lynx.performance.timing.onSetup");
        assert!(args[0]["setup_timing"].is_object());
    }

    #[test]
    fn test_no_scripting_side_without_air_strict_mode() {
        let (tx, rx) = mpsc::channel();
        let runner = TaskRunner::new("timing-mediator-quiet").unwrap();
        let config = PerformanceConfig::default().with_js_runtime(false);
        let mediator = TimingMediator::new(1, &config)
            .with_engine(EngineActor::new(Box::new(Engine(tx)), runner, 1));
        mediator.on_timing_setup(&ready_setup_info());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
