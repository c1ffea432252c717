//! A view's runtime wiring: runners, actors, queues and performance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use performance::{
    EngineActor, EngineEventBus, EventTracker, FacadeActor, HostFacade, MemoryRecord,
    PerformanceConfig, PerformanceController, PerformanceMediator, PlatformPerformanceObserver,
    RuntimeActor, RuntimeMessageSink, TimingMediator,
};
use serde_json::Value;
use threading::{
    global_release_holder, Actor, DelayedReleaseHolder, ReleaseKey, TaskRunner,
    TaskRunnerManufactor, DEFAULT_RELEASE_TIMEOUT,
};
use timing::collector::{register_delegate, unregister_delegate};
use timing::{
    DelegateHandle, PerformanceEntry, PerformanceEventSender, PipelineOptions, TimestampUs,
    Timing, TimingCollectorDelegate, TimingHandlerDelegate,
};

use crate::operation_queue::LayoutResultManager;
use crate::thread_mode::{ThreadModeAutoSwitch, ThreadModeManager};
use crate::ui_operation_queue::DynamicUiOperationQueue;

type ControllerActor = Actor<PerformanceController>;

/// Forwards host-bound entries to the facade on the UI thread.
struct FacadeObserver {
    facade: Arc<FacadeActor>,
}

impl PlatformPerformanceObserver for FacadeObserver {
    fn on_performance_event(&self, entry: &PerformanceEntry) {
        let entry = Value::Object(entry.clone());
        self.facade
            .act_async(move |facade| facade.on_performance_event(entry));
    }
}

/// Producer-side entry point to a view's performance controller.
///
/// Every call posts to the controller on the reporter runner; producers
/// never touch timing state directly.
pub struct PerformanceApi {
    controller: Arc<ControllerActor>,
    timing_mediator: Arc<TimingMediator>,
}

impl PerformanceApi {
    fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut PerformanceController) + Send + 'static,
    {
        self.controller.act_async(f);
    }

    pub fn on_pipeline_start(&self, options: &PipelineOptions) {
        let pipeline_id = options.pipeline_id.clone();
        let origin = options.origin.clone();
        let start_us = options.start_timestamp_us;
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .on_pipeline_start(&pipeline_id, &origin, start_us);
        });
    }

    pub fn bind_pipeline_id_with_timing_flag(&self, pipeline_id: &str, flag: &str) {
        let (pipeline_id, flag) = (pipeline_id.to_string(), flag.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .bind_pipeline_id_with_timing_flag(&pipeline_id, &flag);
        });
    }

    pub fn set_timing(&self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        let (key, pipeline_id) = (key.to_string(), pipeline_id.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_timing(&key, timestamp, &pipeline_id);
        });
    }

    pub fn set_framework_timing(&self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        let (key, pipeline_id) = (key.to_string(), pipeline_id.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_framework_timing(&key, timestamp, &pipeline_id);
        });
    }

    pub fn set_framework_extra_timing_info(&self, pipeline_id: &str, key: &str, value: &str) {
        let (pipeline_id, key, value) = (pipeline_id.to_string(), key.to_string(), value.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_framework_extra_timing_info(&pipeline_id, &key, &value);
        });
    }

    pub fn set_host_platform_timing(&self, key: &str, timestamp: TimestampUs, pipeline_id: &str) {
        let (key, pipeline_id) = (key.to_string(), pipeline_id.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_host_platform_timing(&key, timestamp, &pipeline_id);
        });
    }

    pub fn set_host_platform_timing_extra_info(&self, pipeline_id: &str, key: &str, value: &str) {
        let (pipeline_id, key, value) = (pipeline_id.to_string(), key.to_string(), value.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_host_platform_timing_extra_info(&pipeline_id, &key, &value);
        });
    }

    pub fn set_timing_with_timing_flag(&self, flag: &str, key: &str, timestamp: TimestampUs) {
        let (flag, key) = (flag.to_string(), key.to_string());
        self.post(move |controller| {
            controller
                .timing_handler_mut()
                .set_timing_with_timing_flag(&flag, &key, timestamp);
        });
    }

    pub fn set_url(&self, url: &str) {
        let url = url.to_string();
        self.post(move |controller| controller.timing_handler_mut().set_url(&url));
    }

    pub fn enable_ssr(&self, url: &str, data_size: u64) {
        let url = url.to_string();
        self.post(move |controller| {
            controller.timing_handler_mut().enable_ssr(&url, data_size);
        });
    }

    /// Forget pipeline state before the template reloads.
    pub fn reset_timing_before_reload(&self) {
        self.post(|controller| controller.timing_handler_mut().reset_timing_before_reload());
    }

    pub fn clear_pipeline_timing_info(&self) {
        self.post(|controller| controller.timing_handler_mut().clear_pipeline_timing_info());
    }

    pub fn release_timing(&self, pipeline_id: &str) {
        let pipeline_id = pipeline_id.to_string();
        self.post(move |controller| controller.timing_handler_mut().release_timing(&pipeline_id));
    }

    pub fn clear_container_timing_info(&self) {
        self.post(|controller| controller.timing_handler_mut().clear_extra_timing_info());
    }

    pub fn set_instance_id(&self, instance_id: i32) {
        self.timing_mediator.set_instance_id(instance_id);
        self.post(move |controller| controller.set_instance_id(instance_id));
    }

    pub fn set_enable_main_thread_callback(&self, enable: bool) {
        self.post(move |controller| controller.set_enable_main_thread_callback(enable));
    }

    pub fn set_platform_observer(&self, observer: Option<Arc<dyn PlatformPerformanceObserver>>) {
        self.post(move |controller| controller.set_platform_observer(observer));
    }

    pub fn allocate_memory(&self, record: MemoryRecord) {
        self.post(move |controller| controller.memory_monitor_mut().allocate(record));
    }

    pub fn deallocate_memory(&self, record: MemoryRecord) {
        self.post(move |controller| controller.memory_monitor_mut().deallocate(record));
    }

    pub fn update_memory(&self, record: MemoryRecord) {
        self.post(move |controller| controller.memory_monitor_mut().update(record));
    }

    pub fn update_scripting_engine_memory(&self, info: HashMap<String, String>) {
        self.post(move |controller| {
            controller
                .memory_monitor_mut()
                .update_scripting_engine(info);
        });
    }

    /// Deep copy of the legacy timing record, in milliseconds.
    pub fn all_timing_info(&self) -> anyhow::Result<Value> {
        self.controller
            .act_sync(|controller| controller.timing_handler().all_timing_info())
            .context("reading timing info")
    }

    /// Memory threshold word for the scripting engine.
    pub fn scripting_engine_mode(&self) -> anyhow::Result<u32> {
        self.controller
            .act_sync(|controller| controller.memory_monitor().scripting_engine_mode())
            .context("reading scripting engine mode")
    }

    /// Wait until everything posted so far has been processed.
    pub fn sync(&self) -> anyhow::Result<()> {
        self.controller
            .runner()
            .barrier()
            .context("waiting for the reporter runner")
    }
}

impl TimingCollectorDelegate for PerformanceApi {
    fn set_timing(&self, timing: Timing) {
        self.post(move |controller| controller.timing_handler_mut().set_timing_frame(timing));
    }
}

/// Key of a runtime parked at destroy, to release it early.
#[derive(Clone)]
pub struct RuntimeRelease {
    holder: Arc<DelayedReleaseHolder>,
    key: ReleaseKey,
}

impl std::fmt::Debug for RuntimeRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRelease").field("key", &self.key).finish()
    }
}

impl RuntimeRelease {
    /// Signal that the runtime finished its pending work.
    pub fn release(&self) -> bool {
        self.holder.release(self.key)
    }

    pub fn is_pending(&self) -> bool {
        self.holder.is_held(self.key)
    }
}

/// Builder for [`Shell`].
pub struct ShellBuilder {
    instance_id: i32,
    config: Option<PerformanceConfig>,
    ui_runner: Option<TaskRunner>,
    js_group_name: Option<String>,
    facade: Option<Box<dyn HostFacade>>,
    engine: Option<Box<dyn EngineEventBus>>,
    runtime: Option<Box<dyn RuntimeMessageSink>>,
    platform_observer: Option<Arc<dyn PlatformPerformanceObserver>>,
    event_tracker: Option<Arc<dyn EventTracker>>,
    release_holder: Option<Arc<DelayedReleaseHolder>>,
    release_timeout: Duration,
    enable_performance: bool,
}

impl ShellBuilder {
    pub fn new(instance_id: i32) -> Self {
        Self {
            instance_id,
            config: None,
            ui_runner: None,
            js_group_name: None,
            facade: None,
            engine: None,
            runtime: None,
            platform_observer: None,
            event_tracker: None,
            release_holder: None,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            enable_performance: true,
        }
    }

    /// Use `config` instead of the process env.
    pub fn config(mut self, config: PerformanceConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn ui_runner(mut self, runner: TaskRunner) -> Self {
        self.ui_runner = Some(runner);
        self
    }

    /// Share the JS runner with every shell of the same group.
    pub fn js_group(mut self, group_name: &str) -> Self {
        self.js_group_name = Some(group_name.to_string());
        self
    }

    pub fn facade(mut self, facade: Box<dyn HostFacade>) -> Self {
        self.facade = Some(facade);
        self
    }

    pub fn engine(mut self, engine: Box<dyn EngineEventBus>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn runtime(mut self, runtime: Box<dyn RuntimeMessageSink>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Receive host-bound entries directly instead of via the facade.
    pub fn platform_observer(mut self, observer: Arc<dyn PlatformPerformanceObserver>) -> Self {
        self.platform_observer = Some(observer);
        self
    }

    pub fn event_tracker(mut self, tracker: Arc<dyn EventTracker>) -> Self {
        self.event_tracker = Some(tracker);
        self
    }

    pub fn release_holder(mut self, holder: Arc<DelayedReleaseHolder>) -> Self {
        self.release_holder = Some(holder);
        self
    }

    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Build without a performance controller; producer calls are dropped.
    pub fn disable_performance(mut self) -> Self {
        self.enable_performance = false;
        self
    }

    pub fn build(self) -> anyhow::Result<Shell> {
        let config = self.config.unwrap_or_else(performance::env::current);
        let id = self.instance_id;
        let runners = match self.ui_runner {
            Some(ui) => TaskRunnerManufactor::with_ui_runner(
                config.thread_strategy,
                ui,
                self.js_group_name.as_deref(),
            ),
            None => TaskRunnerManufactor::new(config.thread_strategy, self.js_group_name.as_deref()),
        }
        .context("creating task runners")?;

        let has_facade = self.facade.is_some();
        let facade = FacadeActor::with_enabled(self.facade, runners.ui_runner().clone(), id, has_facade);
        let has_engine = self.engine.is_some();
        let engine =
            EngineActor::with_enabled(self.engine, runners.engine_runner().clone(), id, has_engine);
        let runtime = self
            .runtime
            .map(|runtime| RuntimeActor::new(runtime, runners.js_runner().clone(), id));

        let perf_mediator = Arc::new(PerformanceMediator::new());
        perf_mediator.set_runtime_actor(runtime.clone());
        perf_mediator.set_engine_actor(Some(engine.clone()));

        let mut timing_mediator = TimingMediator::new(id, &config)
            .with_facade(facade.clone())
            .with_engine(engine.clone());
        if let Some(tracker) = self.event_tracker {
            timing_mediator = timing_mediator.with_event_tracker(tracker);
        }
        timing_mediator.set_runtime_actor(runtime.clone());
        let timing_mediator = Arc::new(timing_mediator);

        let platform_observer = match self.platform_observer {
            Some(observer) => Some(observer),
            None if has_facade => Some(Arc::new(FacadeObserver {
                facade: facade.clone(),
            }) as Arc<dyn PlatformPerformanceObserver>),
            None => None,
        };

        let controller = if self.enable_performance {
            let mut controller = PerformanceController::new(
                id,
                Some(perf_mediator.clone() as Arc<dyn PerformanceEventSender>),
                Some(timing_mediator.clone() as Arc<dyn TimingHandlerDelegate>),
                &config,
            );
            controller.set_platform_observer(platform_observer);
            controller.set_enable_main_thread_callback(config.enable_main_thread_engine_callback);
            Some(controller)
        } else {
            None
        };
        let enabled = controller.is_some();
        let controller =
            ControllerActor::with_enabled(controller, runners.reporter_runner().clone(), id, enabled);

        let performance = Arc::new(PerformanceApi {
            controller: controller.clone(),
            timing_mediator: timing_mediator.clone(),
        });
        let collector = register_delegate(performance.clone());

        let ui_queue = Arc::new(DynamicUiOperationQueue::new(
            config.thread_strategy,
            runners.ui_runner().clone(),
        ));
        let thread_mode = ThreadModeManager::new(
            runners.ui_runner().clone(),
            runners.engine_runner().clone(),
            ui_queue.clone(),
        );

        tracing::info!(
            target: "shell",
            instance_id = id,
            strategy = ?config.thread_strategy,
            performance = enabled,
            runtime = runtime.is_some(),
            "shell created"
        );

        Ok(Shell {
            instance_id: id,
            runners,
            facade,
            engine,
            runtime,
            controller,
            perf_mediator,
            timing_mediator,
            performance,
            collector,
            ui_queue,
            operation_queue: Arc::new(LayoutResultManager::new()),
            thread_mode,
            release_holder: self
                .release_holder
                .unwrap_or_else(|| Arc::clone(global_release_holder())),
            release_timeout: self.release_timeout,
            destroyed: false,
        })
    }
}

/// Everything one view runs on.
pub struct Shell {
    instance_id: i32,
    runners: TaskRunnerManufactor,
    facade: Arc<FacadeActor>,
    engine: Arc<EngineActor>,
    runtime: Option<Arc<RuntimeActor>>,
    controller: Arc<ControllerActor>,
    perf_mediator: Arc<PerformanceMediator>,
    timing_mediator: Arc<TimingMediator>,
    performance: Arc<PerformanceApi>,
    collector: DelegateHandle,
    ui_queue: Arc<DynamicUiOperationQueue>,
    operation_queue: Arc<LayoutResultManager>,
    thread_mode: ThreadModeManager,
    release_holder: Arc<DelayedReleaseHolder>,
    release_timeout: Duration,
    destroyed: bool,
}

impl Shell {
    pub fn builder(instance_id: i32) -> ShellBuilder {
        ShellBuilder::new(instance_id)
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn runners(&self) -> &TaskRunnerManufactor {
        &self.runners
    }

    pub fn performance(&self) -> &Arc<PerformanceApi> {
        &self.performance
    }

    /// Handle for timing scopes opened by this view's producers.
    pub fn timing_collector(&self) -> DelegateHandle {
        self.collector
    }

    pub fn facade(&self) -> &Arc<FacadeActor> {
        &self.facade
    }

    pub fn engine(&self) -> &Arc<EngineActor> {
        &self.engine
    }

    pub fn runtime(&self) -> Option<&Arc<RuntimeActor>> {
        self.runtime.as_ref()
    }

    pub fn ui_operation_queue(&self) -> &Arc<DynamicUiOperationQueue> {
        &self.ui_queue
    }

    pub fn operation_queue(&self) -> &Arc<LayoutResultManager> {
        &self.operation_queue
    }

    /// Run engine work on the UI thread until the guard drops.
    pub fn thread_mode_auto_switch(&self) -> ThreadModeAutoSwitch<'_> {
        ThreadModeAutoSwitch::new(&self.thread_mode)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Tear the view down.
    ///
    /// Each actor's value is dropped on its own runner. A runtime that
    /// still has callbacks pending is parked in the release holder and
    /// returned as a [`RuntimeRelease`].
    pub fn destroy(&mut self) -> Option<RuntimeRelease> {
        if self.destroyed {
            return None;
        }
        self.destroyed = true;

        unregister_delegate(self.collector);
        self.ui_queue.destroy();
        self.release_controller();
        self.perf_mediator.set_runtime_actor(None);
        self.perf_mediator.set_engine_actor(None);
        self.timing_mediator.set_runtime_actor(None);

        self.facade.release_on_runner();
        self.engine.release_on_runner();

        let parked = self.runtime.take().and_then(|runtime| self.destroy_runtime(runtime));
        tracing::info!(
            target: "shell",
            instance_id = self.instance_id,
            runtime_parked = parked.is_some(),
            "shell destroyed"
        );
        parked
    }

    /// Drop the controller and wait for it, so the memory monitor's final
    /// report is posted while the facade and runtime are still attached.
    fn release_controller(&self) {
        let runner = self.controller.runner();
        if runner.runs_tasks_on_current_thread() {
            drop(self.controller.release());
            return;
        }
        self.controller.release_on_runner();
        if let Err(err) = runner.barrier() {
            tracing::warn!(target: "shell", error = %err, "controller release not confirmed");
        }
    }

    fn destroy_runtime(&self, runtime: Arc<RuntimeActor>) -> Option<RuntimeRelease> {
        let finished = match runtime.act_sync(|runtime| runtime.try_to_destroy()) {
            Ok(finished) => finished,
            Err(err) => {
                tracing::debug!(target: "shell", error = %err, "runtime already gone");
                true
            }
        };
        if finished {
            runtime.release_on_runner();
            return None;
        }
        let value = runtime.release()?;
        let key = self.release_holder.hold(
            runtime.runner().clone(),
            value,
            self.release_timeout,
        );
        Some(RuntimeRelease {
            holder: self.release_holder.clone(),
            key,
        })
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("instance_id", &self.instance_id)
            .field("strategy", &self.runners.strategy())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
