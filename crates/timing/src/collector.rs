//! Thread-local timing collection scoped to a pipeline.
//!
//! A [`TimingScope`] pushes a frame for one pipeline onto the calling
//! thread's stack. [`mark`] and friends write into the innermost frame
//! without locking. When the scope ends, normally or by unwinding, the
//! frame is forwarded to the delegate registered under the scope's
//! [`DelegateHandle`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use timing::collector::{self, register_delegate, Timing, TimingCollectorDelegate};
//! use timing::PipelineOptions;
//!
//! struct Sink(Mutex<Vec<Timing>>);
//! impl TimingCollectorDelegate for Sink {
//!     fn set_timing(&self, timing: Timing) {
//!         self.0.lock().unwrap().push(timing);
//!     }
//! }
//!
//! let sink = Arc::new(Sink(Mutex::new(Vec::new())));
//! let handle = register_delegate(sink.clone());
//! let options = PipelineOptions::new("loadBundle").with_need_timestamps(true);
//! {
//!     timing::timing_scope!(handle, &options);
//!     collector::mark("layout_start");
//! }
//! assert_eq!(sink.0.lock().unwrap().len(), 1);
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::pipeline::{PipelineId, PipelineOptions};
use crate::timing_map::{current_timestamp_us, TimestampUs, TimingMap};

/// Timestamps gathered for one pipeline on one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timing {
    pub pipeline_id: PipelineId,
    pub timings: TimingMap,
    pub framework_timings: TimingMap,
}

impl Timing {
    pub fn is_empty(&self) -> bool {
        self.timings.is_empty() && self.framework_timings.is_empty()
    }
}

/// Receiver of finished frames.
pub trait TimingCollectorDelegate: Send + Sync {
    fn set_timing(&self, timing: Timing);
}

/// Non-owning reference to a registered delegate.
///
/// Stale handles (delegate unregistered, slot reused) resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    delegate: Option<Arc<dyn TimingCollectorDelegate>>,
}

/// Slot table mapping [`DelegateHandle`]s to delegates.
///
/// The process uses one global table through [`register_delegate`] and
/// friends; separate tables are useful for embedding and tests.
#[derive(Default)]
pub struct DelegateRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, delegate: Arc<dyn TimingCollectorDelegate>) -> DelegateHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.delegate = Some(delegate);
            return DelegateHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            delegate: Some(delegate),
        });
        DelegateHandle {
            index,
            generation: 0,
        }
    }

    pub fn unregister(&mut self, handle: DelegateHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.delegate.is_none() {
            return false;
        }
        slot.delegate = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        true
    }

    pub fn resolve(&self, handle: DelegateHandle) -> Option<Arc<dyn TimingCollectorDelegate>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.delegate.clone())
    }

    /// Drop every delegate. Outstanding handles become stale.
    pub fn reset(&mut self) -> usize {
        let mut dropped = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.delegate.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                dropped += 1;
            }
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.delegate.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static REGISTRY: OnceLock<RwLock<DelegateRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<DelegateRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(DelegateRegistry::default()))
}

/// Register a delegate and get a handle for scopes to forward to.
pub fn register_delegate(delegate: Arc<dyn TimingCollectorDelegate>) -> DelegateHandle {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(delegate)
}

/// Invalidate `handle`. Returns false if it was already stale.
pub fn unregister_delegate(handle: DelegateHandle) -> bool {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .unregister(handle)
}

/// Delegate behind `handle`, if still registered.
pub fn resolve_delegate(handle: DelegateHandle) -> Option<Arc<dyn TimingCollectorDelegate>> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .resolve(handle)
}

/// Drop every registered delegate, returning how many were held.
pub fn reset_delegates() -> usize {
    let dropped = registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .reset();
    tracing::debug!(target: "timing", dropped, "timing delegates reset");
    dropped
}

struct Frame {
    handle: DelegateHandle,
    timing: Timing,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Guard owning one frame on the current thread's stack.
///
/// Inert when the pipeline did not ask for timestamps.
pub struct TimingScope {
    depth: Option<usize>,
    // Frames are thread-local; the guard must stay on its thread.
    _not_send: PhantomData<*const ()>,
}

impl TimingScope {
    pub fn new(handle: DelegateHandle, options: &PipelineOptions) -> Self {
        if !options.need_timestamps {
            return Self {
                depth: None,
                _not_send: PhantomData,
            };
        }
        let depth = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(Frame {
                handle,
                timing: Timing {
                    pipeline_id: options.pipeline_id.clone(),
                    ..Timing::default()
                },
            });
            frames.len() - 1
        });
        Self {
            depth: Some(depth),
            _not_send: PhantomData,
        }
    }

    pub fn is_active(&self) -> bool {
        self.depth.is_some()
    }
}

impl Drop for TimingScope {
    fn drop(&mut self) {
        let Some(depth) = self.depth else {
            return;
        };
        let finished: Vec<Frame> = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if depth < frames.len() {
                frames.split_off(depth)
            } else {
                Vec::new()
            }
        });
        // Innermost frames first if inner guards were leaked.
        for frame in finished.into_iter().rev() {
            forward(frame);
        }
    }
}

fn forward(frame: Frame) {
    if frame.timing.is_empty() {
        return;
    }
    match resolve_delegate(frame.handle) {
        Some(delegate) => delegate.set_timing(frame.timing),
        None => tracing::debug!(
            target: "timing",
            pipeline_id = %frame.timing.pipeline_id,
            "timing frame dropped, delegate gone"
        ),
    }
}

fn with_top_frame(write: impl FnOnce(&mut Timing) -> bool) -> bool {
    FRAMES.with(|frames| {
        frames
            .borrow_mut()
            .last_mut()
            .map(|frame| write(&mut frame.timing))
            .unwrap_or(false)
    })
}

/// Record `key` at the current time in the innermost frame.
pub fn mark(key: &str) -> bool {
    mark_at(key, current_timestamp_us())
}

/// Record `key` at `timestamp` in the innermost frame.
pub fn mark_at(key: &str, timestamp: TimestampUs) -> bool {
    with_top_frame(|timing| timing.timings.set(key, timestamp))
}

/// Record a framework-produced key in the innermost frame.
pub fn mark_framework_timing(key: &str, timestamp: TimestampUs) -> bool {
    with_top_frame(|timing| timing.framework_timings.set(key, timestamp))
}

/// Pipeline id of the innermost frame, if one is open.
pub fn current_pipeline_id() -> Option<PipelineId> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .last()
            .map(|frame| frame.timing.pipeline_id.clone())
    })
}

/// Open a [`TimingScope`] until the end of the enclosing block.
#[macro_export]
macro_rules! timing_scope {
    ($handle:expr, $options:expr) => {
        let _timing_scope = $crate::collector::TimingScope::new($handle, $options);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Timing>>,
    }

    impl TimingCollectorDelegate for Recorder {
        fn set_timing(&self, timing: Timing) {
            self.frames.lock().unwrap().push(timing);
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions::new("loadBundle").with_need_timestamps(true)
    }

    #[test]
    fn test_reset_invalidates_every_handle() {
        let mut registry = DelegateRegistry::new();
        let first = registry.register(Arc::new(Recorder::default()));
        let second = registry.register(Arc::new(Recorder::default()));
        assert!(registry.unregister(first));
        let third = registry.register(Arc::new(Recorder::default()));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.reset(), 2);
        assert!(registry.is_empty());
        assert!(registry.resolve(second).is_none());
        assert!(registry.resolve(third).is_none());
        assert!(!registry.unregister(second));

        // Reused slots hand out fresh generations.
        let fourth = registry.register(Arc::new(Recorder::default()));
        assert!(registry.resolve(fourth).is_some());
        assert!(registry.resolve(second).is_none());
        assert!(registry.resolve(third).is_none());
    }

    #[test]
    fn test_scope_forwards_on_exit() {
        let recorder = Arc::new(Recorder::default());
        let handle = register_delegate(recorder.clone());
        let options = options();
        {
            let _scope = TimingScope::new(handle, &options);
            assert!(mark_at("layout_start", 10));
            assert!(mark_framework_timing("dsl_render_start", 11));
            assert_eq!(current_pipeline_id(), Some(options.pipeline_id.clone()));
        }
        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pipeline_id, options.pipeline_id);
        assert_eq!(frames[0].timings.get("layout_start"), Some(10));
        assert_eq!(frames[0].framework_timings.get("dsl_render_start"), Some(11));
    }

    #[test]
    fn test_nested_scopes_write_innermost() {
        let recorder = Arc::new(Recorder::default());
        let handle = register_delegate(recorder.clone());
        let outer = options();
        let inner = options();
        {
            let _outer = TimingScope::new(handle, &outer);
            mark_at("a", 1);
            {
                let _inner = TimingScope::new(handle, &inner);
                mark_at("b", 2);
            }
            mark_at("c", 3);
        }
        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pipeline_id, inner.pipeline_id);
        assert!(frames[0].timings.contains("b"));
        assert!(frames[1].timings.has_all(&["a", "c"]));
    }

    #[test]
    fn test_scope_forwards_while_unwinding() {
        let recorder = Arc::new(Recorder::default());
        let handle = register_delegate(recorder.clone());
        let options = options();
        let result = std::panic::catch_unwind(|| {
            let _scope = TimingScope::new(handle, &options);
            mark_at("paint_end", 5);
            panic!("render failed");
        });
        assert!(result.is_err());
        assert_eq!(recorder.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_inert_scope_and_no_frame() {
        let recorder = Arc::new(Recorder::default());
        let handle = register_delegate(recorder.clone());
        let options = PipelineOptions::new("update");
        {
            let scope = TimingScope::new(handle, &options);
            assert!(!scope.is_active());
            assert!(!mark("layout_start"));
        }
        assert!(recorder.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_handle_drops_frame() {
        let recorder = Arc::new(Recorder::default());
        let handle = register_delegate(recorder.clone());
        assert!(unregister_delegate(handle));
        assert!(!unregister_delegate(handle));
        assert!(resolve_delegate(handle).is_none());

        let reused = register_delegate(Arc::new(Recorder::default()));
        assert_ne!(reused, handle);
        assert!(resolve_delegate(handle).is_none());

        let options = options();
        {
            let _scope = TimingScope::new(handle, &options);
            mark_at("layout_start", 1);
        }
        assert!(recorder.frames.lock().unwrap().is_empty());
    }
}
