//! Computation Implementation
//!
//! A Computation is a re-runnable unit of reactive work. It wraps a body
//! that receives the computation itself, so anything the body reads can
//! subscribe it via [`Dependency::depend`](super::Dependency::depend).
//!
//! # Lifecycle
//!
//! 1. [`ReactiveRuntime::autorun`](super::ReactiveRuntime::autorun) creates
//!    the computation and runs the body once, synchronously, with
//!    [`first_run`](Computation::first_run) set.
//!
//! 2. When a dependency it read calls `changed()`, the computation is
//!    invalidated: its invalidation hooks fire (which is how dependencies
//!    drop it from their subscriber sets) and it is queued on the runtime.
//!
//! 3. The next flush re-runs the body, which re-establishes whatever
//!    subscriptions the new run needs.
//!
//! 4. [`stop`](Computation::stop) ends the cycle. A stopped computation is
//!    invalidated one last time, never re-runs, and releases its body.
//!
//! # Threading
//!
//! The body is behind a mutex, so a computation never runs twice at once.
//! State flags live in a separate lock that is never held while user code
//! (the body or a hook) executes.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::runtime::{ReactiveRuntime, RuntimeInner};
use super::subscriber::ComputationId;
use crate::error::panic_message;

/// The user function driven by a computation.
pub(crate) type Body = Box<dyn FnMut(&Computation) + Send>;

/// A one-shot callback attached to an invalidation or stop.
type Hook = Box<dyn FnOnce(&Computation) + Send>;

/// Handle to a reactive computation.
///
/// Cloning the handle does not clone the computation; all clones refer to
/// the same unit of work and compare equal.
///
/// Every dependency the computation subscribed to holds it, and the body
/// usually holds those dependencies in turn, so dropping the last handle
/// does not end it. Call [`stop`](Self::stop) to release the body and its
/// subscriptions.
#[derive(Clone)]
pub struct Computation {
    inner: Arc<ComputationInner>,
}

struct ComputationInner {
    id: ComputationId,

    /// Runtime that re-runs this computation after invalidation.
    runtime: Weak<RuntimeInner>,

    state: Mutex<ComputationState>,

    /// `None` once the computation is stopped and the body was released.
    body: Mutex<Option<Body>>,
}

struct ComputationState {
    stopped: bool,
    invalidated: bool,
    first_run: bool,
    /// Bumped at the start of every run. Subscriptions record it so a
    /// hook left over from an earlier run cannot drop a newer one.
    generation: u64,
    /// Set while a flush is re-running this computation. Invalidations
    /// that arrive meanwhile are picked up by the flush loop itself.
    recomputing: bool,
    on_invalidate: SmallVec<[Hook; 4]>,
    on_stop: SmallVec<[Hook; 1]>,
}

impl Computation {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, body: Body) -> Self {
        Self {
            inner: Arc::new(ComputationInner {
                id: ComputationId::next(),
                runtime,
                state: Mutex::new(ComputationState {
                    stopped: false,
                    invalidated: false,
                    first_run: true,
                    generation: 0,
                    recomputing: false,
                    on_invalidate: SmallVec::new(),
                    on_stop: SmallVec::new(),
                }),
                body: Mutex::new(Some(body)),
            }),
        }
    }

    /// Get the computation's unique ID.
    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    /// True only while the body executes for the very first time.
    pub fn first_run(&self) -> bool {
        self.inner.state.lock().first_run
    }

    /// The run the computation is in, or last finished.
    pub(crate) fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Whether the computation is waiting to re-run (or is stopped).
    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().invalidated
    }

    /// Invalidate the computation and schedule a re-run.
    ///
    /// Invalidation hooks run once per invalidation, before the re-run is
    /// queued, so a re-run on another thread never races them.
    /// Invalidating an already invalid computation does nothing.
    pub fn invalidate(&self) {
        let (schedule, hooks) = {
            let mut state = self.inner.state.lock();
            if state.invalidated {
                return;
            }
            let schedule = !state.recomputing && !state.stopped;
            state.invalidated = true;
            (schedule, std::mem::take(&mut state.on_invalidate))
        };

        for hook in hooks {
            hook(self);
        }

        if schedule {
            if let Some(runtime) = self.inner.runtime.upgrade() {
                ReactiveRuntime::from_inner(runtime).schedule(self.clone());
            }
        }
    }

    /// Stop the computation. Idempotent.
    ///
    /// The computation is invalidated (so every dependency drops it), its
    /// stop hooks run exactly once, and it will never run again.
    pub fn stop(&self) {
        let hooks = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.on_stop)
        };

        tracing::debug!(computation = %self.id(), "stopping computation");

        self.invalidate();
        for hook in hooks {
            hook(self);
        }

        // If the body is running right now, `run` releases it on return.
        if let Some(mut body) = self.inner.body.try_lock() {
            body.take();
        }
    }

    /// Register a hook for the next invalidation.
    ///
    /// Runs immediately if the computation is already invalidated.
    pub fn on_invalidate<F>(&self, hook: F)
    where
        F: FnOnce(&Computation) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.invalidated {
            drop(state);
            hook(self);
        } else {
            state.on_invalidate.push(Box::new(hook));
        }
    }

    /// Register a hook for when the computation stops.
    ///
    /// Runs immediately if the computation is already stopped.
    pub fn on_stop<F>(&self, hook: F)
    where
        F: FnOnce(&Computation) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.stopped {
            drop(state);
            hook(self);
        } else {
            state.on_stop.push(Box::new(hook));
        }
    }

    /// Execute the body once.
    pub(crate) fn run(&self) {
        {
            let mut state = self.inner.state.lock();
            state.invalidated = false;
            state.generation += 1;
        }

        {
            let mut body = self.inner.body.lock();
            if let Some(body) = body.as_mut() {
                body(self);
            }
        }

        let stopped = {
            let mut state = self.inner.state.lock();
            state.first_run = false;
            state.stopped
        };
        if stopped {
            self.inner.body.lock().take();
        }
    }

    /// Whether a flush should run this computation again.
    pub(crate) fn needs_recompute(&self) -> bool {
        let state = self.inner.state.lock();
        state.invalidated && !state.stopped
    }

    /// Re-run on behalf of a flush. Panics in the body are logged and
    /// contained so the flush can carry on.
    pub(crate) fn recompute(&self) {
        self.inner.state.lock().recomputing = true;

        if self.needs_recompute() {
            tracing::trace!(computation = %self.id(), "re-running computation");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                tracing::error!(
                    computation = %self.id(),
                    panic = panic_message(payload.as_ref()),
                    "computation panicked while re-running"
                );
            }
        }

        self.inner.state.lock().recomputing = false;
    }
}

impl PartialEq for Computation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Computation {}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("stopped", &state.stopped)
            .field("invalidated", &state.invalidated)
            .field("first_run", &state.first_run)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    #[test]
    fn autorun_runs_on_creation() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _computation = runtime.autorun(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_run_flag_only_on_first_execution() {
        let runtime = ReactiveRuntime::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let computation = runtime.autorun(move |c| {
            seen_clone.lock().push(c.first_run());
        });
        assert!(!computation.first_run());

        computation.invalidate();
        runtime.flush();
        computation.invalidate();
        runtime.flush();

        assert_eq!(*seen.lock(), vec![true, false, false]);
    }

    #[test]
    fn invalidate_reruns_after_flush_not_before() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = runtime.autorun(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        computation.invalidate();
        assert!(computation.is_invalidated());
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        runtime.flush();
        assert!(!computation.is_invalidated());
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeated_invalidation_reruns_once() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = runtime.autorun(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        computation.invalidate();
        computation.invalidate();
        computation.invalidate();
        runtime.flush();

        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_computation_never_reruns() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = runtime.autorun(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        computation.invalidate();
        computation.stop();
        runtime.flush();

        assert!(computation.is_stopped());
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        computation.invalidate();
        runtime.flush();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let runtime = ReactiveRuntime::new();
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();

        let computation = runtime.autorun(|_| {});
        computation.on_stop(move |_| {
            stops_clone.fetch_add(1, Ordering::SeqCst);
        });

        computation.stop();
        computation.stop();

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_from_inside_body() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let computation = runtime.autorun(move |c| {
            if run_count_clone.fetch_add(1, Ordering::SeqCst) == 1 {
                c.stop();
            }
        });

        computation.invalidate();
        runtime.flush();
        assert!(computation.is_stopped());

        computation.invalidate();
        runtime.flush();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn on_invalidate_fires_once_per_invalidation() {
        let runtime = ReactiveRuntime::new();
        let fired = Arc::new(AtomicI32::new(0));
        let fired_clone = fired.clone();

        let computation = runtime.autorun(|_| {});
        computation.on_invalidate(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        computation.invalidate();
        runtime.flush();
        computation.invalidate();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidation_hooks_run_before_rerun_is_queued() {
        let runtime = ReactiveRuntime::new();
        let pending_in_hook = Arc::new(AtomicI32::new(-1));
        let pending_clone = pending_in_hook.clone();
        let observer = runtime.clone();

        let computation = runtime.autorun(|_| {});
        computation.on_invalidate(move |_| {
            pending_clone.store(observer.pending_reruns() as i32, Ordering::SeqCst);
        });

        computation.invalidate();

        assert_eq!(pending_in_hook.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.pending_reruns(), 1);
    }

    #[test]
    fn each_run_gets_a_new_generation() {
        let runtime = ReactiveRuntime::new();
        let computation = runtime.autorun(|_| {});
        let first = computation.generation();

        computation.invalidate();
        runtime.flush();

        assert_eq!(computation.generation(), first + 1);
    }

    #[test]
    fn hooks_on_finished_computation_run_immediately() {
        let runtime = ReactiveRuntime::new();
        let computation = runtime.autorun(|_| {});
        computation.stop();

        let invalidated = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let invalidated_clone = invalidated.clone();
        let stopped_clone = stopped.clone();

        computation.on_invalidate(move |_| invalidated_clone.store(true, Ordering::SeqCst));
        computation.on_stop(move |_| stopped_clone.store(true, Ordering::SeqCst));

        assert!(invalidated.load(Ordering::SeqCst));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn panic_during_rerun_is_contained() {
        let runtime = ReactiveRuntime::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let failing = runtime.autorun(|c| {
            if !c.first_run() {
                panic!("boom");
            }
        });
        let healthy = runtime.autorun(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        failing.invalidate();
        healthy.invalidate();
        runtime.flush();

        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert!(!failing.is_stopped());
    }

    #[test]
    fn clones_compare_equal() {
        let runtime = ReactiveRuntime::new();
        let a = runtime.autorun(|_| {});
        let b = runtime.autorun(|_| {});

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
