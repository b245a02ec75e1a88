//! Reactive Runtime
//!
//! The runtime is the injectable owner of all shared reactive state:
//!
//! - the queue of invalidated computations awaiting a re-run,
//! - the memo table behind
//!   [`memoized_isolated_autorun`](ReactiveRuntime::memoized_isolated_autorun),
//! - the batched update queue behind
//!   [`enqueue_update`](ReactiveRuntime::enqueue_update).
//!
//! # How Re-runs Are Scheduled
//!
//! 1. An invalidated computation is pushed onto the pending queue.
//!
//! 2. If no flush is scheduled yet and the runtime has a tokio handle, a
//!    flush task is spawned. It runs on a later turn of the event loop,
//!    never synchronously inside `changed()`.
//!
//! 3. [`flush`](ReactiveRuntime::flush) drains the queue in FIFO order,
//!    re-running each computation. Re-runs may invalidate further
//!    computations; those are drained by the same flush.
//!
//! 4. After-flush callbacks run once the queue is empty.
//!
//! A runtime without a handle never flushes on its own; the host calls
//! `flush()` when it wants re-runs to happen.
//!
//! # Thread Safety
//!
//! Everything is behind `parking_lot` locks or atomics, so the runtime can
//! be shared with a multi-threaded executor. Flushes do not overlap: a
//! flush requested while another is running is skipped, and the running
//! one drains whatever was queued. A flush task that finds another flush
//! running hands the request back, and a finishing flush re-checks the
//! queue, so work queued from another thread at the tail of a flush is
//! never stranded.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::computation::Computation;
use super::memo::MemoTable;
use crate::batch::UpdateQueue;
use crate::config::RuntimeConfig;
use crate::error::{panic_message, ConfigError};

type AfterFlush = Box<dyn FnOnce() + Send>;

/// Handle to a reactive runtime.
///
/// Cheap to clone; all clones share state.
///
/// # Example
///
/// ```rust
/// use autorun_core::{Dependency, ReactiveRuntime};
///
/// let runtime = ReactiveRuntime::new();
/// let dependency = Dependency::new();
///
/// let watched = dependency.clone();
/// let computation = runtime.autorun(move |c| {
///     watched.depend(Some(c));
/// });
///
/// dependency.changed();
/// runtime.flush();
/// assert!(!computation.is_invalidated());
/// ```
#[derive(Clone)]
pub struct ReactiveRuntime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,

    /// Executor for flush tasks and timers, if any.
    handle: Option<Handle>,

    pending: Mutex<VecDeque<Computation>>,
    after_flush: Mutex<Vec<AfterFlush>>,
    flush_scheduled: AtomicBool,
    flushing: AtomicBool,

    pub(crate) memo: MemoTable,
    updates: UpdateQueue,
}

impl ReactiveRuntime {
    /// Create a runtime with the default configuration.
    ///
    /// Uses the ambient tokio runtime when called inside one; otherwise
    /// the runtime has no timer driver and re-runs wait for `flush()`.
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default(), Handle::try_current().ok())
    }

    /// Create a runtime with a custom configuration, using the ambient
    /// tokio runtime if there is one.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, Handle::try_current().ok()))
    }

    /// Create a runtime driven by an explicit tokio handle.
    pub fn with_handle(config: RuntimeConfig, handle: Handle) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, Some(handle)))
    }

    /// Create a runtime with no timer driver, even inside tokio.
    ///
    /// Re-runs happen only on [`flush`](Self::flush), timers are
    /// unavailable, and the update queue flushes on every enqueue.
    pub fn detached(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    fn build(config: RuntimeConfig, handle: Option<Handle>) -> Self {
        if handle.is_none() {
            tracing::debug!("reactive runtime created without a timer driver");
        }

        let updates = UpdateQueue::new(config.debounce, config.stale, handle.clone());
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                handle,
                pending: Mutex::new(VecDeque::new()),
                after_flush: Mutex::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
                flushing: AtomicBool::new(false),
                memo: MemoTable::new(),
                updates,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether timers and automatic flushes are available.
    pub fn has_timer_driver(&self) -> bool {
        self.inner.handle.is_some()
    }

    /// Spawn a task on the runtime's executor, if it has one.
    pub(crate) fn spawn<F>(&self, future: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.handle.as_ref().map(|handle| handle.spawn(future))
    }

    /// Create a computation and run it once, synchronously.
    ///
    /// The body re-runs on a later flush each time the computation is
    /// invalidated, until the returned computation is stopped. A panic
    /// during the first run stops the computation and propagates.
    pub fn autorun<F>(&self, body: F) -> Computation
    where
        F: FnMut(&Computation) + Send + 'static,
    {
        let computation = Computation::new(self.downgrade(), Box::new(body));
        tracing::debug!(computation = %computation.id(), "starting autorun");

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| computation.run())) {
            computation.stop();
            panic::resume_unwind(payload);
        }

        computation
    }

    /// Queue an invalidated computation for re-run.
    pub(crate) fn schedule(&self, computation: Computation) {
        self.inner.pending.lock().push_back(computation);
        self.require_flush();
    }

    /// Run `callback` once, after the next flush completes.
    pub fn after_flush<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.after_flush.lock().push(Box::new(callback));
        self.require_flush();
    }

    /// Whether anything is waiting for a flush.
    fn has_flush_work(&self) -> bool {
        !self.inner.pending.lock().is_empty() || !self.inner.after_flush.lock().is_empty()
    }

    /// Make sure a flush task is on its way.
    ///
    /// While `flush_scheduled` is set, a spawned flush task is on its way.
    /// Every such task clears it when it starts, whether it flushes or
    /// finds another flush running.
    fn require_flush(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let runtime = self.downgrade();
        let spawned = self.spawn(async move {
            if let Some(inner) = runtime.upgrade() {
                ReactiveRuntime::from_inner(inner).run_flush(false);
            }
        });

        if spawned.is_none() {
            tracing::trace!("no timer driver; re-runs wait for an explicit flush");
        }
    }

    /// Re-run every invalidated computation, then run after-flush
    /// callbacks, until nothing is pending.
    ///
    /// Calling this from inside a flush (for example from a computation
    /// body) is ignored with a warning.
    pub fn flush(&self) {
        self.run_flush(true);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn run_flush(&self, explicit: bool) {
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            if explicit {
                tracing::warn!("flush requested while already flushing; ignored");
                return;
            }
            self.inner.flush_scheduled.store(false, Ordering::SeqCst);
            // The running flush may have finished its last check before
            // our work arrived.
            if !self.inner.flushing.load(Ordering::SeqCst) && self.has_flush_work() {
                self.require_flush();
            }
            return;
        }
        // Cleared first so invalidations racing with this flush schedule
        // another one instead of being lost.
        self.inner.flush_scheduled.store(false, Ordering::SeqCst);

        let mut reruns = 0usize;
        loop {
            loop {
                let next = self.inner.pending.lock().pop_front();
                let Some(computation) = next else {
                    break;
                };

                computation.recompute();
                reruns += 1;

                if computation.needs_recompute() {
                    self.inner.pending.lock().push_front(computation);
                }
            }

            let callbacks = std::mem::take(&mut *self.inner.after_flush.lock());
            if callbacks.is_empty() {
                break;
            }
            for callback in callbacks {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    tracing::error!(
                        panic = panic_message(payload.as_ref()),
                        "after-flush callback panicked"
                    );
                }
            }
        }

        self.inner.flushing.store(false, Ordering::SeqCst);
        tracing::debug!(reruns, "flush complete");

        // Work queued on another thread after the final drain, whose flush
        // task saw this flush still running.
        if self.has_flush_work() {
            self.require_flush();
        }
    }

    /// Number of computations waiting for a flush.
    pub fn pending_reruns(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Queue a UI update callback on the batched update queue.
    ///
    /// See [`UpdateQueue::enqueue`] for the debounce and staleness rules.
    pub fn enqueue_update<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.updates.enqueue(callback);
    }

    /// Run all queued update callbacks now.
    pub fn flush_updates(&self) {
        self.inner.updates.flush();
    }

    /// Number of update callbacks waiting to be flushed.
    pub fn pending_updates(&self) -> usize {
        self.inner.updates.len()
    }

    /// Number of non-empty update queue flushes so far.
    pub fn update_flushes(&self) -> u64 {
        self.inner.updates.flush_count()
    }

    /// The batched update queue owned by this runtime.
    pub fn update_queue(&self) -> &UpdateQueue {
        &self.inner.updates
    }
}

impl Default for ReactiveRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReactiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveRuntime")
            .field("config", &self.inner.config)
            .field("has_timer_driver", &self.has_timer_driver())
            .field("pending_reruns", &self.pending_reruns())
            .field("memo_entries", &self.inner.memo.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
