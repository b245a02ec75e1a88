//! Dependency Implementation
//!
//! A Dependency is the pub-sub leaf of the reactive system: a signal with
//! a set of subscribed computations and no value of its own.
//!
//! # How Dependencies Work
//!
//! 1. `depend(Some(c))` adds `c` to the subscriber set and registers an
//!    invalidation hook on `c` that removes it again.
//!
//! 2. `changed()` invalidates every current subscriber. Each invalidation
//!    fires that hook, so the set empties as a side effect.
//!
//! 3. A subscriber that still cares depends again during its re-run.
//!
//! As a result a computation is in the set exactly when it depended during
//! its latest run and has not been invalidated or stopped since.
//!
//! Each subscription remembers the run (generation) that made it, and the
//! removal hook only drops a subscription from its own run. On a
//! multi-threaded executor the re-run may subscribe again before the old
//! hook gets to run, and that newer subscription must survive.
//!
//! Subscribers are held strongly: a computation that is never stopped
//! stays alive as long as a dependency it read does.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::computation::Computation;
use super::subscriber::ComputationId;

/// A reactive signal that computations subscribe to.
///
/// Cloning shares the subscriber set.
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
/// assert!(dependency.has_dependents());
/// dependency.changed();
/// assert!(computation.is_invalidated());
/// ```
#[derive(Clone, Default)]
pub struct Dependency {
    inner: Arc<DependencyInner>,
}

#[derive(Default)]
struct DependencyInner {
    /// Insertion-ordered, so `changed()` invalidates in subscription order.
    /// Values carry the subscribing run's generation.
    subscribers: Mutex<IndexMap<ComputationId, (u64, Computation)>>,
}

impl DependencyInner {
    /// Drop `id` if it is still subscribed from run `generation`.
    fn unsubscribe(&self, id: ComputationId, generation: u64) {
        let mut subscribers = self.subscribers.lock();
        if subscribers
            .get(&id)
            .is_some_and(|(subscribed, _)| *subscribed == generation)
        {
            subscribers.shift_remove(&id);
        }
    }
}

impl Dependency {
    /// Create a dependency with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe the current computation, if any.
    ///
    /// Returns `true` when `cx` was newly added. Depending twice in one run
    /// has the same effect as once, and `None` is a no-op.
    pub fn depend(&self, cx: Option<&Computation>) -> bool {
        let Some(computation) = cx else {
            return false;
        };

        let id = computation.id();
        let generation = computation.generation();
        {
            let mut subscribers = self.inner.subscribers.lock();
            if subscribers
                .get(&id)
                .is_some_and(|(subscribed, _)| *subscribed == generation)
            {
                return false;
            }
            // Replaces a leftover entry from an earlier run, if any.
            subscribers.insert(id, (generation, computation.clone()));
        }

        tracing::trace!(computation = %id, generation, "subscribed to dependency");

        let subscribers = Arc::downgrade(&self.inner);
        computation.on_invalidate(move |c| {
            if let Some(inner) = subscribers.upgrade() {
                inner.unsubscribe(c.id(), generation);
            }
        });

        true
    }

    /// Invalidate every current subscriber.
    pub fn changed(&self) {
        let subscribers: SmallVec<[Computation; 8]> = self
            .inner
            .subscribers
            .lock()
            .values()
            .map(|(_, computation)| computation.clone())
            .collect();

        if subscribers.is_empty() {
            return;
        }

        tracing::trace!(count = subscribers.len(), "dependency changed");

        for computation in subscribers {
            computation.invalidate();
        }
    }

    /// Whether any computation is subscribed.
    pub fn has_dependents(&self) -> bool {
        !self.inner.subscribers.lock().is_empty()
    }

    /// Number of subscribed computations.
    pub fn dependent_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
