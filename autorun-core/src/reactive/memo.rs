//! Isolated Memoized Autorun
//!
//! [`ReactiveRuntime::memoized_isolated_autorun`] shares one live inner
//! computation per (function name, arguments) key among every caller that
//! asks for it, and shields those callers from churn that does not change
//! the result.
//!
//! # How It Works
//!
//! 1. The first caller for a key creates a memo entry: a cell holding the
//!    latest value and a [`Dependency`] for outside callers. An inner
//!    computation, created outside the caller's context, runs the function
//!    with itself as the context, so the function's own dependencies
//!    subscribe the inner computation and never the caller.
//!
//! 2. The caller (and every later caller for the same key) depends on the
//!    entry's dependency and receives the stored value.
//!
//! 3. When the inner computation re-runs, the new value is stored first.
//!    The entry's dependency fires only if the value is not equal to the
//!    previous one, so outside callers re-run only on real changes.
//!
//! 4. A periodic liveness check stops the inner computation once the
//!    entry's dependency has no subscribers left. Stopping removes the
//!    entry from the table; the next request recomputes from scratch.
//!
//! # Failure
//!
//! An entry is committed only after the function produced its first
//! value. If it fails (returns `Err`, or panics) the inner computation is
//! stopped and nothing is cached. Failures on later re-runs keep the last
//! good value and are logged.
//!
//! # Outside a Reactive Context
//!
//! With `cx == None` there is no graph to shield, so the function is
//! called directly and nothing is cached.

use std::any::Any;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::time::{interval_at, Instant};

use super::computation::Computation;
use super::dependency::Dependency;
use super::key::MemoKey;
use super::runtime::ReactiveRuntime;
use crate::error::MemoError;

/// The runtime's table of live memo entries.
pub(crate) struct MemoTable {
    entries: DashMap<MemoKey, Arc<dyn ErasedEntry>>,

    /// Serializes lookup-or-create so two callers never both create an
    /// entry for one key. Re-entrant: a memoized function may itself call
    /// memoized functions on the same thread.
    creation: ReentrantMutex<()>,
}

impl MemoTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            creation: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, key: &MemoKey) -> Option<Arc<dyn ErasedEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `key` only while it still belongs to `computation`.
    fn remove_owned_by(&self, key: &MemoKey, computation: &Computation) {
        self.entries
            .remove_if(key, |_, entry| entry.computation() == computation);
    }
}

/// Memo entry with its value type erased.
trait ErasedEntry: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn computation(&self) -> &Computation;
    fn has_dependents(&self) -> bool;
}

/// Latest value of a memo entry plus the dependency outside callers hold.
struct MemoCell<T> {
    value: RwLock<Option<T>>,
    dependency: Dependency,
}

impl<T: Clone + PartialEq> MemoCell<T> {
    fn new() -> Self {
        Self {
            value: RwLock::new(None),
            dependency: Dependency::new(),
        }
    }

    /// Store `value`, returning whether it differs from the previous one.
    fn store(&self, value: T) -> bool {
        let mut current = self.value.write();
        let changed = current.as_ref() != Some(&value);
        *current = Some(value);
        changed
    }

    fn get(&self) -> Option<T> {
        self.value.read().clone()
    }
}

struct MemoEntry<T> {
    cell: Arc<MemoCell<T>>,
    computation: Computation,
}

impl<T> ErasedEntry for MemoEntry<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn computation(&self) -> &Computation {
        &self.computation
    }

    fn has_dependents(&self) -> bool {
        self.cell.dependency.has_dependents()
    }
}

impl ReactiveRuntime {
    /// Return `f(cx, &args)`, computed at most once per `(name, args)` key
    /// among all interested callers and kept fresh reactively.
    ///
    /// `f` receives the inner computation as its context; dependencies it
    /// reads re-run it, not the caller. The caller is subscribed to the
    /// memoized value and re-runs only when a re-run of `f` produces a
    /// value that is not equal to the previous one.
    ///
    /// Calls sharing a key share the value regardless of which closure
    /// they pass; the closure from the call that created the entry is the
    /// one that runs. Argument order matters when `args` is a tuple.
    ///
    /// Outside a reactive context (`cx == None`) `f` is called directly
    /// with `None` and nothing is cached.
    ///
    /// # Errors
    ///
    /// [`MemoError::Compute`] when `f` fails while computing the first
    /// value for a key; nothing is cached in that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use autorun_core::ReactiveRuntime;
    /// use std::convert::Infallible;
    ///
    /// let runtime = ReactiveRuntime::new();
    /// let memo = runtime.clone();
    /// let outer = runtime.autorun(move |c| {
    ///     let total = memo
    ///         .memoized_isolated_autorun(Some(c), "sum", (1, 2), |_, (a, b)| {
    ///             Ok::<_, Infallible>(a + b)
    ///         })
    ///         .unwrap();
    ///     assert_eq!(total, 3);
    /// });
    ///
    /// assert_eq!(runtime.memo_len(), 1);
    /// outer.stop();
    /// assert_eq!(runtime.collect_garbage(), 1);
    /// ```
    pub fn memoized_isolated_autorun<A, T, E, F>(
        &self,
        cx: Option<&Computation>,
        name: &'static str,
        args: A,
        f: F,
    ) -> Result<T, MemoError<E>>
    where
        A: Hash + Eq + Debug + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn(Option<&Computation>, &A) -> Result<T, E> + Send + 'static,
    {
        let Some(outer) = cx else {
            tracing::trace!(name, "memoized call outside a computation; calling directly");
            return f(None, &args).map_err(|source| MemoError::Compute { name, source });
        };

        let args = Arc::new(args);
        let key = MemoKey::new::<A, T>(name, Arc::clone(&args));

        if let Some(value) = self.memo_hit::<T, E>(&key, outer)? {
            return Ok(value);
        }

        let table = &self.inner().memo;
        let _creating = table.creation.lock();

        // Another caller may have created it while we waited.
        if let Some(value) = self.memo_hit::<T, E>(&key, outer)? {
            return Ok(value);
        }

        let (entry, value) = self.create_memo_entry(key, args, f)?;
        entry.cell.dependency.depend(Some(outer));
        Ok(value)
    }

    /// Subscribe `outer` to an existing entry and return its value.
    fn memo_hit<T, E>(
        &self,
        key: &MemoKey,
        outer: &Computation,
    ) -> Result<Option<T>, MemoError<E>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let Some(entry) = self.inner().memo.get(key) else {
            return Ok(None);
        };

        let entry = entry
            .into_any()
            .downcast::<MemoEntry<T>>()
            .map_err(|_| MemoError::TypeMismatch {
                key: format!("{:?}", key),
            })?;

        entry.cell.dependency.depend(Some(outer));
        tracing::trace!(key = ?key, "memo hit");

        // Committed entries always hold a value.
        Ok(entry.cell.get())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(key = ?key))]
    fn create_memo_entry<A, T, E, F>(
        &self,
        key: MemoKey,
        args: Arc<A>,
        f: F,
    ) -> Result<(Arc<MemoEntry<T>>, T), MemoError<E>>
    where
        A: Hash + Eq + Debug + Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn(Option<&Computation>, &A) -> Result<T, E> + Send + 'static,
    {
        let name = key.name();
        let cell = Arc::new(MemoCell::<T>::new());
        let first: Arc<Mutex<Option<Result<T, E>>>> = Arc::new(Mutex::new(None));

        let first_outcome = Arc::clone(&first);
        let body_cell = Arc::clone(&cell);

        // `autorun` takes no context, so nothing `f` reads subscribes the
        // caller.
        let computation = self.autorun(move |c| match f(Some(c), &*args) {
            Ok(value) if c.first_run() => {
                body_cell.store(value.clone());
                *first_outcome.lock() = Some(Ok(value));
            }
            Ok(value) => {
                if body_cell.store(value) {
                    tracing::debug!(name, "memoized value changed");
                    body_cell.dependency.changed();
                }
            }
            Err(err) if c.first_run() => {
                *first_outcome.lock() = Some(Err(err));
            }
            Err(err) => {
                tracing::error!(
                    name,
                    computation = %c.id(),
                    error = %err,
                    "memoized re-run failed; keeping last value"
                );
            }
        });

        let outcome = first.lock().take();
        let value = match outcome {
            Some(Ok(value)) => value,
            Some(Err(source)) => {
                computation.stop();
                tracing::debug!(name, "first run failed; nothing cached");
                return Err(MemoError::Compute { name, source });
            }
            None => unreachable!("autorun runs its body before returning"),
        };

        let entry = Arc::new(MemoEntry {
            cell,
            computation: computation.clone(),
        });

        let runtime = self.downgrade();
        let owned_key = key.clone();
        computation.on_stop(move |c| {
            if let Some(inner) = runtime.upgrade() {
                ReactiveRuntime::from_inner(inner)
                    .inner()
                    .memo
                    .remove_owned_by(&owned_key, c);
                tracing::debug!(key = ?owned_key, "memo entry collected");
            }
        });

        let erased: Arc<dyn ErasedEntry> = entry.clone();
        self.inner().memo.entries.insert(key, erased);
        self.start_liveness_check(&entry);

        tracing::debug!(computation = %computation.id(), "memo entry created");
        Ok((entry, value))
    }

    /// Periodically stop the entry once nobody depends on it.
    fn start_liveness_check<T>(&self, entry: &Arc<MemoEntry<T>>)
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        let period = self.config().gc_interval;
        let entry = Arc::downgrade(entry);

        let spawned = self.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;

                let Some(entry) = entry.upgrade() else {
                    break;
                };
                if entry.computation.is_stopped() {
                    break;
                }
                if !entry.has_dependents() {
                    entry.computation.stop();
                    break;
                }
            }
        });

        if spawned.is_none() {
            tracing::trace!("no timer driver; memo entries are collected by collect_garbage()");
        }
    }

    /// Stop every memo entry that has no dependents. Returns how many
    /// entries were collected.
    ///
    /// This is the same check the periodic liveness timer performs, run
    /// over the whole table at once.
    pub fn collect_garbage(&self) -> usize {
        let unused: Vec<Computation> = self
            .inner()
            .memo
            .entries
            .iter()
            .filter(|entry| !entry.value().has_dependents())
            .map(|entry| entry.value().computation().clone())
            .collect();

        for computation in &unused {
            computation.stop();
        }

        if !unused.is_empty() {
            tracing::debug!(collected = unused.len(), "collected unused memo entries");
        }
        unused.len()
    }

    /// Number of live memo entries.
    pub fn memo_len(&self) -> usize {
        self.inner().memo.len()
    }

    /// Keys of the live memo entries, in no particular order.
    pub fn memo_keys(&self) -> Vec<MemoKey> {
        self.inner()
            .memo
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
