//! Invalidation Timers
//!
//! Time-windowed reads ("is this piece still live at time T?") are written
//! as a plain read of the current time plus a call that subscribes the
//! computation to the deadline:
//!
//! ```rust,ignore
//! runtime.autorun(move |c| {
//!     let live = Instant::now() < piece.ends_at;
//!     if live {
//!         timers.invalidate_at(Some(c), piece.ends_at)?;
//!     }
//! });
//! ```
//!
//! Every call creates a fresh single-use [`Dependency`] with its own timer.
//! Overlapping calls with different deadlines are independent.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use super::computation::Computation;
use super::dependency::Dependency;
use super::runtime::ReactiveRuntime;
use crate::error::RuntimeError;

impl ReactiveRuntime {
    /// Invalidate the current computation once `timeout` has elapsed.
    ///
    /// The invalidation is never synchronous, even for a zero timeout: it
    /// happens on a later turn of the event loop. With `cx == None` the
    /// timer still runs but invalidates nothing.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NoTimerDriver`] if the runtime has no tokio handle.
    pub fn invalidate_after(
        &self,
        cx: Option<&Computation>,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        if !self.has_timer_driver() {
            tracing::warn!(?timeout, "invalidation timer requested without a timer driver");
            return Err(RuntimeError::NoTimerDriver);
        }

        let dependency = Dependency::new();
        dependency.depend(cx);

        self.spawn(async move {
            sleep(timeout).await;
            tracing::trace!(?timeout, "invalidation timer fired");
            dependency.changed();
        })
        .ok_or(RuntimeError::NoTimerDriver)?;

        Ok(())
    }

    /// Invalidate the current computation at `deadline`.
    ///
    /// A deadline in the past behaves like `invalidate_after` with a zero
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NoTimerDriver`] if the runtime has no tokio handle.
    pub fn invalidate_at(
        &self,
        cx: Option<&Computation>,
        deadline: Instant,
    ) -> Result<(), RuntimeError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.invalidate_after(cx, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn counting_autorun<F>(runtime: &ReactiveRuntime, arm: F) -> (Computation, Arc<AtomicI32>)
    where
        F: Fn(&ReactiveRuntime, &Computation) + Send + 'static,
    {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let timers = runtime.clone();
        let computation = runtime.autorun(move |c| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            if c.first_run() {
                arm(&timers, c);
            }
        });
        (computation, runs)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_is_not_synchronous() {
        let runtime = ReactiveRuntime::new();
        let (computation, runs) = counting_autorun(&runtime, |timers, c| {
            timers.invalidate_after(Some(c), Duration::ZERO).unwrap();
        });

        assert!(!computation.is_invalidated());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_behaves_like_zero_timeout() {
        let runtime = ReactiveRuntime::new();
        let past = Instant::now();
        tokio::time::advance(Duration::from_secs(1)).await;

        let (computation, runs) = counting_autorun(&runtime, move |timers, c| {
            timers.invalidate_at(Some(c), past).unwrap();
        });

        assert!(!computation.is_invalidated());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_exactly_once() {
        let runtime = ReactiveRuntime::new();
        let (_computation, runs) = counting_autorun(&runtime, |timers, c| {
            timers.invalidate_after(Some(c), Duration::from_millis(20)).unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_deadlines_are_independent() {
        let runtime = ReactiveRuntime::new();
        let (_computation, runs) = counting_autorun(&runtime, |timers, c| {
            timers.invalidate_after(Some(c), Duration::from_millis(10)).unwrap();
            timers.invalidate_after(Some(c), Duration::from_millis(30)).unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // The second timer's dependency lost its subscriber when the first
        // fired, and the re-run did not subscribe again.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_computation_is_not_rerun() {
        let runtime = ReactiveRuntime::new();
        let (computation, runs) = counting_autorun(&runtime, |timers, c| {
            timers.invalidate_after(Some(c), Duration::from_millis(10)).unwrap();
        });

        computation.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requires_a_timer_driver() {
        let runtime = ReactiveRuntime::detached(RuntimeConfig::default()).unwrap();
        let dependency_free = runtime.autorun(|_| {});

        assert_eq!(
            runtime.invalidate_after(Some(&dependency_free), Duration::ZERO),
            Err(RuntimeError::NoTimerDriver)
        );
        assert!(!dependency_free.is_invalidated());
    }
}
