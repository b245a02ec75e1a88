//! Debounced update queue.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::error::panic_message;

type UpdateCallback = Box<dyn FnOnce() + Send>;

/// Queue of update callbacks flushed in debounced batches.
///
/// Cloning shares the queue.
///
/// Without a tokio handle there is nothing to run the debounce timer, so
/// every enqueue flushes immediately.
#[derive(Clone)]
pub struct UpdateQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    debounce: Duration,
    stale: Duration,
    handle: Option<Handle>,
    state: Mutex<QueueState>,
    flushes: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    callbacks: Vec<UpdateCallback>,
    /// When the queue last went from empty to non-empty.
    first_enqueued_at: Option<Instant>,
    /// The debounce timer, if one is armed.
    pending: Option<JoinHandle<()>>,
}

impl UpdateQueue {
    /// Create a queue with the given debounce window and staleness cap.
    pub fn new(debounce: Duration, stale: Duration, handle: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                debounce,
                stale,
                handle,
                state: Mutex::new(QueueState::default()),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Queue `callback` for the next flush.
    ///
    /// Restarts the debounce timer, unless the queue has already been
    /// waiting for the staleness cap, in which case everything queued
    /// (including `callback`) runs now, before this call returns.
    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();

        let flush_now = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.pending.take() {
                timer.abort();
            }

            let first = *state.first_enqueued_at.get_or_insert(now);
            state.callbacks.push(Box::new(callback));

            if now.duration_since(first) < self.inner.stale {
                match self.arm_debounce() {
                    Some(timer) => {
                        state.pending = Some(timer);
                        false
                    }
                    None => true,
                }
            } else {
                tracing::debug!(
                    waited = ?now.duration_since(first),
                    "update queue reached staleness cap"
                );
                true
            }
        };

        if flush_now {
            self.flush();
        }
    }

    fn arm_debounce(&self) -> Option<JoinHandle<()>> {
        let handle = self.inner.handle.as_ref()?;
        let queue: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let debounce = self.inner.debounce;

        Some(handle.spawn(async move {
            sleep(debounce).await;
            if let Some(inner) = queue.upgrade() {
                UpdateQueue { inner }.flush();
            }
        }))
    }

    /// Run every queued callback once, in enqueue order, and empty the queue.
    ///
    /// A panicking callback is logged and does not stop the ones after it.
    /// Callbacks enqueued while flushing wait for the next flush.
    pub fn flush(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.pending.take() {
                timer.abort();
            }
            state.first_enqueued_at = None;
            std::mem::take(&mut state.callbacks)
        };

        if callbacks.is_empty() {
            return;
        }

        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(count = callbacks.len(), "flushing batched updates");

        for (index, callback) in callbacks.into_iter().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    index,
                    panic = panic_message(payload.as_ref()),
                    "update callback panicked"
                );
            }
        }
    }

    /// Number of callbacks waiting for a flush.
    pub fn len(&self) -> usize {
        self.inner.state.lock().callbacks.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of flushes that ran at least one callback.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("debounce", &self.inner.debounce)
            .field("stale", &self.inner.stale)
            .field("len", &self.len())
            .field("flush_count", &self.flush_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(50);
    const STALE: Duration = Duration::from_millis(200);

    fn queue() -> UpdateQueue {
        UpdateQueue::new(DEBOUNCE, STALE, Some(Handle::current()))
    }

    fn recorder(log: &Arc<Mutex<Vec<usize>>>, value: usize) -> impl FnOnce() + Send + 'static {
        let log = log.clone();
        move || log.lock().push(value)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_flushes_once_in_order() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            queue.enqueue(recorder(&log, i));
            sleep(Duration::from_millis(10)).await;
        }
        assert!(log.lock().is_empty());
        assert_eq!(queue.len(), 5);

        sleep(DEBOUNCE).await;

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.flush_count(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_waits_for_quiet_period() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(recorder(&log, 1));
        sleep(DEBOUNCE - Duration::from_millis(1)).await;
        assert!(log.lock().is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(*log.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_pressure_hits_staleness_cap() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let mut i = 0;
        while start.elapsed() < STALE {
            queue.enqueue(recorder(&log, i));
            i += 1;
            sleep(Duration::from_millis(10)).await;
        }
        // Never quiet for the debounce window, and not yet stale.
        assert_eq!(queue.flush_count(), 0);

        // This enqueue lands at the cap and flushes synchronously.
        queue.enqueue(recorder(&log, i));
        assert_eq!(queue.flush_count(), 1);
        assert_eq!(log.lock().len(), i + 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_bounded_under_pressure() {
        let queue = queue();
        let flushed_at = Arc::new(Mutex::new(None));
        let start = Instant::now();

        let first = flushed_at.clone();
        queue.enqueue(move || *first.lock() = Some(Instant::now()));

        for _ in 0..100 {
            sleep(Duration::from_millis(10)).await;
            queue.enqueue(|| {});
        }

        let flushed_at = flushed_at.lock().expect("first callback ran");
        assert!(flushed_at.duration_since(start) <= STALE);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_abort_flush() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(recorder(&log, 1));
        queue.enqueue(|| panic!("render failed"));
        queue.enqueue(recorder(&log, 3));
        queue.flush();

        assert_eq!(*log.lock(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_after_manual_flush_is_harmless() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(recorder(&log, 1));
        queue.flush();
        assert_eq!(queue.flush_count(), 1);

        sleep(DEBOUNCE * 2).await;
        assert_eq!(queue.flush_count(), 1);
        assert_eq!(*log.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_reset_after_flush() {
        let queue = queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(recorder(&log, 1));
        sleep(STALE * 2).await;
        assert_eq!(queue.flush_count(), 1);

        // A fresh burst starts a fresh staleness window.
        queue.enqueue(recorder(&log, 2));
        assert_eq!(queue.flush_count(), 1);
        sleep(DEBOUNCE + Duration::from_millis(1)).await;
        assert_eq!(queue.flush_count(), 2);
    }

    #[test]
    fn without_executor_flushes_on_enqueue() {
        let queue = UpdateQueue::new(DEBOUNCE, STALE, None);
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue(recorder(&log, 1));
        queue.enqueue(recorder(&log, 2));

        assert_eq!(*log.lock(), vec![1, 2]);
        assert_eq!(queue.flush_count(), 2);
    }
}
