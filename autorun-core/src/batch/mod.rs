//! Batched Updates
//!
//! Reactive invalidations tend to arrive in bursts: one data change can
//! re-run dozens of computations, each of which wants the UI to re-render.
//! The [`UpdateQueue`] collapses such a burst into one flush.
//!
//! # Flush Rules
//!
//! - Every enqueue restarts a short debounce timer. When it expires with
//!   no further enqueues, the queue flushes.
//! - Once the queue has been non-empty for the staleness cap, the next
//!   enqueue flushes immediately instead of restarting the timer.
//!
//! Together these collapse bursts in the common case while bounding how
//! long any callback can wait under continuous pressure.

mod queue;

pub use queue::UpdateQueue;
