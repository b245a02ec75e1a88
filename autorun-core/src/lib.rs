//! Autorun Core
//!
//! This crate provides the reactive runtime behind Autorun's incremental
//! UI updates. It implements:
//!
//! - Dependency tracking (dependencies, computations, autoruns)
//! - Memoized, isolated computations shared across callers
//! - Time-based invalidation on the tokio clock
//! - A debounced queue for batching UI updates
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Dependencies, computations, memoization and timers
//! - `batch`: Debounced update queue
//! - `config`: Runtime tuning knobs
//! - `error`: Error types
//!
//! All shared state lives in a [`ReactiveRuntime`], which the host creates
//! and passes around. Multiple runtimes are fully independent.
//!
//! # Example
//!
//! ```rust
//! use autorun_core::{Dependency, ReactiveRuntime};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! let runtime = ReactiveRuntime::new();
//! let selection = Dependency::new();
//! let renders = Arc::new(AtomicI32::new(0));
//!
//! let watched = selection.clone();
//! let counter = renders.clone();
//! let _view = runtime.autorun(move |c| {
//!     watched.depend(Some(c));
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! selection.changed();
//! // Outside tokio the host drives re-runs itself.
//! runtime.flush();
//! assert_eq!(renders.load(Ordering::SeqCst), 2);
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod reactive;

pub use batch::UpdateQueue;
pub use config::RuntimeConfig;
pub use error::{ConfigError, MemoError, RuntimeError};
pub use reactive::{
    is_reactive, nonreactive, Computation, ComputationId, Dependency, ReactiveRuntime,
};
