//! Reactive Primitives
//!
//! This module implements the dependency-tracking core: dependencies,
//! computations, and the runtime that schedules their re-runs.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dependency`] stands for some piece of data. Code that reads the data
//! calls `depend(cx)` to subscribe the current computation; code that
//! mutates it calls `changed()` to invalidate every subscriber.
//!
//! ## Computations
//!
//! A [`Computation`] is a re-runnable body created by
//! [`ReactiveRuntime::autorun`]. It runs once immediately and again, on a
//! later flush, every time it is invalidated, until it is stopped.
//! Subscriptions last for a single run: invalidation drops them all, and
//! the re-run subscribes afresh to whatever it reads.
//!
//! ## Memoized Computations
//!
//! [`ReactiveRuntime::memoized_isolated_autorun`] shares one inner
//! computation among every caller that asks for the same (name, arguments)
//! key and only invalidates those callers when the result actually
//! changes.
//!
//! # Implementation Notes
//!
//! There is no ambient "current computation". Every reactive operation
//! takes the context explicitly as `cx: Option<&Computation>`; the body of
//! an autorun receives its own computation, and `None` means
//! non-reactive.

mod computation;
mod context;
mod dependency;
mod key;
mod memo;
mod runtime;
mod subscriber;
mod timers;

pub use computation::Computation;
pub use context::{is_reactive, nonreactive};
pub use dependency::Dependency;
pub use key::{MemoArgs, MemoKey};
pub use runtime::ReactiveRuntime;
pub use subscriber::ComputationId;
