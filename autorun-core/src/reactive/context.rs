//! Reactive Context
//!
//! There is no ambient "current computation". Code that may subscribe
//! takes the context explicitly as `cx: Option<&Computation>`:
//!
//! - `Some(c)` means "running inside computation `c`"; any
//!   [`Dependency::depend`](super::Dependency::depend) with this context
//!   subscribes `c`.
//! - `None` means "not reactive"; every `depend` becomes a no-op.
//!
//! Helpers that must never subscribe their caller (for example, code that
//! builds a new computation from inside another one) wrap themselves in
//! [`nonreactive`].

use super::Computation;

/// Run `f` with no current computation in scope.
///
/// Anything `f` depends on is not recorded against the caller.
pub fn nonreactive<T, F>(f: F) -> T
where
    F: FnOnce(Option<&Computation>) -> T,
{
    f(None)
}

/// Whether `cx` is a live reactive context.
///
/// A stopped computation is not: subscribing it would be undone
/// immediately.
pub fn is_reactive(cx: Option<&Computation>) -> bool {
    cx.is_some_and(|c| !c.is_stopped())
}
