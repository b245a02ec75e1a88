//! Error types.

use thiserror::Error;

/// Errors raised by runtime operations that need the host event loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The runtime was built outside a tokio runtime and no handle was
    /// supplied, so timers cannot be scheduled.
    #[error("no tokio runtime available to drive timers")]
    NoTimerDriver,
}

/// Invalid [`RuntimeConfig`](crate::config::RuntimeConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The debounce window must be strictly shorter than the staleness cap.
    #[error("debounce window ({debounce_ms} ms) must be shorter than the staleness cap ({stale_ms} ms)")]
    DebounceNotBelowStale {
        /// Configured debounce window.
        debounce_ms: u128,
        /// Configured staleness cap.
        stale_ms: u128,
    },

    /// A zero interval would spin the liveness check.
    #[error("memo liveness check interval must be non-zero")]
    ZeroGcInterval,
}

/// Failure of
/// [`ReactiveRuntime::memoized_isolated_autorun`](crate::reactive::ReactiveRuntime::memoized_isolated_autorun).
#[derive(Debug, Error)]
pub enum MemoError<E> {
    /// The memoized function failed while computing its first value.
    /// Nothing was cached for the key.
    #[error("memoized computation `{name}` failed")]
    Compute {
        /// Function name the entry was requested under.
        name: &'static str,
        /// The function's own error.
        #[source]
        source: E,
    },

    /// An entry exists under the key but holds a different value type.
    #[error("memo entry {key} holds a value of a different type")]
    TypeMismatch {
        /// Debug rendering of the key.
        key: String,
    },
}

impl<E> MemoError<E> {
    /// The memoized function's own error, if that is what failed.
    pub fn into_source(self) -> Option<E> {
        match self {
            MemoError::Compute { source, .. } => Some(source),
            MemoError::TypeMismatch { .. } => None,
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
