//! Runtime Configuration
//!
//! Tunables for the time-driven parts of a [`ReactiveRuntime`]: how often
//! memo entries are checked for liveness, and the two windows of the
//! batched update queue.
//!
//! Configuration can be built in code or deserialized. Serialized
//! durations are integer milliseconds:
//!
//! ```json
//! { "gc_interval_ms": 5000, "debounce_ms": 40, "stale_ms": 250 }
//! ```
//!
//! [`ReactiveRuntime`]: crate::reactive::ReactiveRuntime

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default period of the memo liveness check.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5);

/// Default debounce window of the update queue.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(40);

/// Default staleness cap of the update queue.
pub const DEFAULT_STALE: Duration = Duration::from_millis(250);

/// Timing configuration for a reactive runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Period of the liveness check that reclaims unused memo entries.
    #[serde(rename = "gc_interval_ms", with = "millis")]
    pub gc_interval: Duration,

    /// Quiet period after the last enqueue before the update queue flushes.
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce: Duration,

    /// Longest time the update queue may stay non-empty before a forced flush.
    #[serde(rename = "stale_ms", with = "millis")]
    pub stale: Duration,
}

impl RuntimeConfig {
    /// Set the memo liveness check period.
    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Set the update queue debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the update queue staleness cap.
    pub fn with_stale(mut self, stale: Duration) -> Self {
        self.stale = stale;
        self
    }

    /// Check the invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc_interval.is_zero() {
            return Err(ConfigError::ZeroGcInterval);
        }
        if self.debounce >= self.stale {
            return Err(ConfigError::DebounceNotBelowStale {
                debounce_ms: self.debounce.as_millis(),
                stale_ms: self.stale.as_millis(),
            });
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_interval: DEFAULT_GC_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            stale: DEFAULT_STALE,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
