//! Identity for computations.
//!
//! Dependencies key their subscriber sets by [`ComputationId`], so the
//! same computation depending twice during one run is recorded once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a computation.
///
/// Ids are process-wide unique, even across independent runtimes, so a
/// dependency shared between runtimes never confuses two subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Generate a new unique computation ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
