//! Coarse stack clock — whole seconds from an epoch.
//!
//! Cache entries are stamped and aged in seconds, so the stack never needs
//! sub-second resolution.  Production stacks use [`Clock::monotonic`], which
//! counts from process start via [`Instant`]; tests use [`Clock::manual`] and
//! advance time explicitly so TTL and sweep behavior can be exercised without
//! sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

enum Source {
    Monotonic(Instant),
    Manual(AtomicU64),
}

/// Second-granularity time source owned by the stack.
pub struct Clock {
    source: Source,
}

impl Clock {
    /// Wall source counting whole seconds since creation.
    pub fn monotonic() -> Self {
        Self {
            source: Source::Monotonic(Instant::now()),
        }
    }

    /// Manually-advanced source starting at `start` seconds.
    pub fn manual(start: u64) -> Self {
        Self {
            source: Source::Manual(AtomicU64::new(start)),
        }
    }

    /// Current time in whole seconds.
    pub fn now_secs(&self) -> u64 {
        match &self.source {
            Source::Monotonic(epoch) => epoch.elapsed().as_secs(),
            Source::Manual(secs) => secs.load(Ordering::Relaxed),
        }
    }

    /// Advance a manual source by `secs`.  No-op on a monotonic source.
    pub fn advance(&self, secs: u64) {
        if let Source::Manual(current) = &self.source {
            current.fetch_add(secs, Ordering::Relaxed);
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::monotonic()
    }
}
