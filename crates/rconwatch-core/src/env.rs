//! Environment abstraction for deterministic testing.
//!
//! Decouples rule and lifecycle logic from system resources (wall clock,
//! randomness). Production uses the system clock and OS entropy; tests use a
//! virtual clock and a seeded RNG so every run of a scenario is identical.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards within one execution context
/// - Given the same seed, `random_bytes()` produces the same sequence
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Session windows and event timestamps are wall-clock values, so unlike a
    /// monotonic instant this is comparable with times stored on disk.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not state machines).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Uniform index in `0..bound`. Returns 0 when `bound` is 0.
    fn random_index(&self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.random_u64() % bound as u64) as usize
    }
}

/// Convert a configuration duration into a wall-clock span.
///
/// Durations too large for chrono saturate instead of failing; configuration
/// values are never that large in practice.
pub fn span(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `time + duration`, saturating at the largest representable instant.
pub fn later(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    time.checked_add_signed(span(duration)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
