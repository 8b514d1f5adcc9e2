//! Virtual clock and seeded randomness.

#![allow(clippy::disallowed_types, reason = "Synchronous test state only")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rconwatch_core::{Environment, env::later};

/// Instant every simulation starts at: 2024-01-01T00:00:00Z.
pub const EPOCH_SECS: i64 = 1_704_067_200;

/// Simulation environment.
///
/// In the default stepped mode time only moves when a test calls
/// [`advance`](Self::advance) or when code under test awaits
/// [`sleep`](Environment::sleep), which advances the clock by the requested
/// duration and returns immediately.
///
/// In paced mode ([`paced`](Self::paced)) the clock follows Tokio's timer,
/// so several tasks sleeping at once share one timeline. Combine it with a
/// paused runtime (`start_paused = true`) to run long scenarios instantly.
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<DateTime<Utc>>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    origin: Option<tokio::time::Instant>,
}

impl SimEnv {
    /// Environment at [`EPOCH_SECS`] with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(EPOCH_SECS);
        Self::starting_at(start, seed)
    }

    /// Environment at an explicit instant.
    pub fn starting_at(start: DateTime<Utc>, seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(start)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            origin: None,
        }
    }

    /// Environment at [`EPOCH_SECS`] whose clock follows Tokio's timer.
    ///
    /// Must be called inside a runtime so a paused clock is picked up.
    pub fn paced(seed: u64) -> Self {
        Self { origin: Some(tokio::time::Instant::now()), ..Self::with_seed(seed) }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock = later(*clock, duration);
    }

    /// Seconds elapsed since [`EPOCH_SECS`].
    pub fn elapsed_secs(&self) -> i64 {
        self.now().timestamp() - EPOCH_SECS
    }
}

impl Environment for SimEnv {
    fn now(&self) -> DateTime<Utc> {
        let base = *self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.origin {
            Some(origin) => later(base, origin.elapsed()),
            None => base,
        }
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let paced = self.origin.is_some();
        if !paced {
            self.advance(duration);
        }
        async move {
            if paced {
                tokio::time::sleep(duration).await;
            }
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_clock() {
        let env = SimEnv::with_seed(1);
        let start = env.now();
        env.advance(Duration::from_millis(1500));
        assert_eq!(env.now() - start, TimeDelta::milliseconds(1500));
        assert_eq!(env.elapsed_secs(), 1);
    }

    #[test]
    fn clones_share_clock() {
        let env = SimEnv::with_seed(1);
        let other = env.clone();
        other.advance(Duration::from_secs(60));
        assert_eq!(env.elapsed_secs(), 60);
    }

    #[tokio::test]
    async fn sleep_advances_without_waiting() {
        let env = SimEnv::with_seed(1);
        env.sleep(Duration::from_secs(3600)).await;
        assert_eq!(env.elapsed_secs(), 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_clock_follows_timer() {
        let env = SimEnv::paced(1);
        env.sleep(Duration::from_secs(90)).await;
        assert_eq!(env.elapsed_secs(), 90);
        env.advance(Duration::from_secs(10));
        assert_eq!(env.elapsed_secs(), 100);
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.random_u64(), b.random_u64());
        assert_ne!(SimEnv::with_seed(43).random_u64(), SimEnv::with_seed(42).random_u64());
    }
}
