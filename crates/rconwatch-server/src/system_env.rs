//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait:
//! the real wall clock, OS randomness (getrandom) and Tokio sleep. Behavior
//! is therefore non-deterministic; tests use the harness environment.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rconwatch_core::Environment;

/// Production environment using the system clock and OS randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails. Randomness only picks punishment targets, but
/// an OS without working entropy is broken beyond what this process can
/// handle.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn random_index_stays_in_bounds() {
        let env = SystemEnv::new();
        for _ in 0..100 {
            assert!(env.random_index(7) < 7);
        }
        assert_eq!(env.random_index(0), 0);
    }

    #[tokio::test]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;
        let elapsed = env.now() - start;

        assert!(elapsed >= chrono::TimeDelta::milliseconds(50), "Sleep should wait at least 50ms");
    }
}
