//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling and
//! recovery. A failed append must leave the log exactly as it was, and the
//! capture loop must keep running when persistence hiccups.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use rconwatch_core::{Event, SessionId, SessionInfo};

use super::{Storage, StorageError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with probability `failure_rate`. Injected failures happen before the
/// inner call, so they never leave partial state behind.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    injected: Arc<AtomicUsize>,
}

/// Linear congruential generator, so chaos runs replay from a seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner` with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operations: Arc::new(AtomicUsize::new(0)),
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Storage calls attempted through this wrapper.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Calls that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    fn roll(&self, operation: &str) -> Result<(), StorageError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let fail = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < self.failure_rate;
        if fail {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io(format!("chaotic failure injection ({operation})")));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn put_session(&self, session: &SessionInfo) -> Result<(), StorageError> {
        self.roll("put_session")?;
        self.inner.put_session(session)
    }

    fn load_session(&self, id: SessionId) -> Result<Option<SessionInfo>, StorageError> {
        self.roll("load_session")?;
        self.inner.load_session(id)
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        self.roll("list_sessions")?;
        self.inner.list_sessions()
    }

    fn append_event(&self, session: SessionId, index: u64, event: &Event) -> Result<(), StorageError> {
        self.roll("append_event")?;
        self.inner.append_event(session, index, event)
    }

    fn latest_event_index(&self, session: SessionId) -> Result<Option<u64>, StorageError> {
        self.roll("latest_event_index")?;
        self.inner.latest_event_index(session)
    }

    fn load_events(&self, session: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, StorageError> {
        self.roll("load_events")?;
        self.inner.load_events(session, from, limit)
    }

    fn purge_events(&self, session: SessionId) -> Result<(), StorageError> {
        self.roll("purge_events")?;
        self.inner.purge_events(session)
    }
}
