#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use rconwatch_core::{Event, SessionId, SessionInfo};

use super::{Storage, StorageError};

/// In-memory storage implementation for tests and ephemeral runs
///
/// Sessions live in a `BTreeMap` (listing is ordered by id) and each log is a
/// `Vec` in index order. All state is wrapped in `Arc<Mutex<>>` to allow
/// Clone and concurrent access. A poisoned lock is reported as an I/O error
/// rather than propagated as a panic.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    sessions: BTreeMap<SessionId, SessionInfo>,
    /// Event logs by session, stored in index order
    events: HashMap<SessionId, Vec<Event>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all sessions.
    ///
    /// Useful for debugging and testing.
    pub fn total_event_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.events.values().map(Vec::len).sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage lock poisoned".to_owned()))
    }
}

impl Storage for MemoryStorage {
    fn put_session(&self, session: &SessionInfo) -> Result<(), StorageError> {
        self.lock()?.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn load_session(&self, id: SessionId) -> Result<Option<SessionInfo>, StorageError> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>, StorageError> {
        Ok(self.lock()?.sessions.values().cloned().collect())
    }

    fn append_event(&self, session: SessionId, index: u64, event: &Event) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let log = inner.events.entry(session).or_default();

        let expected = log.len() as u64;
        if index != expected {
            return Err(StorageError::Conflict { expected, got: index });
        }

        log.push(event.clone());
        debug_assert_eq!(log.len() as u64 - 1, index);
        Ok(())
    }

    fn latest_event_index(&self, session: SessionId) -> Result<Option<u64>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.events.get(&session).and_then(|log| (log.len() as u64).checked_sub(1)))
    }

    fn load_events(&self, session: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, StorageError> {
        let inner = self.lock()?;
        let Some(log) = inner.events.get(&session) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(log.len());
        let end = start.saturating_add(limit).min(log.len());
        Ok(log[start..end].to_vec())
    }

    fn purge_events(&self, session: SessionId) -> Result<(), StorageError> {
        self.lock()?.events.remove(&session);
        Ok(())
    }
}
