//! Session manager: the registry plus durable storage.
//!
//! Wraps the pure [`SessionRegistry`] and executes its persistence actions.
//! Capture-related actions (`Activate`, `Complete`) are handed back to the
//! caller, which owns the capture tasks. Each Active session's log is
//! appended here and nowhere else.
//!
//! Shared between the supervisor and the capture tasks as
//! [`SharedManager`]; no lock is held across a network call.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use rconwatch_core::{
    Event, SessionAction, SessionConfig, SessionId, SessionInfo, SessionRegistry, SessionRequest, SessionState,
};

use crate::{
    error::ServerError,
    storage::{Storage, StorageError},
};

/// Manager shared between tasks.
pub type SharedManager<S> = Arc<tokio::sync::Mutex<SessionManager<S>>>;

/// Largest page returned by [`SessionManager::event_log`].
pub const MAX_PAGE: usize = 10_000;

/// Session lifecycle with persistence.
pub struct SessionManager<S: Storage> {
    registry: SessionRegistry,
    storage: S,
    /// Next log index per Active session
    next_index: HashMap<SessionId, u64>,
}

impl<S: Storage> SessionManager<S> {
    /// Load stored sessions and rebuild the registry.
    ///
    /// Sessions that were Active when the process stopped stay Active; call
    /// [`resume`](Self::resume) to restart their capture.
    ///
    /// # Errors
    ///
    /// Storage errors while listing sessions or reading log positions.
    pub fn open(storage: S, config: SessionConfig) -> Result<Self, StorageError> {
        let sessions = storage.list_sessions()?;
        let mut next_index = HashMap::new();
        for session in sessions.iter().filter(|s| s.state == SessionState::Active) {
            let next = storage.latest_event_index(session.id)?.map_or(0, |latest| latest + 1);
            next_index.insert(session.id, next);
        }
        tracing::info!(sessions = sessions.len(), active = next_index.len(), "session manager opened");

        Ok(Self { registry: SessionRegistry::restore(config, sessions), storage, next_index })
    }

    /// Wrap in the shared handle.
    pub fn shared(self) -> SharedManager<S> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Backing storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Registry configuration.
    pub fn config(&self) -> &SessionConfig {
        self.registry.config()
    }

    /// `Activate` actions for sessions left Active by a previous process.
    pub fn resume(&self) -> Vec<SessionAction> {
        self.registry.resume()
    }

    /// Create a session.
    ///
    /// Returns the new id and the capture actions to execute.
    ///
    /// # Errors
    ///
    /// `ServerError::Session` with `Conflict` or `InvalidWindow`.
    pub fn create(
        &mut self,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> Result<(SessionId, Vec<SessionAction>), ServerError> {
        let (id, actions) = self.registry.create(request, now)?;
        Ok((id, self.apply(actions)))
    }

    /// Stop a session. Idempotent.
    ///
    /// # Errors
    ///
    /// `ServerError::Session` with `NotFound` for an unknown id.
    pub fn stop(&mut self, id: SessionId, now: DateTime<Utc>) -> Result<Vec<SessionAction>, ServerError> {
        let actions = self.registry.stop(id, now)?;
        Ok(self.apply(actions))
    }

    /// Advance the lifecycle clock.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<SessionAction> {
        let actions = self.registry.tick(now);
        self.apply(actions)
    }

    /// Append events to a session's log.
    ///
    /// Events for a session that is not Active are dropped. Returns how many
    /// were stored.
    ///
    /// # Errors
    ///
    /// The first storage failure. Events before it stay stored; the rest of
    /// the batch is dropped.
    pub fn append_events(&mut self, session: SessionId, events: &[Event]) -> Result<usize, StorageError> {
        let active = self.registry.get(session).is_some_and(|s| s.state == SessionState::Active);
        if !active {
            if !events.is_empty() {
                tracing::debug!(session_id = session, dropped = events.len(), "no active session, dropping events");
            }
            return Ok(0);
        }

        let next = self.next_index.entry(session).or_insert(0);
        let mut stored = 0;
        for event in events {
            match self.storage.append_event(session, *next, event) {
                Ok(()) => {
                    *next += 1;
                    stored += 1;
                },
                Err(StorageError::Conflict { expected, got }) => {
                    // Another writer moved the log; resynchronize and retry once.
                    tracing::warn!(session_id = session, expected, got, "log index out of sync");
                    *next = expected;
                    self.storage.append_event(session, *next, event)?;
                    *next += 1;
                    stored += 1;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(stored)
    }

    /// One session.
    pub fn get(&self, id: SessionId) -> Option<&SessionInfo> {
        self.registry.get(id)
    }

    /// All sessions, ordered by id.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.registry.list().cloned().collect()
    }

    /// Sessions for one server, ordered by id.
    pub fn by_server(&self, server: &str) -> Vec<SessionInfo> {
        self.registry.by_server(server).cloned().collect()
    }

    /// Sessions in one lifecycle state, ordered by id.
    pub fn by_state(&self, state: SessionState) -> Vec<SessionInfo> {
        self.registry.by_state(state).cloned().collect()
    }

    /// The Active session for a server.
    pub fn active_for(&self, server: &str) -> Option<&SessionInfo> {
        self.registry.active_for(server)
    }

    /// A page of a session's log, in order.
    ///
    /// Only Active and Completed sessions have readable logs.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or expired sessions; storage errors.
    pub fn event_log(&self, id: SessionId, from: u64, limit: usize) -> Result<Vec<Event>, StorageError> {
        match self.registry.get(id).map(|s| s.state) {
            Some(SessionState::Active | SessionState::Completed) => {
                self.storage.load_events(id, from, limit.min(MAX_PAGE))
            },
            _ => Err(StorageError::NotFound(id)),
        }
    }

    /// The last `count` events of a session's log, in order.
    ///
    /// # Errors
    ///
    /// As for [`event_log`](Self::event_log).
    pub fn log_tail(&self, id: SessionId, count: usize) -> Result<Vec<Event>, StorageError> {
        let len = self.storage.latest_event_index(id)?.map_or(0, |latest| latest + 1);
        let from = len.saturating_sub(count as u64);
        self.event_log(id, from, count)
    }

    /// The whole log of a session.
    pub fn full_log(&self, id: SessionId) -> Result<Vec<Event>, StorageError> {
        let mut events = Vec::new();
        loop {
            let page = self.event_log(id, events.len() as u64, MAX_PAGE)?;
            let done = page.len() < MAX_PAGE;
            events.extend(page);
            if done {
                return Ok(events);
            }
        }
    }

    /// Execute persistence actions; return capture actions.
    fn apply(&mut self, actions: Vec<SessionAction>) -> Vec<SessionAction> {
        let mut capture = Vec::new();
        for action in actions {
            match action {
                SessionAction::Persist(info) => {
                    if let Err(e) = self.storage.put_session(&info) {
                        tracing::error!(session_id = info.id, error = %e, "failed to persist session");
                    }
                },
                SessionAction::Purge { id } => {
                    self.next_index.remove(&id);
                    if let Err(e) = self.storage.purge_events(id) {
                        tracing::error!(session_id = id, error = %e, "failed to purge session log");
                    }
                },
                SessionAction::Activate { id, .. } => {
                    if !self.next_index.contains_key(&id) {
                        let next = match self.storage.latest_event_index(id) {
                            Ok(latest) => latest.map_or(0, |i| i + 1),
                            Err(e) => {
                                tracing::error!(session_id = id, error = %e, "cannot read log position");
                                0
                            },
                        };
                        self.next_index.insert(id, next);
                    }
                    capture.push(action);
                },
                SessionAction::Complete { id, .. } => {
                    self.next_index.remove(&id);
                    capture.push(action);
                },
            }
        }
        capture
    }
}
