//! Recording-session lifecycle.
//!
//! A session binds one server to a time window. The registry owns every
//! session's metadata and enforces the scheduling rules; it does not own
//! event logs or capture tasks. Like the other state machines it returns
//! [`SessionAction`]s for the driver: start a capture, stop it, persist
//! metadata, purge an expired log.
//!
//! # Lifecycle
//!
//! ```text
//! ┌───────────┐  start time   ┌────────┐  end time / stop  ┌───────────┐  retention  ┌─────────┐
//! │ Scheduled │──────────────>│ Active │──────────────────>│ Completed │────────────>│ Expired │
//! └───────────┘               └────────┘                   └───────────┘             └─────────┘
//!       │                                                        ↑
//!       └────────────────────── stop ────────────────────────────┘
//! ```
//!
//! # Conflict rule
//!
//! A server has at most one `Scheduled` or `Active` session per point in
//! time. A request overlapping an existing one fails with
//! [`SessionError::Conflict`], except that a manual request supersedes
//! overlapping auto sessions: those are completed first.

use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    env::{later, span},
    error::SessionError,
    modifier::ModifierKind,
};

/// Session identifier, unique per registry.
pub type SessionId = u64;

/// How long completed session logs are kept.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// How often the driver should call [`SessionRegistry::tick`].
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Waiting for its start time
    Scheduled,
    /// Recording
    Active,
    /// Finished; log retained
    Completed,
    /// Log purged
    Expired,
}

impl SessionState {
    /// Whether the session still claims its server.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Scheduled | Self::Active)
    }
}

/// Who created a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionOrigin {
    /// Created through the command front end
    Manual,
    /// Created by the population-driven controller
    Auto,
}

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    /// End of the scheduled window
    WindowEnded,
    /// Explicit stop request
    Stopped,
    /// Replaced by a manual session
    Superseded,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowEnded => f.write_str("window ended"),
            Self::Stopped => f.write_str("stopped"),
            Self::Superseded => f.write_str("superseded"),
        }
    }
}

/// Time window of a session. An open end means "until stopped".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    /// Start (inclusive)
    pub start: DateTime<Utc>,
    /// End (exclusive), if bounded
    pub end: Option<DateTime<Utc>>,
}

impl SessionWindow {
    /// Window with a fixed end.
    pub fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end: Some(end) }
    }

    /// Window without an end.
    pub fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    /// Window starting at `start` lasting `length`.
    pub fn starting_for(start: DateTime<Utc>, length: Duration) -> Self {
        Self::bounded(start, later(start, length))
    }

    /// Whether two windows share any instant.
    pub fn overlaps(&self, other: &Self) -> bool {
        let self_before_other = self.end.is_some_and(|end| end <= other.start);
        let other_before_self = other.end.is_some_and(|end| end <= self.start);
        !self_before_other && !other_before_self
    }
}

/// Session metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Identifier
    pub id: SessionId,
    /// Server name
    pub server: String,
    /// Display name
    pub name: String,
    /// Creator
    pub origin: SessionOrigin,
    /// Scheduled window
    pub window: SessionWindow,
    /// Lifecycle state
    pub state: SessionState,
    /// Rule modifiers enabled while active
    pub modifiers: Vec<ModifierKind>,
    /// When the session actually started recording
    pub activated_at: Option<DateTime<Utc>>,
    /// When the session completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Server name
    pub server: String,
    /// Display name; generated when absent
    pub name: Option<String>,
    /// Creator
    pub origin: SessionOrigin,
    /// Window
    pub window: SessionWindow,
    /// Rule modifiers
    pub modifiers: Vec<ModifierKind>,
}

/// Actions returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Start capturing for this session
    Activate {
        /// Session
        id: SessionId,
        /// Server to capture
        server: String,
    },
    /// Stop capturing for this session
    Complete {
        /// Session
        id: SessionId,
        /// Server being captured
        server: String,
        /// Origin, so the auto controller can react
        origin: SessionOrigin,
        /// Why
        reason: CompletionReason,
    },
    /// Store updated metadata
    Persist(SessionInfo),
    /// Delete the session's event log
    Purge {
        /// Session
        id: SessionId,
    },
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long completed logs are kept
    pub retention: Duration,
    /// Lifecycle tick cadence for the driver
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { retention: DEFAULT_RETENTION, tick_interval: DEFAULT_TICK_INTERVAL }
    }
}

/// Session lifecycle registry
///
/// Pure state machine; the driver persists metadata from
/// [`SessionAction::Persist`] and runs captures for `Activate`/`Complete`.
#[derive(Debug)]
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: BTreeMap<SessionId, SessionInfo>,
    next_id: SessionId,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new(config: SessionConfig) -> Self {
        Self { config, sessions: BTreeMap::new(), next_id: 1 }
    }

    /// Registry pre-populated with stored sessions.
    ///
    /// Sessions that were `Active` when the process stopped are left
    /// `Active`; the first [`tick`](Self::tick) after restore re-announces
    /// them so capture resumes.
    pub fn restore(config: SessionConfig, sessions: impl IntoIterator<Item = SessionInfo>) -> Self {
        let sessions: BTreeMap<_, _> = sessions.into_iter().map(|s| (s.id, s)).collect();
        let next_id = sessions.keys().next_back().map_or(1, |id| id + 1);
        Self { config, sessions, next_id }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Look up one session.
    pub fn get(&self, id: SessionId) -> Option<&SessionInfo> {
        self.sessions.get(&id)
    }

    /// All sessions, ordered by id.
    pub fn list(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.values()
    }

    /// Sessions for one server, ordered by id.
    pub fn by_server<'a>(&'a self, server: &'a str) -> impl Iterator<Item = &'a SessionInfo> + 'a {
        self.sessions.values().filter(move |s| s.server == server)
    }

    /// Sessions in one state, ordered by id.
    pub fn by_state(&self, state: SessionState) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.values().filter(move |s| s.state == state)
    }

    /// The active session for a server, if any.
    pub fn active_for(&self, server: &str) -> Option<&SessionInfo> {
        self.sessions.values().find(|s| s.server == server && s.state == SessionState::Active)
    }

    /// Ids of sessions that are `Active` right now.
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.by_state(SessionState::Active).map(|s| s.id).collect()
    }

    /// Create a session.
    ///
    /// # Errors
    ///
    /// - `InvalidWindow` if the window ends before it starts or is already
    ///   over
    /// - `Conflict` if an overlapping live session exists and cannot be
    ///   superseded
    pub fn create(
        &mut self,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> Result<(SessionId, Vec<SessionAction>), SessionError> {
        if let Some(end) = request.window.end {
            if end <= request.window.start {
                return Err(SessionError::InvalidWindow(format!(
                    "end {end} is not after start {}",
                    request.window.start
                )));
            }
            if end <= now {
                return Err(SessionError::InvalidWindow(format!("window already ended at {end}")));
            }
        }

        let conflicts: Vec<&SessionInfo> = self
            .sessions
            .values()
            .filter(|s| s.server == request.server && s.state.is_live() && s.window.overlaps(&request.window))
            .collect();

        let mut actions = Vec::new();
        if let Some(blocking) = conflicts
            .iter()
            .find(|s| !(request.origin == SessionOrigin::Manual && s.origin == SessionOrigin::Auto))
        {
            return Err(SessionError::Conflict { server: request.server, existing: blocking.id });
        }

        let superseded: Vec<SessionId> = conflicts.iter().map(|s| s.id).collect();
        for id in superseded {
            tracing::info!(session_id = id, server = %request.server, "superseding auto session");
            actions.extend(self.complete(id, now, CompletionReason::Superseded));
        }

        let id = self.next_id;
        self.next_id += 1;

        let name = request.name.unwrap_or_else(|| match request.origin {
            SessionOrigin::Auto => request.window.start.format("AUTO_%a_%d_%b_%H.%M").to_string(),
            SessionOrigin::Manual => format!("{}_{id}", request.server),
        });

        let info = SessionInfo {
            id,
            server: request.server,
            name,
            origin: request.origin,
            window: request.window,
            state: SessionState::Scheduled,
            modifiers: request.modifiers,
            activated_at: None,
            completed_at: None,
        };
        tracing::info!(session_id = id, server = %info.server, origin = ?info.origin, "session created");
        self.sessions.insert(id, info.clone());

        if info.window.start <= now {
            actions.extend(self.activate(id, now));
        } else {
            actions.push(SessionAction::Persist(info));
        }

        Ok((id, actions))
    }

    /// Stop a session. Idempotent: stopping a finished session is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the id is unknown
    pub fn stop(&mut self, id: SessionId, now: DateTime<Utc>) -> Result<Vec<SessionAction>, SessionError> {
        let session = self.sessions.get(&id).ok_or(SessionError::NotFound(id))?;
        if !session.state.is_live() {
            return Ok(vec![]);
        }
        Ok(self.complete(id, now, CompletionReason::Stopped))
    }

    /// Advance time: activate due sessions, complete ended ones, expire old
    /// logs.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<SessionAction> {
        let retention = span(self.config.retention);
        let mut due_start = Vec::new();
        let mut due_end = Vec::new();
        let mut due_expire = Vec::new();

        for session in self.sessions.values() {
            match session.state {
                SessionState::Scheduled if session.window.start <= now => due_start.push(session.id),
                SessionState::Active if session.window.end.is_some_and(|end| end <= now) => {
                    due_end.push(session.id);
                },
                SessionState::Completed
                    if session
                        .completed_at
                        .and_then(|at| at.checked_add_signed(retention))
                        .is_some_and(|expiry| expiry <= now) =>
                {
                    due_expire.push(session.id);
                },
                _ => {},
            }
        }

        let mut actions = Vec::new();
        for id in due_end {
            actions.extend(self.complete(id, now, CompletionReason::WindowEnded));
        }
        for id in due_start {
            actions.extend(self.activate(id, now));
        }
        for id in due_expire {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.state = SessionState::Expired;
                tracing::info!(session_id = id, "session log expired");
                actions.push(SessionAction::Purge { id });
                actions.push(SessionAction::Persist(session.clone()));
            }
        }
        actions
    }

    /// Actions that restart capture for sessions left `Active` by a previous
    /// process.
    pub fn resume(&self) -> Vec<SessionAction> {
        self.by_state(SessionState::Active)
            .map(|s| SessionAction::Activate { id: s.id, server: s.server.clone() })
            .collect()
    }

    fn activate(&mut self, id: SessionId, now: DateTime<Utc>) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let Some(server) = self.sessions.get(&id).map(|s| s.server.clone()) else {
            return actions;
        };

        // A restored or overlapping active session on the same server gives way.
        let displaced: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.id != id && s.server == server && s.state == SessionState::Active)
            .map(|s| s.id)
            .collect();
        for other in displaced {
            tracing::warn!(session_id = other, server = %server, "completing displaced active session");
            actions.extend(self.complete(other, now, CompletionReason::Superseded));
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = SessionState::Active;
            session.activated_at = Some(now);
            tracing::info!(session_id = id, server = %server, "session active");
            actions.push(SessionAction::Persist(session.clone()));
            actions.push(SessionAction::Activate { id, server });
        }
        actions
    }

    fn complete(&mut self, id: SessionId, now: DateTime<Utc>, reason: CompletionReason) -> Vec<SessionAction> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return vec![];
        };
        let was_active = session.state == SessionState::Active;
        session.state = SessionState::Completed;
        session.completed_at = Some(now);
        tracing::info!(session_id = id, server = %session.server, %reason, "session completed");

        let mut actions = vec![SessionAction::Persist(session.clone())];
        if was_active {
            actions.push(SessionAction::Complete {
                id,
                server: session.server.clone(),
                origin: session.origin,
                reason,
            });
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    fn request(origin: SessionOrigin, start: i64, end: Option<i64>) -> SessionRequest {
        SessionRequest {
            server: "eu-1".into(),
            name: None,
            origin,
            window: SessionWindow { start: at(start), end: end.map(at) },
            modifiers: vec![],
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionConfig::default())
    }

    #[test]
    fn due_session_activates_immediately() {
        let mut reg = registry();
        let (id, actions) = reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        assert!(actions.contains(&SessionAction::Activate { id, server: "eu-1".into() }));
        assert_eq!(reg.get(id).unwrap().state, SessionState::Active);
        assert_eq!(reg.active_for("eu-1").map(|s| s.id), Some(id));
    }

    #[test]
    fn scheduled_session_activates_on_tick() {
        let mut reg = registry();
        let (id, actions) = reg.create(request(SessionOrigin::Manual, 50, Some(100)), at(0)).unwrap();
        assert!(matches!(actions[..], [SessionAction::Persist(_)]));
        assert!(reg.tick(at(49)).is_empty());

        let actions = reg.tick(at(50));
        assert!(actions.contains(&SessionAction::Activate { id, server: "eu-1".into() }));

        let actions = reg.tick(at(100));
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Complete { reason: CompletionReason::WindowEnded, .. })));
        assert_eq!(reg.get(id).unwrap().state, SessionState::Completed);
    }

    #[test]
    fn overlapping_manual_conflicts() {
        let mut reg = registry();
        let (first, _) = reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        let err = reg.create(request(SessionOrigin::Manual, 50, Some(150)), at(0)).unwrap_err();
        assert_eq!(err, SessionError::Conflict { server: "eu-1".into(), existing: first });
    }

    #[test]
    fn non_overlapping_sessions_coexist() {
        let mut reg = registry();
        reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        assert!(reg.create(request(SessionOrigin::Manual, 100, Some(200)), at(0)).is_ok());
    }

    #[test]
    fn manual_supersedes_auto() {
        let mut reg = registry();
        let (auto, _) = reg.create(request(SessionOrigin::Auto, 0, None), at(0)).unwrap();
        let (manual, actions) = reg.create(request(SessionOrigin::Manual, 10, Some(100)), at(10)).unwrap();

        assert!(actions.contains(&SessionAction::Complete {
            id: auto,
            server: "eu-1".into(),
            origin: SessionOrigin::Auto,
            reason: CompletionReason::Superseded,
        }));
        assert_eq!(reg.get(auto).unwrap().state, SessionState::Completed);
        assert_eq!(reg.get(manual).unwrap().state, SessionState::Active);
    }

    #[test]
    fn auto_cannot_supersede_manual() {
        let mut reg = registry();
        reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        assert!(matches!(
            reg.create(request(SessionOrigin::Auto, 10, None), at(10)),
            Err(SessionError::Conflict { .. })
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut reg = registry();
        let (id, _) = reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        assert!(!reg.stop(id, at(5)).unwrap().is_empty());
        assert!(reg.stop(id, at(6)).unwrap().is_empty());
        assert_eq!(reg.stop(99, at(6)), Err(SessionError::NotFound(99)));
    }

    #[test]
    fn invalid_windows_rejected() {
        let mut reg = registry();
        assert!(matches!(
            reg.create(request(SessionOrigin::Manual, 10, Some(5)), at(0)),
            Err(SessionError::InvalidWindow(_))
        ));
        assert!(matches!(
            reg.create(request(SessionOrigin::Manual, 0, Some(5)), at(10)),
            Err(SessionError::InvalidWindow(_))
        ));
    }

    #[test]
    fn completed_logs_expire_after_retention() {
        let mut reg = SessionRegistry::new(SessionConfig {
            retention: Duration::from_secs(60),
            tick_interval: DEFAULT_TICK_INTERVAL,
        });
        let (id, _) = reg.create(request(SessionOrigin::Manual, 0, Some(100)), at(0)).unwrap();
        reg.stop(id, at(10)).unwrap();

        assert!(reg.tick(at(69)).is_empty());
        let actions = reg.tick(at(70));
        assert!(actions.contains(&SessionAction::Purge { id }));
        assert_eq!(reg.get(id).unwrap().state, SessionState::Expired);
    }

    #[test]
    fn restore_resumes_active_and_continues_ids() {
        let mut reg = registry();
        let (id, _) = reg.create(request(SessionOrigin::Manual, 0, None), at(0)).unwrap();
        let stored: Vec<SessionInfo> = reg.list().cloned().collect();

        let mut restored = SessionRegistry::restore(SessionConfig::default(), stored);
        assert_eq!(restored.resume(), vec![SessionAction::Activate { id, server: "eu-1".into() }]);
        restored.stop(id, at(1)).unwrap();
        let (next, _) = restored.create(request(SessionOrigin::Manual, 2, None), at(2)).unwrap();
        assert_eq!(next, id + 1);
    }

    #[test]
    fn auto_session_name() {
        let mut reg = registry();
        let start = DateTime::parse_from_rfc3339("2024-03-09T20:15:00Z").unwrap().with_timezone(&Utc);
        let (id, _) = reg
            .create(
                SessionRequest {
                    server: "eu-1".into(),
                    name: None,
                    origin: SessionOrigin::Auto,
                    window: SessionWindow::open(start),
                    modifiers: vec![],
                },
                start,
            )
            .unwrap();
        assert_eq!(reg.get(id).unwrap().name, "AUTO_Sat_09_Mar_20.15");
    }
}
