//! Error types for the core state machines.
//!
//! Two families: [`RconError`] for anything that talks to a remote console,
//! and [`SessionError`] for recording-session lifecycle requests. Neither is
//! ever fatal to the hosting process; callers classify and decide.

use std::time::Duration;

use thiserror::Error;

use crate::{connection::LivenessState, session::SessionId};

/// Remote-console failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RconError {
    /// Credentials rejected by the server
    #[error("authentication failed")]
    Auth,

    /// Host unreachable or connection dropped
    #[error("network error: {0}")]
    Network(String),

    /// No complete response within the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Response could not be understood, or the server answered `FAIL`
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request refused locally because the connection is not usable
    #[error("connection not ready: {0:?}")]
    NotReady(LivenessState),

    /// Anything else; always surfaced
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl RconError {
    /// Returns true if this error may succeed on a plain retry.
    ///
    /// Authentication failures are never transient: retrying with the same
    /// credentials yields the same answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Protocol(_) | Self::NotReady(_))
    }

    /// Returns true for rejected credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }

    /// Returns true if the underlying transport can no longer be used.
    ///
    /// A protocol-level `FAIL` leaves the socket healthy; a network error or a
    /// timeout mid-response does not.
    pub fn breaks_transport(&self) -> bool {
        matches!(self, Self::Auth | Self::Network(_) | Self::Timeout(_))
    }
}

impl From<rconwatch_proto::ProtoError> for RconError {
    fn from(err: rconwatch_proto::ProtoError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for RconError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Session lifecycle failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Overlapping session already owns the server
    #[error("server {server} already has session {existing} in that window")]
    Conflict {
        /// Server name
        server: String,
        /// Session that blocks the request
        existing: SessionId,
    },

    /// Unknown session id
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Window end before start, or already over
    #[error("invalid session window: {0}")]
    InvalidWindow(String),

    /// Persistence failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything else; always surfaced
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SessionError {
    /// Returns true if the error should be shown to the requesting user
    /// verbatim (as opposed to logged as an internal failure).
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotFound(_) | Self::InvalidWindow(_))
    }
}
