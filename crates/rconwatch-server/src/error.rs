//! Server error types.

use std::fmt;

use rconwatch_core::{RconError, SessionError};

use crate::storage::StorageError;

/// Errors that can occur in the capture runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unreadable server list, duplicate names, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Remote console failure surfaced to a caller.
    ///
    /// Capture loops absorb these; they only reach callers of one-shot
    /// operations.
    Rcon(RconError),

    /// Session lifecycle request rejected.
    ///
    /// `Conflict`, `NotFound` and `InvalidWindow` are meant for the user who
    /// made the request.
    Session(SessionError),

    /// Storage operation failed.
    ///
    /// May be transient (I/O errors) or fatal (serialization errors). See
    /// `StorageError`.
    Storage(StorageError),

    /// Unknown server name.
    UnknownServer(String),

    /// The supervisor has stopped and no longer accepts requests.
    Shutdown,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Rcon(err) => write!(f, "remote console error: {err}"),
            Self::Session(err) => write!(f, "session error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::UnknownServer(name) => write!(f, "unknown server: {name}"),
            Self::Shutdown => f.write_str("supervisor is shut down"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rcon(err) => Some(err),
            Self::Session(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RconError> for ServerError {
    fn from(err: RconError) -> Self {
        Self::Rcon(err)
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}
