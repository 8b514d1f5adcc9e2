//! Remote-console transport seam.
//!
//! The production implementation speaks the XOR-framed TCP protocol; tests
//! use a scripted in-memory console. Everything above this trait (liveness,
//! retries, parsing) is shared.

use std::time::Duration;

use async_trait::async_trait;
use rconwatch_proto::Command;

use crate::error::RconError;

/// One remote console endpoint.
///
/// Implementations hold at most one socket. Requests are strictly
/// sequential: a request is written only after the previous response was
/// fully read, which is why methods take `&mut self`.
#[async_trait]
pub trait RemoteConsole: Send {
    /// Open a socket, receive the key and authenticate.
    ///
    /// Replaces any existing socket.
    ///
    /// # Errors
    ///
    /// - `RconError::Auth` if the password is rejected
    /// - `RconError::Network` if the host cannot be reached
    /// - `RconError::Timeout` if the handshake exceeds `timeout`
    async fn connect(&mut self, timeout: Duration) -> Result<(), RconError>;

    /// Send one command and return the decoded response text.
    ///
    /// `FAIL` is returned as text; callers decide whether it is an error.
    ///
    /// # Errors
    ///
    /// - `RconError::NotReady` if there is no socket
    /// - `RconError::Timeout` if no complete response arrives in `timeout`
    /// - `RconError::Network` if the socket breaks
    async fn request(&mut self, command: &Command, timeout: Duration) -> Result<String, RconError>;

    /// Drop the socket, if any.
    async fn close(&mut self);

    /// Human-readable endpoint for logs (`host:port`).
    fn endpoint(&self) -> String;
}
