//! Tokio TCP remote-console transport.
//!
//! Implements [`RemoteConsole`] over a plain TCP socket. The first packet
//! from the server is the XOR key; every request and response afterwards is
//! XORed with it. Responses carry no length prefix, so completion depends on
//! the command:
//!
//! - single answers are one read
//! - arrays are read until they unpack cleanly
//! - multipart text is read until the socket stays quiet for the idle window
//!   or [`MAX_CONTINUATION_READS`] extra reads have arrived
//!
//! The whole exchange runs under the caller's deadline.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use rconwatch_core::{LivenessState, RconError, RemoteConsole};
use rconwatch_proto::{
    Command, XorCipher,
    command::ResponseKind,
    response::{Response, is_complete_array},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::config::ServerEntry;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 32 * 1024;

/// Extra reads allowed for a multipart response.
pub const MAX_CONTINUATION_READS: usize = 10;

/// Socket plus the key it was greeted with.
struct Channel {
    stream: TcpStream,
    cipher: XorCipher,
}

impl Channel {
    async fn send(&mut self, command: &Command) -> Result<(), RconError> {
        let bytes = self.cipher.apply(command.encode().as_bytes());
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    async fn read_some(&mut self, raw: &mut BytesMut) -> Result<(), RconError> {
        raw.reserve(READ_CHUNK);
        let n = self.stream.read_buf(raw).await?;
        if n == 0 {
            return Err(RconError::Network("connection closed by server".into()));
        }
        Ok(())
    }

    async fn receive(&mut self, kind: ResponseKind, idle: Duration) -> Result<String, RconError> {
        let mut raw = BytesMut::with_capacity(READ_CHUNK);
        self.read_some(&mut raw).await?;

        match kind {
            ResponseKind::Single => {},
            ResponseKind::Array => {
                while !is_complete_array(&String::from_utf8_lossy(&self.cipher.apply(&raw))) {
                    self.read_some(&mut raw).await?;
                }
            },
            ResponseKind::Multipart => {
                for _ in 0..MAX_CONTINUATION_READS {
                    match tokio::time::timeout(idle, self.read_some(&mut raw)).await {
                        Ok(read) => read?,
                        Err(_) => break,
                    }
                }
            },
        }

        Ok(self.cipher.decode_text(&raw)?)
    }

    async fn exchange(&mut self, command: &Command, idle: Duration) -> Result<String, RconError> {
        self.send(command).await?;
        self.receive(command.response_kind(), idle).await
    }
}

/// Remote console over TCP.
///
/// Holds at most one socket. A failed or timed-out exchange drops it, since
/// the stream may still carry the tail of the abandoned response.
pub struct TcpConsole {
    host: String,
    port: u16,
    password: String,
    read_idle: Duration,
    channel: Option<Channel>,
}

impl TcpConsole {
    /// Console for one configured server. Nothing is opened until
    /// [`connect`](RemoteConsole::connect).
    pub fn new(entry: &ServerEntry, read_idle: Duration) -> Self {
        Self {
            host: entry.host.clone(),
            port: entry.port,
            password: entry.password.clone(),
            read_idle,
            channel: None,
        }
    }

    /// Whether a socket is currently open.
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    async fn handshake(&self) -> Result<Channel, RconError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        let mut greeting = BytesMut::with_capacity(READ_CHUNK);
        if stream.read_buf(&mut greeting).await? == 0 {
            return Err(RconError::Network("connection closed before key".into()));
        }
        let cipher = XorCipher::from_greeting(greeting.freeze())?;

        let mut channel = Channel { stream, cipher };
        let login = Command::Login { password: self.password.clone() };
        let reply = channel.exchange(&login, self.read_idle).await?;
        match Response::classify(reply) {
            Response::Success => Ok(channel),
            Response::Fail => Err(RconError::Auth),
            Response::Text(text) => Err(RconError::Protocol(format!("unexpected login reply: {text:?}"))),
        }
    }
}

#[async_trait]
impl RemoteConsole for TcpConsole {
    async fn connect(&mut self, timeout: Duration) -> Result<(), RconError> {
        self.channel = None;
        let channel = tokio::time::timeout(timeout, self.handshake())
            .await
            .map_err(|_| RconError::Timeout(timeout))??;

        tracing::debug!(endpoint = %self.endpoint(), key_len = channel.cipher.key_len(), "console authenticated");
        self.channel = Some(channel);
        Ok(())
    }

    async fn request(&mut self, command: &Command, timeout: Duration) -> Result<String, RconError> {
        let idle = self.read_idle;
        let channel = self.channel.as_mut().ok_or(RconError::NotReady(LivenessState::Disconnected))?;

        let result = match tokio::time::timeout(timeout, channel.exchange(command, idle)).await {
            Ok(result) => result,
            Err(_) => Err(RconError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            if e.breaks_transport() {
                tracing::debug!(command = %command.redacted(), error = %e, "dropping console socket");
                self.channel = None;
            }
        }
        result
    }

    async fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.stream.shutdown().await;
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
