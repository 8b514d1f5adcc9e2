//! Remote-console liveness state machine.
//!
//! Tracks whether the console behind one server can be used, counts
//! consecutive failures, and decides when to reconnect. Uses the action
//! pattern: methods take time or outcomes as input and return actions for the
//! driver to execute. The driver owns the socket; this type only owns the
//! decision.
//!
//! # State Machine
//!
//! ```text
//!                 connect ok
//! ┌──────────────┐  ┌────────────┐ ───────────> ┌───────┐
//! │ Disconnected │─>│ Connecting │              │ Ready │
//! └──────────────┘  └────────────┘ <─────┐      └───────┘
//!        ↑                │              │          │
//!        │ broken socket  │ failures ≥   │ schedule │ failures ≥ threshold
//!        └────────────────┤ threshold    │          ↓
//!                         └────────────> ┌──────────┐
//!                                        │ Degraded │
//!                                        └──────────┘
//! ```
//!
//! Administrative commands are only sent while `Ready`. Entering `Degraded`
//! emits [`ConnectionAction::Degraded`] once so the owning session can
//! suspend rule enforcement; the next successful connect emits
//! [`ConnectionAction::Recovered`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::RconError;

/// Time allowed to open the socket, receive the key and log in.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Time allowed for one request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive failures before the connection is considered degraded.
pub const DEFAULT_DEGRADE_AFTER: u32 = 4;

/// While degraded, reconnect on every Nth missed tick.
pub const DEFAULT_RECONNECT_EVERY: u32 = 4;

/// Missed ticks after which reconnect attempts slow down.
pub const DEFAULT_EAGER_RECONNECT_TICKS: u32 = 20;

/// Reconnect on every Nth missed tick once attempts have slowed down.
pub const DEFAULT_SLOW_RECONNECT_EVERY: u32 = 20;

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new socket and authenticate
    Connect,

    /// Drop the current socket
    Disconnect {
        /// Why the socket is being dropped
        reason: String,
    },

    /// Connection just became unusable; suspend enforcement
    Degraded {
        /// Last failure
        reason: String,
    },

    /// Connection usable again after being degraded
    Recovered,
}

/// Liveness state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LivenessState {
    /// No socket
    Disconnected,
    /// Socket being opened and authenticated
    Connecting,
    /// Authenticated and answering
    Ready,
    /// Repeated failures; reconnecting on a back-off schedule
    Degraded,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket open + key + login deadline
    pub connect_timeout: Duration,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Consecutive failures before `Degraded`
    pub degrade_after: u32,
    /// Reconnect cadence (in missed ticks) while degraded
    pub reconnect_every: u32,
    /// Missed ticks after which the cadence slows down
    pub eager_reconnect_ticks: u32,
    /// Slow reconnect cadence (in missed ticks)
    pub slow_reconnect_every: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            degrade_after: DEFAULT_DEGRADE_AFTER,
            reconnect_every: DEFAULT_RECONNECT_EVERY,
            eager_reconnect_ticks: DEFAULT_EAGER_RECONNECT_TICKS,
            slow_reconnect_every: DEFAULT_SLOW_RECONNECT_EVERY,
        }
    }
}

/// Connection liveness state machine
///
/// This is a pure state machine - no I/O. One instance per monitored server,
/// owned by the task that owns the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    state: LivenessState,
    config: ConnectionConfig,
    /// Failed requests/connects since the last success
    consecutive_failures: u32,
    /// Poll ticks skipped since the connection stopped being ready
    missed_ticks: u32,
    /// Sticky flag: `Degraded` was announced and `Recovered` was not yet
    degraded: bool,
    /// Credentials were rejected; only slow reconnects from here on
    auth_rejected: bool,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<RconError>,
}

impl Connection {
    /// Create a new connection in [`LivenessState::Disconnected`] state
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: LivenessState::Disconnected,
            config,
            consecutive_failures: 0,
            missed_ticks: 0,
            degraded: false,
            auth_rejected: false,
            last_success: None,
            last_error: None,
        }
    }

    /// Current liveness state
    #[must_use]
    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Whether administrative commands may be sent.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == LivenessState::Ready
    }

    /// Whether the connection is currently announced as degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Poll ticks skipped since the connection stopped being ready.
    #[must_use]
    pub fn missed_ticks(&self) -> u32 {
        self.missed_ticks
    }

    /// Time of the last successful request.
    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&RconError> {
        self.last_error.as_ref()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Advance one poll tick.
    ///
    /// Returns `[Connect]` when a reconnect attempt is due. A `Ready`
    /// connection returns no actions and the caller proceeds with its
    /// queries; any other state means this tick is a gap.
    pub fn tick(&mut self) -> Vec<ConnectionAction> {
        match self.state {
            LivenessState::Ready => {
                self.missed_ticks = 0;
                vec![]
            },
            LivenessState::Connecting => {
                self.missed_ticks = self.missed_ticks.saturating_add(1);
                vec![]
            },
            LivenessState::Disconnected | LivenessState::Degraded => {
                self.missed_ticks = self.missed_ticks.saturating_add(1);
                if self.reconnect_due() {
                    vec![ConnectionAction::Connect]
                } else {
                    vec![]
                }
            },
        }
    }

    fn reconnect_due(&self) -> bool {
        let missed = self.missed_ticks;
        let slow = self.config.slow_reconnect_every.max(1);
        if self.auth_rejected {
            return missed % slow == 0;
        }
        if !self.degraded {
            return true;
        }
        if missed <= self.config.eager_reconnect_ticks {
            missed == 1 || missed % self.config.reconnect_every.max(1) == 0
        } else {
            missed % slow == 0
        }
    }

    /// Driver is about to open a socket.
    pub fn begin_connect(&mut self) {
        debug_assert!(self.state != LivenessState::Ready, "begin_connect on a ready connection");
        self.state = LivenessState::Connecting;
    }

    /// Socket opened and login accepted.
    pub fn on_connected(&mut self, now: DateTime<Utc>) -> Vec<ConnectionAction> {
        self.state = LivenessState::Ready;
        self.consecutive_failures = 0;
        self.missed_ticks = 0;
        self.auth_rejected = false;
        self.last_success = Some(now);

        if self.degraded {
            self.degraded = false;
            tracing::info!("remote console recovered");
            vec![ConnectionAction::Recovered]
        } else {
            vec![]
        }
    }

    /// A request completed.
    pub fn on_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_success = Some(now);
    }

    /// A connect attempt or request failed.
    pub fn on_failure(&mut self, error: &RconError) -> Vec<ConnectionAction> {
        let previous = self.state;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.clone());

        let mut actions = Vec::new();

        if error.is_auth() {
            self.auth_rejected = true;
        }

        let threshold_reached = self.consecutive_failures >= self.config.degrade_after;
        if error.is_auth() || threshold_reached {
            if !self.degraded {
                self.degraded = true;
                tracing::warn!(
                    failures = self.consecutive_failures,
                    error = %error,
                    "remote console degraded"
                );
                actions.push(ConnectionAction::Degraded { reason: error.to_string() });
            }
            self.state = LivenessState::Degraded;
            self.missed_ticks = 0;
        } else if error.breaks_transport() || previous == LivenessState::Connecting {
            self.state = LivenessState::Disconnected;
        }

        if previous == LivenessState::Ready && self.state != LivenessState::Ready {
            actions.insert(0, ConnectionAction::Disconnect { reason: error.to_string() });
        }

        actions
    }

    /// Drop the connection on request (session stopped).
    pub fn close(&mut self, reason: impl Into<String>) -> Vec<ConnectionAction> {
        let was_ready = self.state == LivenessState::Ready;
        self.state = LivenessState::Disconnected;
        self.missed_ticks = 0;
        if was_ready {
            vec![ConnectionAction::Disconnect { reason: reason.into() }]
        } else {
            vec![]
        }
    }
}
