//! Reconnecting remote-console client.
//!
//! Pairs a [`RemoteConsole`] with the [`Connection`] liveness machine and
//! executes its actions. Callers see typed queries and a stream of liveness
//! transitions (`Degraded`/`Recovered`) drained after each tick.

use std::collections::VecDeque;

use rconwatch_core::{Connection, ConnectionAction, ConnectionConfig, Environment, RconError, RemoteConsole};
use rconwatch_proto::{
    Command, LogLine, PlayerEntry, PlayerInfo, Slots, log::parse_showlog, response::Response, unpack_array,
};

/// Remote-console client with liveness tracking.
pub struct RconClient<C: RemoteConsole, E: Environment> {
    console: C,
    connection: Connection,
    env: E,
    transitions: Vec<ConnectionAction>,
}

impl<C: RemoteConsole, E: Environment> RconClient<C, E> {
    /// Wrap a console. Starts disconnected.
    pub fn new(console: C, config: ConnectionConfig, env: E) -> Self {
        Self { console, connection: Connection::new(config), env, transitions: Vec::new() }
    }

    /// Liveness state machine.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Underlying console, for inspection in tests.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Whether queries and commands can be sent.
    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    /// Advance one poll tick, reconnecting if the schedule says so.
    ///
    /// Returns true when the connection is ready for this tick's queries.
    pub async fn tick(&mut self) -> bool {
        let actions = self.connection.tick();
        self.apply(actions).await;
        self.connection.is_ready()
    }

    /// Connect now if not ready, ignoring the reconnect schedule.
    pub async fn ensure_ready(&mut self) -> Result<(), RconError> {
        if self.connection.is_ready() {
            return Ok(());
        }
        self.apply(vec![ConnectionAction::Connect]).await;
        if self.connection.is_ready() {
            Ok(())
        } else {
            Err(self
                .connection
                .last_error()
                .cloned()
                .unwrap_or(RconError::NotReady(self.connection.state())))
        }
    }

    /// Drop the socket and open a fresh one.
    pub async fn reconnect(&mut self) -> Result<(), RconError> {
        let actions = self.connection.close("forced reconnect");
        self.apply(actions).await;
        self.ensure_ready().await
    }

    /// Drop the socket.
    pub async fn close(&mut self, reason: &str) {
        let actions = self.connection.close(reason);
        self.apply(actions).await;
    }

    /// Count a failure detected outside the console, such as a tick that
    /// overran its deadline while a request was in flight.
    pub async fn record_failure(&mut self, error: &RconError) {
        let actions = self.connection.on_failure(error);
        self.apply(actions).await;
    }

    /// Liveness transitions since the last call, oldest first.
    pub fn drain_transitions(&mut self) -> Vec<ConnectionAction> {
        std::mem::take(&mut self.transitions)
    }

    /// Send a query and return the raw response text.
    ///
    /// # Errors
    ///
    /// `NotReady` without a usable connection; otherwise whatever the
    /// console reported. Failures feed the liveness machine.
    pub async fn query(&mut self, command: &Command) -> Result<String, RconError> {
        if !self.connection.is_ready() {
            return Err(RconError::NotReady(self.connection.state()));
        }
        let timeout = self.connection.config().request_timeout;
        match self.console.request(command, timeout).await {
            Ok(text) => {
                self.connection.on_success(self.env.now());
                Ok(text)
            },
            Err(e) => {
                tracing::debug!(endpoint = %self.console.endpoint(), command = %command.redacted(), error = %e, "request failed");
                let actions = self.connection.on_failure(&e);
                self.apply(actions).await;
                Err(e)
            },
        }
    }

    /// Send an administrative command.
    ///
    /// # Errors
    ///
    /// `Protocol` if the server answered `FAIL`; the connection itself stays
    /// healthy in that case.
    pub async fn execute(&mut self, command: &Command) -> Result<(), RconError> {
        let reply = self.query(command).await?;
        if Response::classify(reply).is_fail() {
            return Err(RconError::Protocol(format!("command rejected: {}", command.redacted())));
        }
        Ok(())
    }

    /// Connected and maximum player counts.
    pub async fn slots(&mut self) -> Result<Slots, RconError> {
        let text = self.query(&Command::GetSlots).await?;
        Ok(Slots::parse(&text)?)
    }

    /// Names and ids of connected players.
    pub async fn player_ids(&mut self) -> Result<Vec<PlayerEntry>, RconError> {
        let text = self.query(&Command::GetPlayerIds).await?;
        let mut entries = Vec::new();
        for item in unpack_array(&text)? {
            match PlayerEntry::parse(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping malformed player entry"),
            }
        }
        Ok(entries)
    }

    /// Details of one player. `None` when the server answers `FAIL`, which
    /// happens when the player left between the list and this query.
    pub async fn player_info(&mut self, name: &str) -> Result<Option<PlayerInfo>, RconError> {
        let text = self.query(&Command::PlayerInfo { name: name.to_owned() }).await?;
        if Response::classify(text.as_str()).is_fail() {
            return Ok(None);
        }
        Ok(Some(PlayerInfo::parse(&text)?))
    }

    /// Admin-log entries for the trailing window, oldest first.
    ///
    /// Unparseable entries are logged and skipped.
    pub async fn show_log(&mut self, minutes: u32) -> Result<Vec<LogLine>, RconError> {
        let text = self.query(&Command::ShowLog { minutes }).await?;
        let (lines, anomalies) = parse_showlog(&text);
        for anomaly in anomalies {
            tracing::debug!(endpoint = %self.console.endpoint(), error = %anomaly, "skipping admin-log entry");
        }
        Ok(lines)
    }

    /// Current map name.
    pub async fn map(&mut self) -> Result<String, RconError> {
        Ok(self.query(&Command::GetMap).await?.trim().to_owned())
    }

    async fn apply(&mut self, actions: Vec<ConnectionAction>) {
        let mut queue: VecDeque<ConnectionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::Connect => {
                    self.connection.begin_connect();
                    let timeout = self.connection.config().connect_timeout;
                    match self.console.connect(timeout).await {
                        Ok(()) => {
                            tracing::info!(endpoint = %self.console.endpoint(), "console connected");
                            queue.extend(self.connection.on_connected(self.env.now()));
                        },
                        Err(e) => {
                            tracing::warn!(endpoint = %self.console.endpoint(), error = %e, "console connect failed");
                            queue.extend(self.connection.on_failure(&e));
                        },
                    }
                },
                ConnectionAction::Disconnect { reason } => {
                    tracing::debug!(endpoint = %self.console.endpoint(), %reason, "closing console");
                    self.console.close().await;
                },
                transition @ (ConnectionAction::Degraded { .. } | ConnectionAction::Recovered) => {
                    self.transitions.push(transition);
                },
            }
        }
    }
}
