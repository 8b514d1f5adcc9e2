//! Per-session capture loop.
//!
//! One task per Active session. Each tick it polls the server for a full
//! snapshot (all-or-nothing within the tick deadline), derives events, lets
//! the session's modifiers react, appends everything to the session log and
//! finally sends the modifiers' commands. The task owns its console
//! connection; nothing else talks over that socket.
//!
//! Shutdown is observed only between ticks, so a stop never cuts a query or
//! a command in half.
//!
//! Before its first snapshot a capture reads the tail of the session log, so
//! a capture restarted for a resumed session carries on the stored sequence
//! instead of recording the admin-log window a second time.

use rconwatch_core::{
    ConnectionAction, DerivationEngine, Environment, EventKind, LogCursor, ModifierAction, ModifierContext,
    ModifierEngine, RconError, RemoteConsole, SessionId, Snapshot,
};
use rconwatch_proto::{Command, LogLine, PlayerInfo};
use tokio::sync::watch;

use crate::{
    client::RconClient,
    config::PollerConfig,
    manager::SharedManager,
    storage::{Storage, StorageError},
};

/// Stored events read back to seed derivation when a capture starts.
const RESUME_TAIL: usize = 1024;

/// What one tick amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A snapshot was taken and processed
    Captured {
        /// Events appended to the log (rule notes included)
        events: usize,
        /// Administrative commands sent
        commands: usize,
    },
    /// No usable snapshot this tick
    Gap,
}

/// Counters kept for the lifetime of a capture task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Ticks run
    pub ticks: u64,
    /// Ticks without a snapshot
    pub gaps: u64,
    /// Events appended
    pub events: u64,
    /// Commands accepted by the server
    pub commands_sent: u64,
    /// Commands that failed or were rejected
    pub commands_failed: u64,
    /// Batches the log refused
    pub storage_failures: u64,
}

/// Raw results of one tick's queries.
struct Fetched {
    infos: Vec<PlayerInfo>,
    log: Vec<LogLine>,
    map: String,
}

/// Capture task state for one session.
pub struct Capture<C: RemoteConsole, E: Environment, S: Storage> {
    session: SessionId,
    server: String,
    client: RconClient<C, E>,
    engine: DerivationEngine,
    cursor: LogCursor,
    modifiers: ModifierEngine,
    manager: SharedManager<S>,
    env: E,
    config: PollerConfig,
    stats: CaptureStats,
    resumed: bool,
}

impl<C: RemoteConsole, E: Environment, S: Storage> Capture<C, E, S> {
    /// Capture for `session` on `server`. Nothing happens until the first
    /// [`tick`](Self::tick).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: SessionId,
        server: impl Into<String>,
        client: RconClient<C, E>,
        engine: DerivationEngine,
        modifiers: ModifierEngine,
        manager: SharedManager<S>,
        env: E,
        config: PollerConfig,
    ) -> Self {
        Self {
            session,
            server: server.into(),
            client,
            engine,
            cursor: LogCursor::new(),
            modifiers,
            manager,
            env,
            config,
            stats: CaptureStats::default(),
            resumed: false,
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Remote-console client.
    pub fn client(&self) -> &RconClient<C, E> {
        &self.client
    }

    /// Derivation engine.
    pub fn engine(&self) -> &DerivationEngine {
        &self.engine
    }

    /// Modifier engine.
    pub fn modifiers(&self) -> &ModifierEngine {
        &self.modifiers
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// Closes the console before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> CaptureStats {
        tracing::info!(server = %self.server, session_id = self.session, "capture started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.tick().await;

            let interval = self.config.interval;
            tokio::select! {
                () = self.env.sleep(interval) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
        }

        self.client.close("capture stopped").await;
        tracing::info!(
            server = %self.server,
            session_id = self.session,
            ticks = self.stats.ticks,
            gaps = self.stats.gaps,
            events = self.stats.events,
            "capture stopped"
        );
        self.stats
    }

    /// One poll cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        if !self.resumed && !self.resume().await {
            return self.gap("stored log unavailable");
        }

        let ready = self.client.tick().await;
        self.apply_transitions();
        if !ready {
            return self.gap("connection not ready");
        }

        let deadline = self.config.tick_deadline;
        let minutes = self.config.log_window_minutes;
        let fetched = match tokio::time::timeout(deadline, fetch(&mut self.client, minutes)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                self.apply_transitions();
                tracing::debug!(server = %self.server, error = %e, "snapshot incomplete");
                return self.gap("query failed");
            },
            Err(_) => {
                self.client.record_failure(&RconError::Timeout(deadline)).await;
                self.apply_transitions();
                return self.gap("tick deadline exceeded");
            },
        };

        let now = self.env.now();
        let log = self.cursor.advance(fetched.log);
        let snapshot =
            Snapshot::assemble(now, fetched.infos, log, self.cursor.position(), Some(fetched.map), self.engine.current());
        let mut events = self.engine.ingest(snapshot);

        let actions = match self.engine.current() {
            Some(roster) => {
                let ctx = ModifierContext { roster, now, env: &self.env };
                let mut actions = Vec::new();
                for event in &events {
                    actions.extend(self.modifiers.handle(event, &ctx));
                }
                actions.extend(self.modifiers.tick(&ctx));
                actions
            },
            None => Vec::new(),
        };

        let mut commands = Vec::new();
        for action in actions {
            match action {
                ModifierAction::Execute(command) => commands.push(command),
                ModifierAction::Record { modifier, player, note } => {
                    events.push(self.engine.annotate(now, EventKind::RuleNote { modifier, player, note }));
                },
            }
        }

        let appended = {
            let mut manager = self.manager.lock().await;
            manager.append_events(self.session, &events)
        };
        let stored = match appended {
            Ok(stored) => stored,
            Err(e) => {
                self.stats.storage_failures += 1;
                tracing::error!(server = %self.server, session_id = self.session, error = %e, "failed to append events");
                0
            },
        };
        self.stats.events += stored as u64;

        let sent = self.send(commands).await;
        self.apply_transitions();
        TickOutcome::Captured { events: stored, commands: sent }
    }

    async fn send(&mut self, commands: Vec<Command>) -> usize {
        let mut sent = 0;
        for command in commands {
            if !self.client.is_ready() {
                tracing::warn!(server = %self.server, command = %command.redacted(), "connection lost, dropping command");
                self.stats.commands_failed += 1;
                continue;
            }
            match self.client.execute(&command).await {
                Ok(()) => {
                    tracing::info!(server = %self.server, command = %command.redacted(), "command sent");
                    self.stats.commands_sent += 1;
                    sent += 1;
                },
                Err(e) => {
                    tracing::warn!(server = %self.server, command = %command.redacted(), error = %e, "command failed");
                    self.stats.commands_failed += 1;
                },
            }
        }
        sent
    }

    fn apply_transitions(&mut self) {
        for transition in self.client.drain_transitions() {
            match transition {
                ConnectionAction::Degraded { reason } => {
                    tracing::warn!(server = %self.server, session_id = self.session, %reason, "suspending modifiers");
                    self.modifiers.suspend();
                },
                ConnectionAction::Recovered => {
                    tracing::info!(server = %self.server, session_id = self.session, "resuming modifiers");
                    self.modifiers.resume();
                },
                ConnectionAction::Connect | ConnectionAction::Disconnect { .. } => {},
            }
        }
    }

    /// Seed the engine from the stored log. False when storage failed; the
    /// next tick tries again.
    async fn resume(&mut self) -> bool {
        let (since, tail) = {
            let manager = self.manager.lock().await;
            let since = manager.get(self.session).and_then(|s| s.activated_at);
            (since, manager.log_tail(self.session, RESUME_TAIL))
        };
        let tail = match tail {
            Ok(tail) => tail,
            Err(StorageError::NotFound(_)) => Vec::new(),
            Err(e) => {
                tracing::warn!(server = %self.server, session_id = self.session, error = %e, "cannot read stored log");
                return false;
            },
        };
        if !tail.is_empty() {
            tracing::info!(server = %self.server, session_id = self.session, stored = tail.len(), "continuing stored log");
        }
        self.engine.resume(since, &tail);
        self.resumed = true;
        true
    }

    fn gap(&mut self, reason: &str) -> TickOutcome {
        self.stats.gaps += 1;
        tracing::debug!(server = %self.server, session_id = self.session, reason, "capture gap");
        TickOutcome::Gap
    }
}

/// Query the full snapshot set. Any failure fails the whole fetch.
async fn fetch<C: RemoteConsole, E: Environment>(
    client: &mut RconClient<C, E>,
    log_minutes: u32,
) -> Result<Fetched, RconError> {
    let entries = client.player_ids().await?;
    let mut infos = Vec::with_capacity(entries.len());
    for entry in entries {
        match client.player_info(&entry.name).await? {
            Some(info) => infos.push(info),
            None => tracing::trace!(player = %entry.name, "player left before playerinfo"),
        }
    }
    let log = client.show_log(log_minutes).await?;
    let map = client.map().await?;
    Ok(Fetched { infos, log, map })
}
