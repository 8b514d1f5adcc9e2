//! In-memory game server with scripted faults.
//!
//! A [`SimServer`] holds what a real server would report: the roster, the
//! admin log, the current map. Tests mutate it between capture ticks and
//! inspect the commands it received. Every [`ScriptedConsole`] handed out
//! shares that state but has its own connection flag, the way a capture
//! task and an AutoSession controller each hold their own socket.

#![allow(clippy::disallowed_types, reason = "Synchronous test state only")]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use rconwatch_core::{Environment, LivenessState, RconError, RemoteConsole};
use rconwatch_proto::{Command, PlayerId, PlayerInfo, Team};

use crate::{roster::render_info, sim_env::SimEnv};

/// Server clock offset from the simulation clock, in seconds.
const DEFAULT_SKEW_SECS: i64 = 3;

struct State {
    name: String,
    password: String,
    players: BTreeMap<PlayerId, PlayerInfo>,
    /// (server epoch seconds, body), oldest first
    log: Vec<(i64, String)>,
    map: String,
    max_slots: u32,
    skew_secs: i64,
    offline: bool,
    reject_auth: bool,
    reject_commands: bool,
    /// Errors returned by the next requests, front first
    request_faults: VecDeque<RconError>,
    /// Responses that replace the real answer for the next requests
    overrides: VecDeque<String>,
    commands: Vec<Command>,
    connects: u32,
}

/// Simulated game server.
///
/// Clone is cheap; clones share state.
#[derive(Clone)]
pub struct SimServer {
    env: SimEnv,
    state: Arc<Mutex<State>>,
}

impl SimServer {
    /// Empty server on `foy_warfare` with 100 slots.
    pub fn new(name: impl Into<String>, env: SimEnv) -> Self {
        let state = State {
            name: name.into(),
            password: "password".to_owned(),
            players: BTreeMap::new(),
            log: Vec::new(),
            map: "foy_warfare".to_owned(),
            max_slots: 100,
            skew_secs: DEFAULT_SKEW_SECS,
            offline: false,
            reject_auth: false,
            reject_commands: false,
            request_faults: VecDeque::new(),
            overrides: VecDeque::new(),
            commands: Vec::new(),
            connects: 0,
        };
        Self { env, state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new, disconnected console for this server.
    pub fn console(&self) -> ScriptedConsole {
        ScriptedConsole { server: self.clone(), connected: false }
    }

    /// Server name.
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Add or replace a player.
    pub fn join(&self, info: PlayerInfo) {
        self.lock().players.insert(info.id.clone(), info);
    }

    /// Add several players.
    pub fn join_all(&self, infos: impl IntoIterator<Item = PlayerInfo>) {
        let mut state = self.lock();
        for info in infos {
            state.players.insert(info.id.clone(), info);
        }
    }

    /// Remove a player.
    pub fn leave(&self, id: &PlayerId) -> Option<PlayerInfo> {
        self.lock().players.remove(id)
    }

    /// Remove every player.
    pub fn clear(&self) {
        self.lock().players.clear();
    }

    /// Mutate a player in place. Returns false if absent.
    pub fn update(&self, id: &PlayerId, change: impl FnOnce(&mut PlayerInfo)) -> bool {
        match self.lock().players.get_mut(id) {
            Some(info) => {
                change(info);
                true
            },
            None => false,
        }
    }

    /// Current roster entry.
    pub fn player(&self, id: &PlayerId) -> Option<PlayerInfo> {
        self.lock().players.get(id).cloned()
    }

    /// Connected player count.
    pub fn population(&self) -> usize {
        self.lock().players.len()
    }

    /// Append an admin-log entry stamped with the current server time.
    pub fn log(&self, body: impl Into<String>) {
        let now = self.server_time();
        self.lock().log.push((now, body.into()));
    }

    /// Change the current map.
    pub fn set_map(&self, map: impl Into<String>) {
        self.lock().map = map.into();
    }

    /// Refuse every connect and request with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Answer `FAIL` to every login.
    pub fn set_reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    /// Answer `FAIL` to every administrative command.
    pub fn set_reject_commands(&self, reject: bool) {
        self.lock().reject_commands = reject;
    }

    /// Fail the next request with `error`. Faults queue up in order.
    pub fn fail_next(&self, error: RconError) {
        self.lock().request_faults.push_back(error);
    }

    /// Answer the next request with `text` regardless of the command.
    pub fn answer_next(&self, text: impl Into<String>) {
        self.lock().overrides.push_back(text.into());
    }

    /// Every command received, in order (logins excluded).
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Administrative commands received, in order.
    pub fn admin_commands(&self) -> Vec<Command> {
        self.lock().commands.iter().filter(|c| c.is_administrative()).cloned().collect()
    }

    /// Successful logins so far.
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    fn server_time(&self) -> i64 {
        self.env.now().timestamp() + self.lock().skew_secs
    }

    fn connect(&self) -> Result<(), RconError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RconError::Network("connection refused".into()));
        }
        if state.reject_auth || state.password.is_empty() {
            return Err(RconError::Auth);
        }
        state.connects += 1;
        Ok(())
    }

    fn answer(&self, command: &Command) -> Result<String, RconError> {
        let now = self.server_time();
        let mut state = self.lock();
        if state.offline {
            return Err(RconError::Network("connection reset".into()));
        }
        state.commands.push(command.clone());
        if let Some(fault) = state.request_faults.pop_front() {
            return Err(fault);
        }
        if let Some(text) = state.overrides.pop_front() {
            return Ok(text);
        }
        if command.is_administrative() && state.reject_commands {
            return Ok("FAIL".to_owned());
        }

        let text = match command {
            Command::Login { .. } => "SUCCESS".to_owned(),
            Command::GetSlots => format!("{}/{}", state.players.len(), state.max_slots),
            Command::GetMap => state.map.clone(),
            Command::GetPlayerIds => {
                let mut text = format!("{}\t", state.players.len());
                for info in state.players.values() {
                    text.push_str(&format!("{} : {}\t", info.name, info.id));
                }
                text
            },
            Command::PlayerInfo { name } => {
                state.players.values().find(|p| &p.name == name).map_or_else(|| "FAIL".to_owned(), render_info)
            },
            Command::ShowLog { minutes } => {
                let since = now - i64::from(*minutes) * 60;
                let lines: Vec<String> = state
                    .log
                    .iter()
                    .filter(|(time, _)| *time >= since)
                    .map(|(time, body)| format!("[{} sec ({time})] {body}", now - time))
                    .collect();
                if lines.is_empty() { "EMPTY".to_owned() } else { lines.join("\n") }
            },
            Command::Punish { name, .. } | Command::Kick { name, .. } => {
                let known = state.players.values().any(|p| &p.name == name);
                if matches!(command, Command::Kick { .. }) {
                    state.players.retain(|_, p| &p.name != name);
                }
                if known { "SUCCESS".to_owned() } else { "FAIL".to_owned() }
            },
            Command::SwitchTeamNow { name } => match state.players.values_mut().find(|p| &p.name == name) {
                Some(info) => {
                    info.team = info.team.map(Team::opponent);
                    "SUCCESS".to_owned()
                },
                None => "FAIL".to_owned(),
            },
            Command::Message { .. } | Command::Broadcast { .. } => "SUCCESS".to_owned(),
        };
        Ok(text)
    }
}

/// One console connection to a [`SimServer`].
pub struct ScriptedConsole {
    server: SimServer,
    connected: bool,
}

impl ScriptedConsole {
    /// Whether this console is logged in.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The server behind this console.
    pub fn server(&self) -> &SimServer {
        &self.server
    }
}

#[async_trait]
impl RemoteConsole for ScriptedConsole {
    async fn connect(&mut self, _timeout: Duration) -> Result<(), RconError> {
        self.connected = false;
        self.server.connect()?;
        self.connected = true;
        Ok(())
    }

    async fn request(&mut self, command: &Command, _timeout: Duration) -> Result<String, RconError> {
        if !self.connected {
            return Err(RconError::NotReady(LivenessState::Disconnected));
        }
        let result = self.server.answer(command);
        if let Err(e) = &result {
            if e.breaks_transport() {
                self.connected = false;
            }
        }
        result
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    fn endpoint(&self) -> String {
        format!("sim:{}", self.server.name())
    }
}
