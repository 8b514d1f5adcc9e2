//! Runtime configuration.
//!
//! The server list comes from a JSON file; every tunable has a `Default`
//! holding the documented value and the binary overrides a few of them from
//! the command line.

use std::{collections::HashSet, fmt, path::Path, time::Duration};

use rconwatch_core::{
    AutoSessionConfig, ConnectionConfig, DerivationConfig, ModifierConfig, ModifierKind, SessionConfig,
};
use serde::Deserialize;

use crate::error::ServerError;

/// Default time between capture ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default budget for one tick's queries.
pub const DEFAULT_TICK_DEADLINE: Duration = Duration::from_secs(10);

/// Default `showlog` window, in minutes.
pub const DEFAULT_LOG_WINDOW_MINUTES: u32 = 1;

/// Default quiet period that ends a multipart response.
pub const DEFAULT_READ_IDLE: Duration = Duration::from_millis(200);

/// One monitored game server.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    /// Unique name used in logs, session names and commands
    pub name: String,
    /// Host name or address
    pub host: String,
    /// Remote console port
    pub port: u16,
    /// Remote console password
    pub password: String,
    /// Start the AutoSession controller at boot
    #[serde(default)]
    pub auto_session: bool,
    /// Rule modifiers applied to every session on this server
    #[serde(default)]
    pub modifiers: Vec<ModifierKind>,
}

impl ServerEntry {
    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEntry")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"********")
            .field("auto_session", &self.auto_session)
            .field("modifiers", &self.modifiers)
            .finish()
    }
}

/// Parse a server list.
///
/// # Errors
///
/// `ServerError::Config` if the JSON is invalid, a name is empty, or two
/// entries share a name.
pub fn parse_servers(text: &str) -> Result<Vec<ServerEntry>, ServerError> {
    let servers: Vec<ServerEntry> =
        serde_json::from_str(text).map_err(|e| ServerError::Config(format!("invalid server list: {e}")))?;

    let mut names = HashSet::new();
    for server in &servers {
        if server.name.trim().is_empty() {
            return Err(ServerError::Config("server name must not be empty".into()));
        }
        if !names.insert(server.name.as_str()) {
            return Err(ServerError::Config(format!("duplicate server name: {}", server.name)));
        }
    }
    Ok(servers)
}

/// Read and parse a server list file.
pub fn load_servers(path: impl AsRef<Path>) -> Result<Vec<ServerEntry>, ServerError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_servers(&text)
}

/// Capture loop configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Budget for all queries of one tick; a tick that overruns is a gap
    pub tick_deadline: Duration,
    /// `showlog` window in minutes
    pub log_window_minutes: u32,
    /// Quiet period that ends a multipart response
    pub read_idle: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            tick_deadline: DEFAULT_TICK_DEADLINE,
            log_window_minutes: DEFAULT_LOG_WINDOW_MINUTES,
            read_idle: DEFAULT_READ_IDLE,
        }
    }
}

/// Everything the supervisor needs besides the server list.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Console liveness
    pub connection: ConnectionConfig,
    /// Capture loop
    pub poller: PollerConfig,
    /// Event derivation
    pub derivation: DerivationConfig,
    /// Session lifecycle
    pub session: SessionConfig,
    /// AutoSession controllers
    pub auto_session: AutoSessionConfig,
    /// Rule modifiers
    pub modifiers: ModifierConfig,
}
