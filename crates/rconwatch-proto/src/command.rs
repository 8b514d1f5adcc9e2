//! Typed console commands.
//!
//! Commands are plain text lines. Player names are quoted because they may
//! contain spaces; reasons are quoted and have embedded double quotes
//! replaced so they cannot terminate the argument early.

use std::fmt;

/// Expected response shape for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Single status word or short text
    Single,
    /// Tab-separated array; read until it unpacks cleanly
    Array,
    /// Free text that may span several packets; read until idle
    Multipart,
}

/// A remote-console request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate the connection
    Login {
        /// Console password
        password: String,
    },
    /// `get slots`: online and maximum player counts
    GetSlots,
    /// `get playerids`: names and ids of connected players
    GetPlayerIds,
    /// `get map`: current map name
    GetMap,
    /// `playerinfo <name>`: detailed state of one player
    PlayerInfo {
        /// Player display name
        name: String,
    },
    /// `showlog <minutes>`: admin log for the trailing window
    ShowLog {
        /// Window length in minutes
        minutes: u32,
    },
    /// Kill a player
    Punish {
        /// Player display name
        name: String,
        /// Reason shown to the player
        reason: String,
    },
    /// Remove a player from the server
    Kick {
        /// Player display name
        name: String,
        /// Reason shown to the player
        reason: String,
    },
    /// Move a player to the other team immediately
    SwitchTeamNow {
        /// Player display name
        name: String,
    },
    /// Private message to one player
    Message {
        /// Player id
        player_id: String,
        /// Message body
        text: String,
    },
    /// Message to every player
    Broadcast {
        /// Message body
        text: String,
    },
}

impl Command {
    /// Text sent on the wire (before XOR).
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// How the response to this command is framed.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Self::GetPlayerIds => ResponseKind::Array,
            Self::ShowLog { .. } | Self::PlayerInfo { .. } => ResponseKind::Multipart,
            Self::Login { .. }
            | Self::GetSlots
            | Self::GetMap
            | Self::Punish { .. }
            | Self::Kick { .. }
            | Self::SwitchTeamNow { .. }
            | Self::Message { .. }
            | Self::Broadcast { .. } => ResponseKind::Single,
        }
    }

    /// Whether this command changes server state.
    ///
    /// Administrative commands are only sent over a healthy connection.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            Self::Punish { .. }
                | Self::Kick { .. }
                | Self::SwitchTeamNow { .. }
                | Self::Message { .. }
                | Self::Broadcast { .. }
        )
    }

    /// Text safe to log. Credentials are masked.
    pub fn redacted(&self) -> String {
        match self {
            Self::Login { .. } => "login ********".to_owned(),
            other => other.encode(),
        }
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "'"))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login { password } => write!(f, "login {password}"),
            Self::GetSlots => f.write_str("get slots"),
            Self::GetPlayerIds => f.write_str("get playerids"),
            Self::GetMap => f.write_str("get map"),
            Self::PlayerInfo { name } => write!(f, "playerinfo {name}"),
            Self::ShowLog { minutes } => write!(f, "showlog {minutes}"),
            Self::Punish { name, reason } => write!(f, "punish {} {}", quote(name), quote(reason)),
            Self::Kick { name, reason } => write!(f, "kick {} {}", quote(name), quote(reason)),
            Self::SwitchTeamNow { name } => write!(f, "switchteamnow {}", quote(name)),
            Self::Message { player_id, text } => write!(f, "message {} {text}", quote(player_id)),
            Self::Broadcast { text } => write!(f, "broadcast {text}"),
        }
    }
}
