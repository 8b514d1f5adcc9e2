//! Reconstructed in-game events.
//!
//! Events are immutable once emitted. Within one server they are totally
//! ordered by `(timestamp, seq)`; `seq` is assigned by the derivation engine
//! in emission order and never reused.
//!
//! # Variant priority
//!
//! When two events share a timestamp, membership changes sort first, then
//! team/unit/role changes, then combat, then everything else:
//!
//! | Priority | Variants |
//! |----------|----------|
//! | 0 | `Connect`, `Disconnect` |
//! | 1 | `TeamChange`, `UnitChange`, `RoleChange`, `UnitCreate`, `UnitDisband`, `Redeploy` |
//! | 2 | `Kill`, `Death` |
//! | 3 | `ScoreUpdate`, `Chat`, `MatchStart`, `MatchEnd`, `RuleNote` |

use chrono::{DateTime, Utc};
use rconwatch_proto::{PlayerId, Score, Team, UnitRef, log::ChatChannel};
use serde::{Deserialize, Serialize};

use crate::modifier::ModifierKind;

/// A player as referenced by an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    /// Stable identity
    pub id: PlayerId,
    /// Display name at the time of the event
    pub name: String,
    /// Side at the time of the event, if known
    pub team: Option<Team>,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Player joined the server
    Connect {
        /// Player
        player: PlayerRef,
    },
    /// Player left the server
    Disconnect {
        /// Player
        player: PlayerRef,
    },
    /// Player switched sides (or picked one)
    TeamChange {
        /// Player
        player: PlayerRef,
        /// Previous side
        old: Option<Team>,
        /// New side
        new: Option<Team>,
    },
    /// Player moved between units
    UnitChange {
        /// Player
        player: PlayerRef,
        /// Previous unit
        old: Option<UnitRef>,
        /// New unit
        new: Option<UnitRef>,
    },
    /// Player changed role
    RoleChange {
        /// Player
        player: PlayerRef,
        /// Previous role
        old: Option<String>,
        /// New role
        new: Option<String>,
    },
    /// A unit appeared
    UnitCreate {
        /// Owning side
        team: Team,
        /// Unit
        unit: UnitRef,
    },
    /// A unit disappeared
    UnitDisband {
        /// Owning side
        team: Team,
        /// Unit
        unit: UnitRef,
    },
    /// Player came back to life without reconnecting
    ///
    /// When the server does not report an alive flag, life is inferred from
    /// the death counter: a player counts as dead for the one poll in which
    /// the counter rose. The redeploy is then emitted on the following poll
    /// and only approximates the real respawn time.
    Redeploy {
        /// Player
        player: PlayerRef,
    },
    /// One player killed another
    Kill {
        /// Player credited with the kill
        killer: PlayerRef,
        /// Player killed
        victim: PlayerRef,
        /// Weapon label
        weapon: String,
        /// Both players on the same side
        teamkill: bool,
    },
    /// Player died
    Death {
        /// Player
        victim: PlayerRef,
        /// Killer, when the raw feed named one
        killer: Option<PlayerRef>,
        /// Weapon, when known
        weapon: Option<String>,
    },
    /// Final counters for a player (on leave, or at match end)
    ScoreUpdate {
        /// Player
        player: PlayerRef,
        /// Kill counter
        kills: u32,
        /// Death counter
        deaths: u32,
        /// Score counters
        score: Score,
    },
    /// Chat message
    Chat {
        /// Sender
        sender: PlayerRef,
        /// Channel
        channel: ChatChannel,
        /// Text
        message: String,
    },
    /// Match began
    MatchStart {
        /// Map name
        map: String,
    },
    /// Match ended
    MatchEnd {
        /// Map name
        map: String,
        /// Allied objectives held
        allied: u32,
        /// Axis objectives held
        axis: u32,
    },
    /// A rule modifier made a decision worth keeping in the log
    RuleNote {
        /// Modifier that made the decision
        modifier: ModifierKind,
        /// Player concerned
        player: Option<PlayerRef>,
        /// What happened
        note: String,
    },
}

/// Identity of an event for deduplication: variant, players and, for state
/// changes, the new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    variant: &'static str,
    players: Vec<PlayerId>,
    detail: Option<String>,
}

impl EventKind {
    /// Short variant name, used for logs and dedup keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::TeamChange { .. } => "team_change",
            Self::UnitChange { .. } => "unit_change",
            Self::RoleChange { .. } => "role_change",
            Self::UnitCreate { .. } => "unit_create",
            Self::UnitDisband { .. } => "unit_disband",
            Self::Redeploy { .. } => "redeploy",
            Self::Kill { .. } => "kill",
            Self::Death { .. } => "death",
            Self::ScoreUpdate { .. } => "score_update",
            Self::Chat { .. } => "chat",
            Self::MatchStart { .. } => "match_start",
            Self::MatchEnd { .. } => "match_end",
            Self::RuleNote { .. } => "rule_note",
        }
    }

    /// Tie-break rank among events with equal timestamps (lower first).
    pub fn priority(&self) -> u8 {
        match self {
            Self::Connect { .. } | Self::Disconnect { .. } => 0,
            Self::TeamChange { .. }
            | Self::UnitChange { .. }
            | Self::RoleChange { .. }
            | Self::UnitCreate { .. }
            | Self::UnitDisband { .. }
            | Self::Redeploy { .. } => 1,
            Self::Kill { .. } | Self::Death { .. } => 2,
            Self::ScoreUpdate { .. }
            | Self::Chat { .. }
            | Self::MatchStart { .. }
            | Self::MatchEnd { .. }
            | Self::RuleNote { .. } => 3,
        }
    }

    /// Player the event is primarily about.
    pub fn subject(&self) -> Option<&PlayerRef> {
        match self {
            Self::Connect { player }
            | Self::Disconnect { player }
            | Self::TeamChange { player, .. }
            | Self::UnitChange { player, .. }
            | Self::RoleChange { player, .. }
            | Self::Redeploy { player }
            | Self::ScoreUpdate { player, .. } => Some(player),
            Self::Kill { killer, .. } => Some(killer),
            Self::Death { victim, .. } => Some(victim),
            Self::Chat { sender, .. } => Some(sender),
            Self::RuleNote { player, .. } => player.as_ref(),
            Self::UnitCreate { .. } | Self::UnitDisband { .. } | Self::MatchStart { .. } | Self::MatchEnd { .. } => {
                None
            },
        }
    }

    /// Deduplication identity.
    ///
    /// Two events with equal keys and timestamps within the tolerance window
    /// describe the same occurrence. `Death` is keyed on the victim only, so a
    /// death seen in the roster and a kill line naming the same victim
    /// collapse into one.
    pub fn dedup_key(&self) -> DedupKey {
        let ids = |refs: &[&PlayerRef]| refs.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        let (players, detail) = match self {
            Self::Connect { player } | Self::Disconnect { player } | Self::Redeploy { player } => {
                (ids(&[player]), None)
            },
            Self::TeamChange { player, new, .. } => (ids(&[player]), new.map(|t| t.to_string())),
            Self::UnitChange { player, new, .. } => (ids(&[player]), new.as_ref().map(|u| u.id.to_string())),
            Self::RoleChange { player, new, .. } => (ids(&[player]), new.clone()),
            Self::UnitCreate { team, unit } | Self::UnitDisband { team, unit } => {
                (Vec::new(), Some(format!("{team}/{}", unit.id)))
            },
            Self::Kill { killer, victim, .. } => (ids(&[killer, victim]), None),
            Self::Death { victim, .. } => (ids(&[victim]), None),
            Self::ScoreUpdate { player, .. } => (ids(&[player]), None),
            Self::Chat { sender, message, .. } => (ids(&[sender]), Some(message.clone())),
            Self::MatchStart { map } => (Vec::new(), Some(map.clone())),
            Self::MatchEnd { map, .. } => (Vec::new(), Some(map.clone())),
            Self::RuleNote { player, note, .. } => {
                (player.iter().map(|p| p.id.clone()).collect(), Some(note.clone()))
            },
        };
        DedupKey { variant: self.name(), players, detail }
    }
}

/// An emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Wall-clock time (local clock, calibrated)
    pub timestamp: DateTime<Utc>,
    /// Per-server emission order
    pub seq: u64,
    /// Payload
    pub kind: EventKind,
}

impl Event {
    /// Ordering key within a server.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> PlayerRef {
        PlayerRef { id: PlayerId::new(id), name: id.to_owned(), team: Some(Team::Allies) }
    }

    #[test]
    fn priority_bands() {
        assert_eq!(EventKind::Connect { player: player("a") }.priority(), 0);
        assert_eq!(EventKind::Redeploy { player: player("a") }.priority(), 1);
        assert_eq!(
            EventKind::Death { victim: player("a"), killer: None, weapon: None }.priority(),
            2
        );
        assert_eq!(EventKind::MatchStart { map: "Foy".into() }.priority(), 3);
    }

    #[test]
    fn death_key_ignores_killer() {
        let bare = EventKind::Death { victim: player("v"), killer: None, weapon: None };
        let rich = EventKind::Death { victim: player("v"), killer: Some(player("k")), weapon: Some("MP40".into()) };
        assert_eq!(bare.dedup_key(), rich.dedup_key());
    }

    #[test]
    fn role_changes_keyed_by_new_role() {
        let to_medic = EventKind::RoleChange { player: player("a"), old: None, new: Some("Medic".into()) };
        let back = EventKind::RoleChange { player: player("a"), old: Some("Medic".into()), new: None };
        assert_ne!(to_medic.dedup_key(), back.dedup_key());
    }

    #[test]
    fn connect_and_disconnect_differ() {
        assert_ne!(
            EventKind::Connect { player: player("a") }.dedup_key(),
            EventKind::Disconnect { player: player("a") }.dedup_key()
        );
    }
}
