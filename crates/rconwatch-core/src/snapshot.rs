//! Point-in-time server state.
//!
//! A [`Snapshot`] is everything one poll learned: the roster with per-player
//! state, the units derived from it, and the admin-log lines that appeared
//! since the previous poll. Snapshots are immutable once assembled. The
//! derivation engine retains exactly one (the previous) per connection.
//!
//! The console does not report every field on every server build. Where a
//! field is missing it is inferred from the previous snapshot: a player whose
//! death counter went up since the last poll is considered dead for this
//! snapshot, and alive again on the next one unless it rises again.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rconwatch_proto::{LogKind, LogLine, PlayerId, PlayerInfo, Score, Team, UnitRef};
use serde::{Deserialize, Serialize};

use crate::event::PlayerRef;

/// Roles that lead a unit.
pub const UNIT_LEADER_ROLES: &[&str] = &["Officer", "TankCommander", "Spotter"];

/// Role that leads a whole team.
pub const COMMANDER_ROLE: &str = "ArmyCommander";

/// Roles that crew vehicles.
pub const TANK_ROLES: &[&str] = &["TankCommander", "Crewman"];

/// State of one connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Stable identity
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Side
    pub team: Option<Team>,
    /// Role label, opaque
    pub role: Option<String>,
    /// Unit membership
    pub unit: Option<UnitRef>,
    /// Loadout label
    pub loadout: Option<String>,
    /// Alive flag, reported or inferred
    pub alive: bool,
    /// Always true for players in a snapshot roster
    pub connected: bool,
    /// Last weapon seen in a kill by this player
    pub weapon: Option<String>,
    /// Kill counter
    pub kills: u32,
    /// Death counter
    pub deaths: u32,
    /// Score counters
    pub score: Score,
    /// Account level
    pub level: Option<u32>,
}

impl PlayerState {
    /// Build from a `playerinfo` answer, inferring unreported fields from the
    /// same player's previous state.
    pub fn from_info(info: PlayerInfo, previous: Option<&PlayerState>) -> Self {
        let alive = info
            .alive
            .unwrap_or_else(|| previous.is_none_or(|prev| info.deaths <= prev.deaths));
        let weapon = previous.and_then(|prev| prev.weapon.clone());

        Self {
            id: info.id,
            name: info.name,
            team: info.team,
            role: info.role,
            unit: info.unit,
            loadout: info.loadout,
            alive,
            connected: true,
            weapon,
            kills: info.kills,
            deaths: info.deaths,
            score: info.score,
            level: info.level,
        }
    }

    /// Identity as carried by events.
    pub fn player_ref(&self) -> PlayerRef {
        PlayerRef { id: self.id.clone(), name: self.name.clone(), team: self.team }
    }

    /// Whether this player commands their team.
    pub fn is_commander(&self) -> bool {
        self.role.as_deref() == Some(COMMANDER_ROLE)
    }

    /// Whether this player leads their unit.
    pub fn is_unit_leader(&self) -> bool {
        self.role.as_deref().is_some_and(|role| UNIT_LEADER_ROLES.contains(&role))
    }

    /// Whether this player is in a vehicle crew role.
    pub fn is_tank_crew(&self) -> bool {
        self.role.as_deref().is_some_and(|role| TANK_ROLES.contains(&role))
    }
}

/// A unit as seen in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    /// Owning side
    pub team: Team,
    /// Slot and label
    pub unit: UnitRef,
    /// Members, ordered by id
    pub members: Vec<PlayerId>,
    /// Member holding a leader role, if any
    pub leader: Option<PlayerId>,
}

/// Admin-log line with its per-connection cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogLine {
    /// Monotonic position in this connection's log, never rewound
    pub cursor: u64,
    /// Parsed line
    pub line: LogLine,
}

/// One consistent view of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Local wall-clock time when the poll completed
    pub taken_at: DateTime<Utc>,
    /// Roster, ordered by id
    pub players: BTreeMap<PlayerId, PlayerState>,
    /// Units keyed by side and slot
    pub units: BTreeMap<(Team, u32), UnitState>,
    /// Log lines new since the previous snapshot, oldest first
    pub log: Vec<RawLogLine>,
    /// Cursor after the last line in `log`
    pub log_cursor: u64,
    /// Current map, when queried
    pub map: Option<String>,
}

impl Snapshot {
    /// Assemble a snapshot from one poll's query results.
    ///
    /// `previous` is the retained snapshot, used only to infer fields the
    /// console did not report.
    pub fn assemble(
        taken_at: DateTime<Utc>,
        infos: Vec<PlayerInfo>,
        log: Vec<RawLogLine>,
        log_cursor: u64,
        map: Option<String>,
        previous: Option<&Snapshot>,
    ) -> Self {
        let mut players = BTreeMap::new();
        for info in infos {
            let prev = previous.and_then(|snap| snap.players.get(&info.id));
            let state = PlayerState::from_info(info, prev);
            players.insert(state.id.clone(), state);
        }

        for raw in &log {
            if let LogKind::Kill { killer, weapon, .. } = &raw.line.kind {
                if let Some(player) = players.get_mut(&killer.id) {
                    player.weapon = Some(weapon.clone());
                }
            }
        }

        let units = collect_units(&players);
        Self { taken_at, players, units, log, log_cursor, map }
    }

    /// Snapshot with no players and no log, for tests and baselines.
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self::assemble(taken_at, Vec::new(), Vec::new(), 0, None, None)
    }

    /// Look up a player.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Number of players in the roster.
    pub fn population(&self) -> usize {
        self.players.len()
    }

    /// Commander of `team`, if the role is taken.
    pub fn commander(&self, team: Team) -> Option<&PlayerState> {
        self.players.values().find(|p| p.team == Some(team) && p.is_commander())
    }

    /// Every player on `team`, ordered by id.
    pub fn team_members(&self, team: Team) -> Vec<&PlayerState> {
        self.players.values().filter(|p| p.team == Some(team)).collect()
    }

    /// Members of the given unit, ordered by id.
    pub fn unit_members(&self, team: Team, unit_id: u32) -> Vec<&PlayerState> {
        self.players
            .values()
            .filter(|p| p.team == Some(team) && p.unit.as_ref().is_some_and(|u| u.id == unit_id))
            .collect()
    }
}

fn collect_units(players: &BTreeMap<PlayerId, PlayerState>) -> BTreeMap<(Team, u32), UnitState> {
    let mut units: BTreeMap<(Team, u32), UnitState> = BTreeMap::new();
    for player in players.values() {
        let (Some(team), Some(unit)) = (player.team, player.unit.as_ref()) else {
            continue;
        };
        let entry = units.entry((team, unit.id)).or_insert_with(|| UnitState {
            team,
            unit: unit.clone(),
            members: Vec::new(),
            leader: None,
        });
        entry.members.push(player.id.clone());
        if entry.leader.is_none() && player.is_unit_leader() {
            entry.leader = Some(player.id.clone());
        }
    }
    units
}

/// Per-connection admin-log read position.
///
/// `showlog` returns a trailing window, so consecutive polls overlap. The
/// cursor remembers the newest server second it has passed on and which
/// entries of that second it has already seen; older entries and repeats are
/// dropped, everything else is numbered with a monotonic cursor.
#[derive(Debug, Clone, Default)]
pub struct LogCursor {
    last_time: Option<i64>,
    seen_at_last_time: HashSet<String>,
    next: u64,
}

impl LogCursor {
    /// Fresh cursor at position 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor value the next new line will get.
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Filter a fetched window down to unseen lines and number them.
    ///
    /// Lines are expected oldest first, as the console returns them.
    pub fn advance(&mut self, lines: Vec<LogLine>) -> Vec<RawLogLine> {
        let mut fresh = Vec::new();
        for line in lines {
            match self.last_time {
                Some(last) if line.server_time < last => continue,
                Some(last) if line.server_time == last => {
                    if !self.seen_at_last_time.insert(line.body.clone()) {
                        continue;
                    }
                },
                _ => {
                    self.last_time = Some(line.server_time);
                    self.seen_at_last_time.clear();
                    self.seen_at_last_time.insert(line.body.clone());
                },
            }

            fresh.push(RawLogLine { cursor: self.next, line });
            self.next += 1;
        }
        fresh
    }
}
