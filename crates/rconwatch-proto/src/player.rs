//! Player-state query parsers.
//!
//! Three queries describe who is on the server: `get slots` for the
//! population, `get playerids` for the roster, and one `playerinfo` per
//! player for team, role, unit and counters. The `playerinfo` answer is a
//! block of `Key: Value` lines:
//!
//! ```text
//! Name: Able Baker
//! steamID64: 76561198000000001
//! Team: Allies
//! Role: Officer
//! Unit: 0 - Able
//! Loadout: NCO
//! Kills: 3 - Deaths: 1
//! Score: C 50, O 0, D 40, S 10
//! Level: 34
//! ```
//!
//! `Team` reads `None` for players still picking a side, `Unit` and
//! `Loadout` are absent outside a unit/team, and newer server builds add an
//! `Alive: true|false` line.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::errors::{ProtoError, Result};

/// Stable player identity as reported by the console.
///
/// Either a 17-digit platform id or a 32-character hex id. Kept as an opaque
/// string; equality and ordering are by text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the text has one of the two id shapes the console emits.
    pub fn is_well_formed(id: &str) -> bool {
        (id.len() == 17 && id.bytes().all(|b| b.is_ascii_digit()))
            || (id.len() == 32 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Allied forces
    Allies,
    /// Axis forces
    Axis,
}

impl Team {
    /// Parse a console team label. `None` and unknown labels mean no team.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "Allies" => Some(Self::Allies),
            "Axis" => Some(Self::Axis),
            _ => None,
        }
    }

    /// The opposing side.
    pub fn opponent(self) -> Self {
        match self {
            Self::Allies => Self::Axis,
            Self::Axis => Self::Allies,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allies => f.write_str("Allies"),
            Self::Axis => f.write_str("Axis"),
        }
    }
}

/// Unit membership: numeric slot plus display label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    /// Slot number within the team
    pub id: u32,
    /// Unit label (`Able`, `Baker`, ...); passed through opaquely
    pub name: String,
}

/// Four-part score counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Combat effectiveness
    pub combat: u32,
    /// Offensive support
    pub offense: u32,
    /// Defensive support
    pub defense: u32,
    /// Team support
    pub support: u32,
}

/// One `get playerids` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    /// Display name
    pub name: String,
    /// Player id
    pub id: PlayerId,
}

impl PlayerEntry {
    /// Parse `name : id`. Names may themselves contain ` : `, so the id is
    /// taken from the last separator.
    pub fn parse(entry: &str) -> Result<Self> {
        let (name, id) = entry
            .rsplit_once(" : ")
            .ok_or_else(|| ProtoError::MalformedPlayerEntry(entry.to_owned()))?;
        let id = id.trim();
        if name.is_empty() || id.is_empty() {
            return Err(ProtoError::MalformedPlayerEntry(entry.to_owned()));
        }
        Ok(Self { name: name.to_owned(), id: PlayerId::new(id) })
    }
}

/// `get slots` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slots {
    /// Players currently connected
    pub online: u32,
    /// Server capacity
    pub max: u32,
}

impl Slots {
    /// Parse `online/max`.
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = || ProtoError::MalformedSlots(text.to_owned());
        let (online, max) = text.trim().split_once('/').ok_or_else(malformed)?;
        Ok(Self {
            online: online.trim().parse().map_err(|_| malformed())?,
            max: max.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// Parsed `playerinfo` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// Display name
    pub name: String,
    /// Player id
    pub id: PlayerId,
    /// Side, if one was picked
    pub team: Option<Team>,
    /// Role label, only meaningful with a team
    pub role: Option<String>,
    /// Unit membership
    pub unit: Option<UnitRef>,
    /// Loadout label
    pub loadout: Option<String>,
    /// Kill counter
    pub kills: u32,
    /// Death counter
    pub deaths: u32,
    /// Score counters
    pub score: Score,
    /// Account level
    pub level: Option<u32>,
    /// Alive flag, when the server reports one
    pub alive: Option<bool>,
}

impl PlayerInfo {
    /// Parse a `playerinfo` response block.
    ///
    /// Lines without `": "` are ignored. `Name` and `steamID64` are required;
    /// every other field degrades to a neutral default.
    pub fn parse(text: &str) -> Result<Self> {
        let fields: HashMap<String, &str> = text
            .lines()
            .filter_map(|line| line.split_once(": "))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
            .collect();

        let name = fields
            .get("name")
            .ok_or_else(|| ProtoError::MalformedPlayerInfo("missing Name".into()))?;
        let id = fields
            .get("steamid64")
            .ok_or_else(|| ProtoError::MalformedPlayerInfo("missing steamID64".into()))?;

        let team = fields.get("team").and_then(|label| Team::parse(label));
        let (role, loadout) = if team.is_some() {
            (
                fields.get("role").map(|r| (*r).to_owned()),
                fields.get("loadout").map(|l| (*l).to_owned()),
            )
        } else {
            (None, None)
        };

        let unit = fields.get("unit").map(|u| parse_unit(u)).transpose()?;
        let (kills, deaths) = fields.get("kills").map_or(Ok((0, 0)), |k| parse_counters(k))?;
        let score = fields.get("score").map_or(Ok(Score::default()), |s| parse_score(s))?;
        let level = fields.get("level").and_then(|l| l.parse().ok());
        let alive = fields.get("alive").and_then(|a| match a.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        });

        Ok(Self {
            name: (*name).to_owned(),
            id: PlayerId::new(*id),
            team,
            role,
            unit,
            loadout,
            kills,
            deaths,
            score,
            level,
            alive,
        })
    }
}

fn parse_unit(value: &str) -> Result<UnitRef> {
    let (id, name) = value
        .split_once(" - ")
        .ok_or_else(|| ProtoError::MalformedPlayerInfo(format!("bad Unit: {value}")))?;
    let id = id
        .trim()
        .parse()
        .map_err(|_| ProtoError::MalformedPlayerInfo(format!("bad Unit id: {value}")))?;
    Ok(UnitRef { id, name: name.trim().to_owned() })
}

/// `Kills` line value: `<k> - Deaths: <d>` (the `Kills: ` key is stripped).
fn parse_counters(value: &str) -> Result<(u32, u32)> {
    let bad = || ProtoError::MalformedPlayerInfo(format!("bad Kills: {value}"));
    let (kills, deaths) = value.split_once(" - Deaths: ").ok_or_else(bad)?;
    Ok((kills.trim().parse().map_err(|_| bad())?, deaths.trim().parse().map_err(|_| bad())?))
}

/// `Score` line value: `C <c>, O <o>, D <d>, S <s>`.
fn parse_score(value: &str) -> Result<Score> {
    let mut score = Score::default();
    for part in value.split(", ") {
        let (key, amount) = part
            .trim()
            .split_once(' ')
            .ok_or_else(|| ProtoError::MalformedPlayerInfo(format!("bad Score: {value}")))?;
        let amount: u32 = amount
            .trim()
            .parse()
            .map_err(|_| ProtoError::MalformedPlayerInfo(format!("bad Score: {value}")))?;
        match key {
            "C" => score.combat = amount,
            "O" => score.offense = amount,
            "D" => score.defense = amount,
            "S" => score.support = amount,
            _ => {}
        }
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_INFO: &str = "Name: Able Baker\n\
        steamID64: 76561198000000001\n\
        Team: Allies\n\
        Role: Officer\n\
        Unit: 0 - Able\n\
        Loadout: NCO\n\
        Kills: 3 - Deaths: 1\n\
        Score: C 50, O 0, D 40, S 10\n\
        Level: 34\n";

    #[test]
    fn parse_full_info() {
        let info = PlayerInfo::parse(FULL_INFO).unwrap();
        assert_eq!(info.name, "Able Baker");
        assert_eq!(info.id, PlayerId::new("76561198000000001"));
        assert_eq!(info.team, Some(Team::Allies));
        assert_eq!(info.role.as_deref(), Some("Officer"));
        assert_eq!(info.unit, Some(UnitRef { id: 0, name: "Able".into() }));
        assert_eq!((info.kills, info.deaths), (3, 1));
        assert_eq!(info.score, Score { combat: 50, offense: 0, defense: 40, support: 10 });
        assert_eq!(info.level, Some(34));
        assert_eq!(info.alive, None);
    }

    #[test]
    fn no_team_clears_role() {
        let info = PlayerInfo::parse("Name: X\nsteamID64: 76561198000000002\nTeam: None\nRole: Rifleman\n").unwrap();
        assert_eq!(info.team, None);
        assert_eq!(info.role, None);
        assert_eq!(info.unit, None);
        assert_eq!(info.score, Score::default());
    }

    #[test]
    fn alive_flag_when_present() {
        let info = PlayerInfo::parse("Name: X\nsteamID64: 1\nAlive: false\n").unwrap();
        assert_eq!(info.alive, Some(false));
    }

    #[test]
    fn missing_id_is_error() {
        assert!(matches!(PlayerInfo::parse("Name: X\n"), Err(ProtoError::MalformedPlayerInfo(_))));
    }

    #[test]
    fn unknown_role_passes_through() {
        let info = PlayerInfo::parse("Name: X\nsteamID64: 1\nTeam: Axis\nRole: Cartographer\n").unwrap();
        assert_eq!(info.role.as_deref(), Some("Cartographer"));
    }

    #[test]
    fn player_entry_with_separator_in_name() {
        let entry = PlayerEntry::parse("A : B : 76561198000000003").unwrap();
        assert_eq!(entry.name, "A : B");
        assert_eq!(entry.id.as_str(), "76561198000000003");
        assert!(PlayerEntry::parse("no separator").is_err());
    }

    #[test]
    fn slots_parse() {
        assert_eq!(Slots::parse("75/100").unwrap(), Slots { online: 75, max: 100 });
        assert!(Slots::parse("seventy").is_err());
    }

    #[test]
    fn id_shapes() {
        assert!(PlayerId::is_well_formed("76561198000000001"));
        assert!(PlayerId::is_well_formed("0123456789abcdef0123456789abcdef"));
        assert!(!PlayerId::is_well_formed("12345"));
    }
}
