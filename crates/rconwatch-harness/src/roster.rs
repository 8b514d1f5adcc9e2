//! Player and admin-log line builders.
//!
//! Builders produce the same text the console would send, so scenarios
//! exercise the real parsers.

use rconwatch_proto::{PlayerId, PlayerInfo, Score, Team, UnitRef};

/// Well-formed 17-digit player id for slot `n`.
pub fn steam_id(n: u32) -> PlayerId {
    PlayerId::new(format!("7656119800000{n:04}"))
}

/// Player in slot `n`: name `player-<n>`, no kills, alive.
pub fn player(n: u32, team: Team, role: &str, unit: Option<u32>) -> PlayerInfo {
    PlayerInfo {
        name: format!("player-{n}"),
        id: steam_id(n),
        team: Some(team),
        role: Some(role.to_owned()),
        unit: unit.map(|id| UnitRef { id, name: unit_name(id) }),
        loadout: Some("Standard Issue".to_owned()),
        kills: 0,
        deaths: 0,
        score: Score::default(),
        level: Some(1),
        alive: None,
    }
}

/// `count` riflemen in slots `first..first + count`, split evenly between
/// the teams in units of six.
pub fn crowd(first: u32, count: u32) -> Vec<PlayerInfo> {
    (first..first + count)
        .map(|n| {
            let team = if n % 2 == 0 { Team::Allies } else { Team::Axis };
            player(n, team, "Rifleman", Some((n / 12) % 20))
        })
        .collect()
}

/// Phonetic unit label for a slot number.
pub fn unit_name(id: u32) -> String {
    const NAMES: &[&str] = &[
        "Able", "Baker", "Charlie", "Dog", "Easy", "Fox", "George", "How", "Item", "Jig", "King", "Love", "Mike",
        "Negat", "Option", "Prep", "Queen", "Roger", "Sugar", "Tare",
    ];
    NAMES.get(id as usize).map_or_else(|| format!("Unit{id}"), |name| (*name).to_owned())
}

/// `playerinfo` response block.
pub fn render_info(info: &PlayerInfo) -> String {
    let mut text = format!("Name: {}\nsteamID64: {}\n", info.name, info.id);
    match info.team {
        Some(team) => text.push_str(&format!("Team: {team}\n")),
        None => text.push_str("Team: None\n"),
    }
    if let Some(role) = &info.role {
        text.push_str(&format!("Role: {role}\n"));
    }
    if let Some(unit) = &info.unit {
        text.push_str(&format!("Unit: {} - {}\n", unit.id, unit.name));
    }
    if let Some(loadout) = &info.loadout {
        text.push_str(&format!("Loadout: {loadout}\n"));
    }
    text.push_str(&format!("Kills: {} - Deaths: {}\n", info.kills, info.deaths));
    let s = info.score;
    text.push_str(&format!("Score: C {}, O {}, D {}, S {}\n", s.combat, s.offense, s.defense, s.support));
    if let Some(level) = info.level {
        text.push_str(&format!("Level: {level}\n"));
    }
    if let Some(alive) = info.alive {
        text.push_str(&format!("Alive: {alive}\n"));
    }
    text
}

fn party(info: &PlayerInfo) -> String {
    let team = info.team.map_or_else(|| "None".to_owned(), |t| t.to_string());
    format!("{}({team}/{})", info.name, info.id)
}

/// `KILL:` or `TEAM KILL:` body.
pub fn kill_line(killer: &PlayerInfo, victim: &PlayerInfo, weapon: &str) -> String {
    let prefix = if killer.team == victim.team { "TEAM KILL" } else { "KILL" };
    format!("{prefix}: {} -> {} with {weapon}", party(killer), party(victim))
}

/// `CONNECTED` body.
pub fn connected_line(info: &PlayerInfo) -> String {
    format!("CONNECTED {} ({})", info.name, info.id)
}

/// `DISCONNECTED` body.
pub fn disconnected_line(info: &PlayerInfo) -> String {
    format!("DISCONNECTED {} ({})", info.name, info.id)
}

/// Team chat body.
pub fn chat_line(sender: &PlayerInfo, message: &str) -> String {
    format!("CHAT[Team][{}]: {message}", party(sender))
}

/// `MATCH START` body.
pub fn match_start_line(map: &str) -> String {
    format!("MATCH START {map}")
}

/// `MATCH ENDED` body.
pub fn match_end_line(map: &str, allied: u32, axis: u32) -> String {
    format!("MATCH ENDED `{map}` ALLIED ({allied} - {axis}) AXIS")
}

#[cfg(test)]
mod tests {
    use rconwatch_proto::{LogKind, LogLine};

    use super::*;

    #[test]
    fn rendered_info_parses_back() {
        let mut info = player(3, Team::Axis, "Officer", Some(2));
        info.kills = 4;
        info.deaths = 1;
        info.alive = Some(false);
        assert_eq!(PlayerInfo::parse(&render_info(&info)).unwrap(), info);
    }

    #[test]
    fn ids_are_well_formed() {
        assert!(PlayerId::is_well_formed(steam_id(12).as_str()));
    }

    #[test]
    fn kill_line_parses_as_teamkill() {
        let a = player(1, Team::Allies, "Rifleman", None);
        let b = player(2, Team::Allies, "Rifleman", None);
        let line = LogLine::parse(&format!("[1 sec (100)] {}", kill_line(&a, &b, "M1 GARAND"))).unwrap();
        assert!(matches!(line.kind, LogKind::Kill { teamkill: true, .. }));
    }

    #[test]
    fn crowd_splits_teams() {
        let players = crowd(0, 10);
        assert_eq!(players.iter().filter(|p| p.team == Some(Team::Allies)).count(), 5);
    }
}
