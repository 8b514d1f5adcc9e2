//! Snapshot-to-snapshot diffing.
//!
//! Compares the retained snapshot with a new one and produces candidate
//! events stamped with the new snapshot's time. Membership is compared by
//! stable player id; for players present in both, team, unit, role and alive
//! are compared independently, so one poll can yield several changes for the
//! same player.

use super::{Candidate, Source};
use crate::{event::EventKind, snapshot::Snapshot};

/// Candidate events describing the change from `old` to `new`.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<Candidate> {
    let at = new.taken_at;
    let mut out = Vec::new();
    let mut push = |kind| out.push(Candidate { timestamp: at, kind, source: Source::Snapshot });

    for (id, before) in &old.players {
        if !new.players.contains_key(id) {
            push(EventKind::Disconnect { player: before.player_ref() });
            push(EventKind::ScoreUpdate {
                player: before.player_ref(),
                kills: before.kills,
                deaths: before.deaths,
                score: before.score,
            });
        }
    }

    for (id, after) in &new.players {
        let Some(before) = old.players.get(id) else {
            push(EventKind::Connect { player: after.player_ref() });
            continue;
        };
        let player = after.player_ref();

        if before.team != after.team {
            push(EventKind::TeamChange { player: player.clone(), old: before.team, new: after.team });
        }
        if before.unit != after.unit {
            push(EventKind::UnitChange { player: player.clone(), old: before.unit.clone(), new: after.unit.clone() });
        }
        if before.role != after.role {
            push(EventKind::RoleChange { player: player.clone(), old: before.role.clone(), new: after.role.clone() });
        }
        match (before.alive, after.alive) {
            (true, false) => push(EventKind::Death { victim: player, killer: None, weapon: None }),
            (false, true) => push(EventKind::Redeploy { player }),
            _ => {},
        }
    }

    for (key, unit) in &old.units {
        if !new.units.contains_key(key) {
            push(EventKind::UnitDisband { team: unit.team, unit: unit.unit.clone() });
        }
    }
    for (key, unit) in &new.units {
        if !old.units.contains_key(key) {
            push(EventKind::UnitCreate { team: unit.team, unit: unit.unit.clone() });
        }
    }

    out
}
