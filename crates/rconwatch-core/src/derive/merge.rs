//! Raw admin-log feed to candidate events.
//!
//! Each new log line becomes zero or more candidates stamped with the line's
//! server time mapped through the clock calibration. Player references take
//! the side from the line when it names one, otherwise from the roster.

use rconwatch_proto::{LogKind, LogParty};

use super::{Candidate, Source, clock::ClockCalibration};
use crate::{event::{EventKind, PlayerRef}, snapshot::{RawLogLine, Snapshot}};

fn party_ref(party: &LogParty, roster: &Snapshot) -> PlayerRef {
    let team = party.team.or_else(|| roster.player(&party.id).and_then(|p| p.team));
    PlayerRef { id: party.id.clone(), name: party.name.clone(), team }
}

/// Candidate events for the log lines of `roster`.
pub fn raw_candidates(lines: &[RawLogLine], clock: &ClockCalibration, roster: &Snapshot) -> Vec<Candidate> {
    let mut out = Vec::new();
    for raw in lines {
        let at = clock.map_secs(raw.line.server_time);
        let mut push = |kind| out.push(Candidate { timestamp: at, kind, source: Source::RawFeed });

        match &raw.line.kind {
            LogKind::Kill { killer, victim, weapon, teamkill } => {
                let killer = party_ref(killer, roster);
                let victim = party_ref(victim, roster);
                push(EventKind::Kill {
                    killer: killer.clone(),
                    victim: victim.clone(),
                    weapon: weapon.clone(),
                    teamkill: *teamkill,
                });
                push(EventKind::Death { victim, killer: Some(killer), weapon: Some(weapon.clone()) });
            },
            LogKind::Connected(party) => push(EventKind::Connect { player: party_ref(party, roster) }),
            LogKind::Disconnected(party) => push(EventKind::Disconnect { player: party_ref(party, roster) }),
            LogKind::Chat { channel, sender, message } => push(EventKind::Chat {
                sender: party_ref(sender, roster),
                channel: *channel,
                message: message.clone(),
            }),
            LogKind::MatchStart { map } => push(EventKind::MatchStart { map: map.clone() }),
            LogKind::MatchEnded { map, allied, axis } => {
                push(EventKind::MatchEnd { map: map.clone(), allied: *allied, axis: *axis });
                for player in roster.players.values() {
                    push(EventKind::ScoreUpdate {
                        player: player.player_ref(),
                        kills: player.kills,
                        deaths: player.deaths,
                        score: player.score,
                    });
                }
            },
            LogKind::Other => {},
        }
    }
    out
}
