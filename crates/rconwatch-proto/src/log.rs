//! Admin-log line parser.
//!
//! `showlog <minutes>` returns every admin-log entry in the trailing window,
//! oldest first, one entry per line:
//!
//! ```text
//! [1:30:15 hours (1639143555)] KILL: Able(Allies/76561198000000001) -> Dog(Axis/76561198000000004) with M1 GARAND
//! [29.5 sec (1639148940)] CONNECTED Able (76561198000000001)
//! [30:00 min (1639145775)] CHAT[Unit][Able(Allies/76561198000000001)]: comms working?
//! ```
//!
//! The bracketed prefix holds a human-readable age (relative to the moment
//! the log was fetched) followed by the server's epoch seconds. Together they
//! give an estimate of the server clock at fetch time, which is what clock
//! calibration needs. An empty log is reported as the single word `EMPTY`.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtoError, Result},
    player::{PlayerId, Team},
};

/// Marker the server sends instead of an empty body.
pub const EMPTY_LOG: &str = "EMPTY";

/// Body prefixes that are recognised but carry nothing downstream uses.
const IGNORED_PREFIXES: &[&str] =
    &["TEAMSWITCH", "KICK:", "BAN:", "VOTESYS:", "MESSAGE:", "BANNED", "KICKED", "Player ["];

/// A player as referenced in a log body: `Name(Team/id)` or `Name (id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogParty {
    /// Display name at the time of the entry
    pub name: String,
    /// Side, when the entry names one
    pub team: Option<Team>,
    /// Player id
    pub id: PlayerId,
}

/// Chat channel of a `CHAT` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatChannel {
    /// Whole team
    Team,
    /// Own unit only
    Unit,
}

/// Parsed body of an admin-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    /// `KILL:` or `TEAM KILL:`
    Kill {
        /// Player credited with the kill
        killer: LogParty,
        /// Player killed
        victim: LogParty,
        /// Weapon label, passed through opaquely
        weapon: String,
        /// Whether both players were on the same side
        teamkill: bool,
    },
    /// `CONNECTED name (id)`
    Connected(LogParty),
    /// `DISCONNECTED name (id)`
    Disconnected(LogParty),
    /// `CHAT[channel][party]: message`
    Chat {
        /// Channel
        channel: ChatChannel,
        /// Sender
        sender: LogParty,
        /// Message text
        message: String,
    },
    /// `MATCH START map`
    MatchStart {
        /// Map name
        map: String,
    },
    /// ``MATCH ENDED `map` ALLIED (a - b) AXIS``
    MatchEnded {
        /// Map name
        map: String,
        /// Allied objective count
        allied: u32,
        /// Axis objective count
        axis: u32,
    },
    /// Known entry type with no downstream meaning
    Other,
}

/// One admin-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Server clock at the time of the entry, epoch seconds
    pub server_time: i64,
    /// Age of the entry relative to the moment the log was fetched, in
    /// milliseconds, when the prefix could be read
    pub age_ms: Option<u64>,
    /// Entry text after the bracketed prefix
    pub body: String,
    /// Parsed body
    pub kind: LogKind,
}

impl LogLine {
    /// Parse one entry, including its bracketed prefix.
    pub fn parse(entry: &str) -> Result<Self> {
        let malformed = || ProtoError::MalformedLogLine(entry.to_owned());

        let rest = entry.strip_prefix('[').ok_or_else(malformed)?;
        let close = rest.find(")] ").ok_or_else(malformed)?;
        let prefix = &rest[..close];
        let body = &rest[close + 3..];

        let open = prefix.rfind('(').ok_or_else(malformed)?;
        let server_time: i64 = prefix[open + 1..].trim().parse().map_err(|_| malformed())?;
        let age_ms = parse_age(prefix[..open].trim());

        let kind = parse_body(body).ok_or_else(malformed)?;
        Ok(Self { server_time, age_ms, body: body.to_owned(), kind })
    }

    /// Estimated server clock at fetch time, in epoch milliseconds.
    ///
    /// `None` when the age prefix was unreadable.
    pub fn server_now_ms(&self) -> Option<i64> {
        let age = i64::try_from(self.age_ms?).ok()?;
        self.server_time.checked_mul(1000)?.checked_add(age)
    }
}

/// Relative age text: `29.5 sec`, `30:00 min` or `1:30:15 hours`.
fn parse_age(text: &str) -> Option<u64> {
    let (value, unit) = text.split_once(' ')?;
    match unit.trim() {
        "sec" => {
            let secs: f64 = value.parse().ok()?;
            (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as u64)
        },
        "min" | "hours" => {
            let mut total: u64 = 0;
            for part in value.split(':') {
                total = total.checked_mul(60)?.checked_add(part.parse().ok()?)?;
            }
            total.checked_mul(1000)
        },
        _ => None,
    }
}

/// Split a `showlog` response into entries.
///
/// An entry starts with `[`; any other line continues the previous entry
/// (chat messages may contain line breaks). `EMPTY` yields no entries.
pub fn split_entries(text: &str) -> Vec<String> {
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim() == EMPTY_LOG || text.trim().is_empty() {
        return Vec::new();
    }

    let mut entries: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        match entries.last_mut() {
            Some(last) if !line.starts_with('[') => {
                last.push('\n');
                last.push_str(line);
            },
            _ => entries.push(line.to_owned()),
        }
    }
    entries
}

/// Parse every entry of a `showlog` response.
///
/// Entries that fail to parse are returned separately so the caller can log
/// them; they never abort the batch.
pub fn parse_showlog(text: &str) -> (Vec<LogLine>, Vec<ProtoError>) {
    let mut lines = Vec::new();
    let mut errors = Vec::new();
    for entry in split_entries(text) {
        match LogLine::parse(&entry) {
            Ok(line) => lines.push(line),
            Err(e) => errors.push(e),
        }
    }
    (lines, errors)
}

fn parse_body(body: &str) -> Option<LogKind> {
    if let Some(rest) = body.strip_prefix("TEAM KILL: ") {
        return parse_kill(rest, true);
    }
    if let Some(rest) = body.strip_prefix("KILL: ") {
        return parse_kill(rest, false);
    }
    if let Some(rest) = body.strip_prefix("CONNECTED ") {
        return parse_bare_party(rest).map(LogKind::Connected);
    }
    if let Some(rest) = body.strip_prefix("DISCONNECTED ") {
        return parse_bare_party(rest).map(LogKind::Disconnected);
    }
    if let Some(rest) = body.strip_prefix("CHAT[") {
        return parse_chat(rest);
    }
    if let Some(map) = body.strip_prefix("MATCH START ") {
        return Some(LogKind::MatchStart { map: map.trim().to_owned() });
    }
    if let Some(rest) = body.strip_prefix("MATCH ENDED ") {
        return parse_match_ended(rest);
    }
    if IGNORED_PREFIXES.iter().any(|p| body.starts_with(p)) {
        return Some(LogKind::Other);
    }
    None
}

/// `name(Team/id) -> name(Team/id) with WEAPON`
fn parse_kill(rest: &str, teamkill: bool) -> Option<LogKind> {
    let (killer, rest) = split_party(rest)?;
    let rest = rest.strip_prefix(" -> ")?;
    let (victim, rest) = split_party(rest)?;
    let weapon = rest.strip_prefix(" with ")?.trim();
    if weapon.is_empty() {
        return None;
    }
    Some(LogKind::Kill { killer, victim, weapon: weapon.to_owned(), teamkill })
}

/// `Team][name(Team/id)]: message`
fn parse_chat(rest: &str) -> Option<LogKind> {
    let (channel, rest) = rest.split_once("][")?;
    let channel = match channel {
        "Team" => ChatChannel::Team,
        "Unit" => ChatChannel::Unit,
        _ => return None,
    };
    let (sender, rest) = split_party(rest)?;
    let message = rest.strip_prefix("]: ")?;
    Some(LogKind::Chat { channel, sender, message: message.to_owned() })
}

/// `` `map` ALLIED (a - b) AXIS``
fn parse_match_ended(rest: &str) -> Option<LogKind> {
    let rest = rest.strip_prefix('`')?;
    let (map, rest) = rest.split_once('`')?;
    let score = rest.trim().strip_prefix("ALLIED (")?.trim_end().strip_suffix(") AXIS")?;
    let (allied, axis) = score.split_once(" - ")?;
    Some(LogKind::MatchEnded {
        map: map.to_owned(),
        allied: allied.trim().parse().ok()?,
        axis: axis.trim().parse().ok()?,
    })
}

/// Leading `name(Team/id)`; returns the party and the text after `)`.
///
/// Names may contain parentheses, so every `(Allies/` or `(Axis/` candidate
/// is tried in order until one encloses a well-formed id.
fn split_party(text: &str) -> Option<(LogParty, &str)> {
    for (open, _) in text.match_indices('(') {
        let inner = &text[open + 1..];
        let Some((label, after_label)) = inner.split_once('/') else {
            continue;
        };
        let Some(team) = Team::parse(label) else {
            continue;
        };
        let Some(close) = after_label.find(')') else {
            continue;
        };
        let id = &after_label[..close];
        if !PlayerId::is_well_formed(id) {
            continue;
        }
        let party = LogParty { name: text[..open].to_owned(), team: Some(team), id: PlayerId::new(id) };
        return Some((party, &after_label[close + 1..]));
    }
    None
}

/// `name (id)` with nothing after it.
fn parse_bare_party(text: &str) -> Option<LogParty> {
    let (name, id) = text.trim_end().rsplit_once(" (")?;
    let id = id.strip_suffix(')')?;
    if name.is_empty() || id.is_empty() {
        return None;
    }
    Some(LogParty { name: name.to_owned(), team: None, id: PlayerId::new(id) })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABLE: &str = "76561198000000001";
    const DOG: &str = "76561198000000004";

    #[test]
    fn parse_kill_line() {
        let line = LogLine::parse(&format!(
            "[1:30:15 hours (1639143555)] KILL: Able(Allies/{ABLE}) -> (WTH) Dog(Axis/{DOG}) with M1 GARAND"
        ))
        .unwrap();

        assert_eq!(line.server_time, 1_639_143_555);
        let LogKind::Kill { killer, victim, weapon, teamkill } = line.kind else {
            panic!("expected kill");
        };
        assert_eq!(killer.name, "Able");
        assert_eq!(killer.team, Some(Team::Allies));
        assert_eq!(victim.name, "(WTH) Dog");
        assert_eq!(victim.id.as_str(), DOG);
        assert_eq!(weapon, "M1 GARAND");
        assert!(!teamkill);
    }

    #[test]
    fn parse_team_kill_with_parens_in_name() {
        let line = LogLine::parse(&format!(
            "[5 sec (1639143560)] TEAM KILL: A(b)c(Axis/{ABLE}) -> Dog(Axis/{DOG}) with 150MM HOWITZER [sFH 18]"
        ))
        .unwrap();
        let LogKind::Kill { killer, weapon, teamkill, .. } = line.kind else {
            panic!("expected kill");
        };
        assert_eq!(killer.name, "A(b)c");
        assert_eq!(weapon, "150MM HOWITZER [sFH 18]");
        assert!(teamkill);
    }

    #[test]
    fn parse_age_prefixes() {
        let line = LogLine::parse("[29.5 sec (1000)] MATCH START Foy").unwrap();
        assert_eq!(line.age_ms, Some(29_500));
        assert_eq!(line.server_now_ms(), Some(1_029_500));

        assert_eq!(LogLine::parse("[30:00 min (1000)] MATCH START Foy").unwrap().age_ms, Some(1_800_000));
        assert_eq!(LogLine::parse("[1:30:15 hours (1000)] MATCH START Foy").unwrap().age_ms, Some(5_415_000));
        assert_eq!(LogLine::parse("[soon (1000)] MATCH START Foy").unwrap().age_ms, None);
    }

    #[test]
    fn parse_connect_and_disconnect() {
        let connected = LogLine::parse(&format!("[29.5 sec (1639148940)] CONNECTED Able Baker ({ABLE})")).unwrap();
        assert_eq!(
            connected.kind,
            LogKind::Connected(LogParty { name: "Able Baker".into(), team: None, id: PlayerId::new(ABLE) })
        );

        let gone = LogLine::parse(&format!("[1 min (1639148900)] DISCONNECTED Able Baker ({ABLE})")).unwrap();
        assert!(matches!(gone.kind, LogKind::Disconnected(_)));
    }

    #[test]
    fn parse_chat_line() {
        let line =
            LogLine::parse(&format!("[30:00 min (1639145775)] CHAT[Unit][Able(Axis/{ABLE})]: comms working?")).unwrap();
        assert_eq!(
            line.kind,
            LogKind::Chat {
                channel: ChatChannel::Unit,
                sender: LogParty { name: "Able".into(), team: Some(Team::Axis), id: PlayerId::new(ABLE) },
                message: "comms working?".into(),
            }
        );
    }

    #[test]
    fn parse_match_lines() {
        let start = LogLine::parse("[1 min (1639145000)] MATCH START SAINTE-MÈRE-ÉGLISE Warfare").unwrap();
        assert_eq!(start.kind, LogKind::MatchStart { map: "SAINTE-MÈRE-ÉGLISE Warfare".into() });

        let end = LogLine::parse("[1 min (1639145000)] MATCH ENDED `FOY Warfare` ALLIED (2 - 3) AXIS").unwrap();
        assert_eq!(end.kind, LogKind::MatchEnded { map: "FOY Warfare".into(), allied: 2, axis: 3 });
    }

    #[test]
    fn ignored_prefixes_are_other() {
        let line = LogLine::parse("[1 min (1639145000)] VOTESYS: Player started a vote").unwrap();
        assert_eq!(line.kind, LogKind::Other);
    }

    #[test]
    fn unknown_body_is_malformed() {
        assert!(matches!(
            LogLine::parse("[1 min (1639145000)] SOMETHING NEW"),
            Err(ProtoError::MalformedLogLine(_))
        ));
        assert!(LogLine::parse("no prefix").is_err());
        assert!(LogLine::parse("[1 min (abc)] KILL: x").is_err());
    }

    #[test]
    fn split_entries_handles_empty_and_continuations() {
        assert!(split_entries("EMPTY").is_empty());
        assert!(split_entries("").is_empty());

        let entries = split_entries(&format!(
            "[1 min (100)] CHAT[Team][Able(Allies/{ABLE})]: line one\nline two\n[1 min (101)] MATCH START Foy\n"
        ));
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("line one\nline two"));
    }

    #[test]
    fn parse_showlog_collects_errors() {
        let (lines, errors) = parse_showlog("[1 min (100)] MATCH START Foy\n[1 min (101)] GIBBERISH\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(errors.len(), 1);
    }
}
