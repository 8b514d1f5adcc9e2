//! Property-based tests for the wire parsers.
//!
//! The console is an untrusted peer: every parser must reject garbage with an
//! error instead of panicking, and well-formed input built from arbitrary
//! names must parse back to the same parties.

use proptest::prelude::*;
use rconwatch_proto::{
    Command, LogKind, LogLine, PlayerEntry, PlayerInfo, Slots, Team, XorCipher,
    log::parse_showlog, unpack_array,
};

/// Display names as the console allows them: printable, may contain spaces
/// and parentheses, never a line break.
fn display_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ()\\[\\]._-]{1,24}".prop_filter("non-blank", |s| !s.trim().is_empty())
}

fn player_id() -> impl Strategy<Value = String> {
    prop_oneof!["[0-9]{17}", "[0-9a-f]{32}"]
}

fn team() -> impl Strategy<Value = Team> {
    prop_oneof![Just(Team::Allies), Just(Team::Axis)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_parsers_never_panic(text in "\\PC*") {
        let _ = LogLine::parse(&text);
        let _ = parse_showlog(&text);
        let _ = unpack_array(&text);
        let _ = PlayerInfo::parse(&text);
        let _ = PlayerEntry::parse(&text);
        let _ = Slots::parse(&text);
    }

    #[test]
    fn prop_kill_line_preserves_parties(
        killer in display_name(),
        killer_id in player_id(),
        killer_team in team(),
        victim in display_name(),
        victim_id in player_id(),
        weapon in "[A-Z0-9 ]{1,20}".prop_filter("non-blank", |s| !s.trim().is_empty()),
        time in 1_600_000_000i64..1_900_000_000,
    ) {
        let entry = format!(
            "[10 sec ({time})] KILL: {killer}({killer_team}/{killer_id}) -> {victim}({}/{victim_id}) with {weapon}",
            killer_team.opponent(),
        );
        let line = LogLine::parse(&entry).unwrap();
        prop_assert_eq!(line.server_time, time);

        match line.kind {
            LogKind::Kill { killer: k, victim: v, weapon: w, teamkill } => {
                prop_assert_eq!(k.id.as_str(), killer_id.as_str());
                prop_assert_eq!(k.team, Some(killer_team));
                prop_assert_eq!(v.id.as_str(), victim_id.as_str());
                prop_assert_eq!(w, weapon.trim());
                prop_assert!(!teamkill);
            },
            other => prop_assert!(false, "expected kill, got {:?}", other),
        }
    }

    #[test]
    fn prop_array_count_must_match(items in prop::collection::vec("[a-z0-9 :]{0,12}", 0..12), extra in 1usize..4) {
        let mut wire = format!("{}\t", items.len());
        for item in &items {
            wire.push_str(item);
            wire.push('\t');
        }
        prop_assert_eq!(unpack_array(&wire).unwrap(), items.clone());

        let mut lying = format!("{}\t", items.len() + extra);
        for item in &items {
            lying.push_str(item);
            lying.push('\t');
        }
        prop_assert!(unpack_array(&lying).is_err());
    }

    #[test]
    fn prop_cipher_is_involution(key in prop::collection::vec(any::<u8>(), 1..16), message in prop::collection::vec(any::<u8>(), 0..256)) {
        let cipher = XorCipher::from_greeting(key).unwrap();
        prop_assert_eq!(cipher.apply(&cipher.apply(&message)).to_vec(), message);
    }
}

#[test]
fn admin_command_encodings() {
    insta::assert_snapshot!(
        Command::Punish { name: "Able Baker".into(), reason: "Panthers are not allowed".into() }.encode(),
        @r#"punish "Able Baker" "Panthers are not allowed""#
    );
    insta::assert_snapshot!(
        Command::SwitchTeamNow { name: "Able Baker".into() }.encode(),
        @r#"switchteamnow "Able Baker""#
    );
    insta::assert_snapshot!(
        Command::Message { player_id: "76561198000000001".into(), text: "You are the designated artillery player".into() }.encode(),
        @r#"message "76561198000000001" You are the designated artillery player"#
    );
}
