//! No-Medic: the medic role is banned.
//!
//! Taking the role gets the player killed and double-switched (moved to the
//! other team and straight back), which drops them out of their unit and
//! resets their role.

use rconwatch_proto::Command;

use super::{ModifierAction, ModifierConfig, ModifierKind};
use crate::event::{Event, EventKind};

const NO_MEDIC_MESSAGE: &str = "Medics are not allowed to be used during this match.";

#[derive(Debug, Clone, Copy)]
pub(super) struct NoMedic;

impl NoMedic {
    pub(super) fn handle(&mut self, event: &Event, config: &ModifierConfig) -> Vec<ModifierAction> {
        let EventKind::RoleChange { player, new: Some(role), .. } = &event.kind else {
            return vec![];
        };
        if !role.eq_ignore_ascii_case(&config.restricted_role) {
            return vec![];
        }

        tracing::info!(player = %player.id, role, "restricted role taken, removing from unit");
        vec![
            ModifierAction::Record {
                modifier: ModifierKind::NoMedic,
                player: Some(player.clone()),
                note: format!("took restricted role {role}"),
            },
            ModifierAction::Execute(Command::Punish { name: player.name.clone(), reason: NO_MEDIC_MESSAGE.to_owned() }),
            ModifierAction::Execute(Command::SwitchTeamNow { name: player.name.clone() }),
            ModifierAction::Execute(Command::SwitchTeamNow { name: player.name.clone() }),
            ModifierAction::Execute(Command::Message {
                player_id: player.id.to_string(),
                text: NO_MEDIC_MESSAGE.to_owned(),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use rconwatch_proto::Team;

    use super::{super::testing::*, *};

    #[test]
    fn medic_is_switched_out() {
        let actions = NoMedic.handle(
            &event(EventKind::RoleChange {
                player: player("7", Team::Axis),
                old: Some("Rifleman".into()),
                new: Some("Medic".into()),
            }),
            &ModifierConfig::default(),
        );
        assert_eq!(punished(&actions), vec!["name-7"]);
        let switches = actions
            .iter()
            .filter(|a| matches!(a, ModifierAction::Execute(Command::SwitchTeamNow { .. })))
            .count();
        assert_eq!(switches, 2);
        assert_eq!(messaged(&actions), vec!["7"]);
    }

    #[test]
    fn other_roles_and_leaving_the_role_are_ignored() {
        let config = ModifierConfig::default();
        let to_rifleman = event(EventKind::RoleChange {
            player: player("7", Team::Axis),
            old: Some("Medic".into()),
            new: Some("Rifleman".into()),
        });
        assert!(NoMedic.handle(&to_rifleman, &config).is_empty());

        let cleared = event(EventKind::RoleChange { player: player("7", Team::Axis), old: Some("Medic".into()), new: None });
        assert!(NoMedic.handle(&cleared, &config).is_empty());
    }
}
