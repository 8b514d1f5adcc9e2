//! No-Panther: kills with the restricted tank are punished.
//!
//! The whole crew of the offending tank is killed along with the team's
//! commander, who spawned it.

use std::collections::BTreeMap;

use rconwatch_proto::{Command, PlayerId};

use super::{Cooldowns, ModifierAction, ModifierConfig, ModifierContext, ModifierKind};
use crate::{
    env::Environment,
    event::{Event, EventKind},
};

const REASON: &str = "The use of Panthers this match has been disallowed.";
const COMMANDER_NOTE: &str = "As a commander, you should not be spawning these tanks.";

#[derive(Debug, Clone, Default)]
pub(super) struct NoPanther {
    cooldowns: Cooldowns,
}

impl NoPanther {
    pub(super) fn handle<E: Environment>(
        &mut self,
        event: &Event,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        let EventKind::Kill { killer, weapon, .. } = &event.kind else {
            return vec![];
        };
        if !config.is_panther(weapon) || !self.cooldowns.try_fire(&killer.id, ctx.now, config.panther_cooldown) {
            return vec![];
        }

        let state = ctx.roster.player(&killer.id);
        let team = state.and_then(|p| p.team).or(killer.team);

        // Crew: the killer's unit, or just the killer when the unit is unknown.
        let mut targets: BTreeMap<PlayerId, String> = BTreeMap::new();
        match (team, state.and_then(|p| p.unit.as_ref())) {
            (Some(team), Some(unit)) => {
                for member in ctx.roster.unit_members(team, unit.id) {
                    targets.insert(member.id.clone(), member.name.clone());
                }
            },
            _ => {
                targets.insert(killer.id.clone(), killer.name.clone());
            },
        }

        let commander = team.and_then(|team| ctx.roster.commander(team));
        if let Some(commander) = commander {
            targets.insert(commander.id.clone(), commander.name.clone());
        }

        tracing::info!(killer = %killer.id, weapon, targets = targets.len(), "restricted vehicle used");

        let mut actions = vec![ModifierAction::Record {
            modifier: ModifierKind::NoPanther,
            player: Some(killer.clone()),
            note: "used a Panther in combat".to_owned(),
        }];
        actions.extend(
            targets
                .into_values()
                .map(|name| ModifierAction::Execute(Command::Punish { name, reason: REASON.to_owned() })),
        );
        if let Some(commander) = commander {
            actions.push(ModifierAction::Execute(Command::Message {
                player_id: commander.id.to_string(),
                text: format!("{REASON}\n\n{COMMANDER_NOTE}"),
            }));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use rconwatch_proto::Team;

    use super::{super::testing::*, *};

    const PANTHER: &str = "75MM CANNON [Sd.Kfz.171 Panther]";

    fn setup() -> crate::snapshot::Snapshot {
        roster(vec![
            info("1", Team::Axis, "TankCommander", Some(5)),
            info("2", Team::Axis, "Crewman", Some(5)),
            info("3", Team::Axis, "Crewman", Some(5)),
            info("4", Team::Axis, "ArmyCommander", None),
            info("5", Team::Axis, "Rifleman", Some(1)),
            info("9", Team::Allies, "Rifleman", Some(1)),
        ])
    }

    #[test]
    fn crew_and_commander_punished() {
        let env = TestEnv::seeded(0);
        let roster = setup();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let mut rule = NoPanther::default();

        let actions =
            rule.handle(&kill(&player("2", Team::Axis), &player("9", Team::Allies), PANTHER), &ctx, &ModifierConfig::default());

        assert_eq!(punished(&actions), vec!["name-1", "name-2", "name-3", "name-4"]);
        assert_eq!(messaged(&actions), vec!["4"]);
        assert_eq!(notes(&actions).len(), 1);
    }

    #[test]
    fn per_killer_cooldown() {
        let env = TestEnv::seeded(0);
        let roster = setup();
        let config = ModifierConfig::default();
        let mut rule = NoPanther::default();
        let panther_kill = kill(&player("2", Team::Axis), &player("9", Team::Allies), PANTHER);

        let first = ModifierContext { roster: &roster, now: at(0), env: &env };
        assert!(!rule.handle(&panther_kill, &first, &config).is_empty());
        let soon = ModifierContext { roster: &roster, now: at(5), env: &env };
        assert!(rule.handle(&panther_kill, &soon, &config).is_empty());
        let later = ModifierContext { roster: &roster, now: at(10), env: &env };
        assert!(!rule.handle(&panther_kill, &later, &config).is_empty());
    }

    #[test]
    fn other_weapons_ignored() {
        let env = TestEnv::seeded(0);
        let roster = setup();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let actions = NoPanther::default().handle(
            &kill(&player("5", Team::Axis), &player("9", Team::Allies), "KARABINER 98K"),
            &ctx,
            &ModifierConfig::default(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn unknown_killer_punished_alone() {
        let env = TestEnv::seeded(0);
        let roster = roster(vec![]);
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let stranger = crate::event::PlayerRef { id: PlayerId::new("77"), name: "ghost".into(), team: None };
        let actions =
            NoPanther::default().handle(&kill(&stranger, &player("9", Team::Allies), PANTHER), &ctx, &ModifierConfig::default());
        assert_eq!(punished(&actions), vec!["ghost"]);
        assert!(messaged(&actions).is_empty());
    }
}
