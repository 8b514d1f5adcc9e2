//! One-Man-Arty: a single artillery gunner per team.
//!
//! The first player on a team to score an artillery kill becomes that team's
//! designated gunner. While the gunner is connected, anyone else on the team
//! scoring an artillery kill triggers a blunt punishment: the offender, the
//! gunner and random teammates are killed, at most `punishment_size` players
//! in total. Killing the enemy gunner, or the gunner using anything but
//! artillery, is punished the same way.
//!
//! A gunner who disconnects keeps the slot for a grace period. Connecting or
//! redeploying before it runs out keeps the assignment; otherwise the slot is
//! freed and the commander told. Assignments reset when a new match starts.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rconwatch_proto::{Command, PlayerId, Team};

use super::{Cooldowns, ModifierAction, ModifierConfig, ModifierContext, ModifierKind};
use crate::{
    env::{Environment, later},
    event::{Event, EventKind, PlayerRef},
};

const GUNNER_RULES: &str = "You have become your team's designated artillery player! You must adhere to a few \
                            rules:\n\n- You must not leave or swap between guns\n- You may not use any \
                            firearms\n- You may not be killed by enemies";

const TEAM_PUNISHED: &str = "One member of your team has violated One Arty rules. To compensate the enemy, random \
                             players on your team, including yourself, were killed.\n\nThe rule in question is as \
                             follows:\n";

#[derive(Debug, Clone)]
struct Gunner {
    player: PlayerRef,
    /// Set while the gunner is disconnected.
    release_at: Option<DateTime<Utc>>,
}

impl Gunner {
    fn is_connected(&self) -> bool {
        self.release_at.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub(super) struct OneManArty {
    gunners: BTreeMap<Team, Gunner>,
    cooldowns: Cooldowns,
}

impl OneManArty {
    pub(super) fn handle<E: Environment>(
        &mut self,
        event: &Event,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        match &event.kind {
            EventKind::MatchStart { map } => {
                if !self.gunners.is_empty() {
                    tracing::info!(map, "new match, clearing artillery assignments");
                }
                self.gunners.clear();
                vec![]
            },
            EventKind::Kill { killer, victim, weapon, teamkill } => {
                self.on_kill(killer, victim, weapon, *teamkill, ctx, config)
            },
            EventKind::Disconnect { player } => self.on_disconnect(player, ctx, config),
            EventKind::Connect { player } | EventKind::Redeploy { player } => self.on_return(player),
            _ => vec![],
        }
    }

    /// Free slots whose grace period ran out.
    pub(super) fn tick<E: Environment>(
        &mut self,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        let expired: Vec<Team> = self
            .gunners
            .iter()
            .filter(|(_, g)| g.release_at.is_some_and(|at| at <= ctx.now))
            .map(|(team, _)| *team)
            .collect();

        let mut actions = Vec::new();
        for team in expired {
            let Some(gunner) = self.gunners.remove(&team) else {
                continue;
            };
            tracing::info!(%team, gunner = %gunner.player.id, "artillery slot released");
            actions.push(record(Some(&gunner.player), format!("unassigned from {team} artillery after being offline")));
            if let Some(commander) = ctx.roster.commander(team) {
                let text = format!(
                    "Your artillery player has been offline for {}. The role is now free for someone else to take.",
                    describe(config.gunner_grace),
                );
                actions.push(message(&commander.id, &text));
            }
        }
        actions
    }

    fn on_kill<E: Environment>(
        &mut self,
        killer: &PlayerRef,
        victim: &PlayerRef,
        weapon: &str,
        teamkill: bool,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        let Some(team) = ctx.roster.player(&killer.id).and_then(|p| p.team).or(killer.team) else {
            return vec![];
        };

        let enemy_gunner = self.gunners.get(&team.opponent()).is_some_and(|g| g.player.id == victim.id);
        if enemy_gunner && !teamkill {
            return self.punish_team(
                killer,
                team,
                "You are not allowed to kill the enemy's designated artillery player!",
                "killed the enemy artillery player",
                ctx,
                config,
            );
        }

        let arty = config.is_arty(weapon);
        let own = self
            .gunners
            .get(&team)
            .map(|g| (g.player.id == killer.id, g.is_connected(), g.player.name.clone()));
        match own {
            None if arty => self.assign(killer, team, ctx),
            Some((true, _, _)) if !arty => self.punish_team(
                killer,
                team,
                "As an artillery player you are not allowed to use any firearms!",
                "used a firearm as the artillery player",
                ctx,
                config,
            ),
            Some((false, true, gunner)) if arty => {
                let reason = format!("Only one player on your team, {gunner}, may use artillery.");
                self.punish_team(killer, team, &reason, "used artillery without being the designated player", ctx, config)
            },
            _ => vec![],
        }
    }

    fn assign<E: Environment>(
        &mut self,
        killer: &PlayerRef,
        team: Team,
        ctx: &ModifierContext<'_, E>,
    ) -> Vec<ModifierAction> {
        tracing::info!(%team, gunner = %killer.id, "artillery gunner assigned");
        self.gunners.insert(team, Gunner { player: killer.clone(), release_at: None });

        let mut actions = vec![
            record(Some(killer), format!("assigned to {team} artillery")),
            message(&killer.id, GUNNER_RULES),
        ];
        if let Some(commander) = ctx.roster.commander(team) {
            actions.push(message(
                &commander.id,
                &format!("{} has become your team's designated artillery player!", killer.name),
            ));
        }
        actions
    }

    fn on_disconnect<E: Environment>(
        &mut self,
        player: &PlayerRef,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        let Some((team, gunner)) = self.gunners.iter_mut().find(|(_, g)| g.player.id == player.id) else {
            return vec![];
        };
        if !gunner.is_connected() {
            return vec![];
        }
        gunner.release_at = Some(later(ctx.now, config.gunner_grace));
        tracing::debug!(%team, gunner = %player.id, "artillery gunner left, grace period started");
        vec![record(Some(player), format!("left; {team} artillery slot held for {}s", config.gunner_grace.as_secs()))]
    }

    fn on_return(&mut self, player: &PlayerRef) -> Vec<ModifierAction> {
        let Some((team, gunner)) = self.gunners.iter_mut().find(|(_, g)| g.player.id == player.id) else {
            return vec![];
        };
        if gunner.release_at.take().is_none() {
            return vec![];
        }
        vec![record(Some(player), format!("returned in time, keeps {team} artillery"))]
    }

    /// Kill the offender, the team's gunner and random teammates.
    fn punish_team<E: Environment>(
        &mut self,
        offender: &PlayerRef,
        team: Team,
        reason: &str,
        note: &str,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        if config.punishment_size == 0 || !self.cooldowns.try_fire(&offender.id, ctx.now, config.offender_cooldown) {
            return vec![];
        }

        let gunner = self
            .gunners
            .get(&team)
            .filter(|g| g.player.id != offender.id && ctx.roster.player(&g.player.id).is_some())
            .map(|g| g.player.clone());

        let mut excluded: HashSet<&PlayerId> = HashSet::from([&offender.id]);
        if let Some(gunner) = &gunner {
            excluded.insert(&gunner.id);
        }
        let mut pool: Vec<(PlayerId, String)> = ctx
            .roster
            .team_members(team)
            .into_iter()
            .filter(|p| !excluded.contains(&p.id))
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect();

        let slots = config.punishment_size.saturating_sub(1 + usize::from(gunner.is_some()));
        let picks = slots.min(pool.len());
        // Partial Fisher-Yates: the first `picks` entries become a uniform
        // sample without replacement.
        for i in 0..picks {
            let j = i + ctx.env.random_index(pool.len() - i);
            pool.swap(i, j);
        }
        pool.truncate(picks);

        tracing::info!(
            %team,
            offender = %offender.id,
            punished = 1 + usize::from(gunner.is_some()) + pool.len(),
            note,
            "one-arty violation"
        );

        let extended = format!("{TEAM_PUNISHED}{reason}");
        let mut actions = vec![
            record(Some(offender), note.to_owned()),
            message(&offender.id, reason),
            punish(&offender.name, reason),
        ];
        if let Some(gunner) = gunner {
            actions.push(punish(&gunner.name, &extended));
        }
        actions.extend(pool.iter().map(|(_, name)| punish(name, &extended)));
        actions
    }
}

fn record(player: Option<&PlayerRef>, note: String) -> ModifierAction {
    ModifierAction::Record { modifier: ModifierKind::OneManArty, player: player.cloned(), note }
}

/// Human wording for a grace period: whole minutes when possible.
fn describe(period: Duration) -> String {
    let secs = period.as_secs();
    match (secs / 60, secs % 60) {
        (1, 0) => "1 minute".to_owned(),
        (minutes, 0) if minutes > 0 => format!("{minutes} minutes"),
        _ => format!("{secs} seconds"),
    }
}

fn message(player: &PlayerId, text: &str) -> ModifierAction {
    ModifierAction::Execute(Command::Message { player_id: player.to_string(), text: text.to_owned() })
}

fn punish(name: &str, reason: &str) -> ModifierAction {
    ModifierAction::Execute(Command::Punish { name: name.to_owned(), reason: reason.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::{super::testing::*, *};
    use crate::snapshot::Snapshot;

    const HOWITZER: &str = "155MM HOWITZER [M114]";
    const RIFLE: &str = "M1 GARAND";

    /// Allies 1..=20 (1 is commander), Axis 100..=104.
    fn big_roster() -> Snapshot {
        let mut infos = vec![info("1", Team::Allies, "ArmyCommander", None)];
        infos.extend((2..=20).map(|i| info(&i.to_string(), Team::Allies, "Rifleman", Some(i % 4))));
        infos.extend((100..=104).map(|i| info(&i.to_string(), Team::Axis, "Rifleman", Some(1))));
        roster(infos)
    }

    fn allies(id: &str) -> PlayerRef {
        player(id, Team::Allies)
    }

    fn axis(id: &str) -> PlayerRef {
        player(id, Team::Axis)
    }

    #[test]
    fn first_artillery_kill_assigns_gunner() {
        let env = TestEnv::seeded(3);
        let roster = big_roster();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let mut rule = OneManArty::default();

        let actions = rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx, &ModifierConfig::default());
        assert!(punished(&actions).is_empty());
        assert_eq!(messaged(&actions), vec!["5", "1"]);
        assert_eq!(notes(&actions), vec!["assigned to Allies artillery"]);
    }

    #[test]
    fn second_gunner_triggers_bounded_punishment() {
        let env = TestEnv::seeded(42);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let mut rule = OneManArty::default();

        let from_a = rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx, &config);
        assert!(punished(&from_a).is_empty());

        let later_ctx = ModifierContext { roster: &roster, now: at(20), env: &env };
        let from_b = rule.handle(&kill(&allies("6"), &axis("101"), HOWITZER), &later_ctx, &config);
        let targets = punished(&from_b);

        assert_eq!(targets.len(), 10);
        assert_eq!(targets[0], "name-6");
        assert_eq!(targets[1], "name-5");
        let unique: HashSet<&String> = targets.iter().collect();
        assert_eq!(unique.len(), targets.len());
        let axis_names: HashSet<String> = (100..=104).map(|i| format!("name-{i}")).collect();
        assert!(targets.iter().all(|t| !axis_names.contains(t)));
    }

    #[test]
    fn small_team_punishes_everyone_available() {
        let env = TestEnv::seeded(7);
        let roster = roster(vec![
            info("1", Team::Allies, "Rifleman", Some(1)),
            info("2", Team::Allies, "Rifleman", Some(1)),
            info("3", Team::Allies, "Rifleman", Some(1)),
        ]);
        let config = ModifierConfig::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        let mut rule = OneManArty::default();

        rule.handle(&kill(&allies("1"), &axis("100"), HOWITZER), &ctx, &config);
        let actions = rule.handle(&kill(&allies("2"), &axis("100"), HOWITZER), &ctx, &config);
        let mut targets = punished(&actions);
        targets.sort();
        assert_eq!(targets, vec!["name-1", "name-2", "name-3"]);
    }

    #[test]
    fn offender_cooldown() {
        let env = TestEnv::seeded(1);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };
        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx, &config);

        assert!(!punished(&rule.handle(&kill(&allies("6"), &axis("101"), HOWITZER), &ctx, &config)).is_empty());
        let soon = ModifierContext { roster: &roster, now: at(29), env: &env };
        assert!(punished(&rule.handle(&kill(&allies("6"), &axis("102"), HOWITZER), &soon, &config)).is_empty());
        let after = ModifierContext { roster: &roster, now: at(30), env: &env };
        assert!(!punished(&rule.handle(&kill(&allies("6"), &axis("103"), HOWITZER), &after, &config)).is_empty());
    }

    #[test]
    fn reconnect_within_grace_keeps_slot() {
        let env = TestEnv::seeded(9);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = |now| ModifierContext { roster: &roster, now, env: &env };

        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx(at(0)), &config);
        let left = rule.handle(&event(EventKind::Disconnect { player: allies("5") }), &ctx(at(10)), &config);
        assert_eq!(notes(&left).len(), 1);

        assert!(rule.tick(&ctx(at(200)), &config).is_empty());
        let back = rule.handle(&event(EventKind::Connect { player: allies("5") }), &ctx(at(250)), &config);
        assert_eq!(notes(&back), vec!["returned in time, keeps Allies artillery"]);

        // No release notification, ever.
        assert!(rule.tick(&ctx(at(400)), &config).is_empty());
        assert!(rule.tick(&ctx(at(10_000)), &config).is_empty());
    }

    #[test]
    fn grace_expiry_frees_slot_and_notifies_commander() {
        let env = TestEnv::seeded(9);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = |now| ModifierContext { roster: &roster, now, env: &env };

        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx(at(0)), &config);
        rule.handle(&event(EventKind::Disconnect { player: allies("5") }), &ctx(at(10)), &config);

        // While the gunner is away, another player's artillery kill is not punished.
        let during = rule.handle(&kill(&allies("6"), &axis("100"), HOWITZER), &ctx(at(20)), &config);
        assert!(punished(&during).is_empty());

        assert!(rule.tick(&ctx(at(309)), &config).is_empty());
        let released = rule.tick(&ctx(at(310)), &config);
        assert_eq!(messaged(&released), vec!["1"]);
        assert_eq!(notes(&released), vec!["unassigned from Allies artillery after being offline"]);

        let next = rule.handle(&kill(&allies("6"), &axis("100"), HOWITZER), &ctx(at(320)), &config);
        assert_eq!(notes(&next), vec!["assigned to Allies artillery"]);
    }

    #[test]
    fn release_message_states_configured_grace() {
        let env = TestEnv::seeded(9);
        let roster = big_roster();
        let config = ModifierConfig { gunner_grace: Duration::from_secs(120), ..ModifierConfig::default() };
        let mut rule = OneManArty::default();
        let ctx = |now| ModifierContext { roster: &roster, now, env: &env };

        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx(at(0)), &config);
        rule.handle(&event(EventKind::Disconnect { player: allies("5") }), &ctx(at(10)), &config);

        assert!(rule.tick(&ctx(at(129)), &config).is_empty());
        let texts: Vec<String> = rule
            .tick(&ctx(at(130)), &config)
            .into_iter()
            .filter_map(|action| match action {
                ModifierAction::Execute(Command::Message { text, .. }) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("offline for 2 minutes"), "{}", texts[0]);
    }

    #[test]
    fn grace_wording() {
        assert_eq!(describe(Duration::from_secs(300)), "5 minutes");
        assert_eq!(describe(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe(Duration::from_secs(90)), "90 seconds");
    }

    #[test]
    fn killing_enemy_gunner_is_punished() {
        let env = TestEnv::seeded(5);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };

        rule.handle(&kill(&axis("100"), &allies("2"), HOWITZER), &ctx, &config);
        let actions = rule.handle(&kill(&allies("7"), &axis("100"), RIFLE), &ctx, &config);
        let targets = punished(&actions);
        assert_eq!(targets[0], "name-7");
        assert!(targets.len() <= config.punishment_size);
        assert_eq!(notes(&actions), vec!["killed the enemy artillery player"]);
    }

    #[test]
    fn gunner_using_firearm_is_punished() {
        let env = TestEnv::seeded(5);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };

        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx, &config);
        let actions = rule.handle(&kill(&allies("5"), &axis("101"), RIFLE), &ctx, &config);
        let targets = punished(&actions);
        assert_eq!(targets[0], "name-5");
        assert_eq!(targets.len(), 10);
    }

    #[test]
    fn match_start_resets_assignments() {
        let env = TestEnv::seeded(5);
        let roster = big_roster();
        let config = ModifierConfig::default();
        let mut rule = OneManArty::default();
        let ctx = ModifierContext { roster: &roster, now: at(0), env: &env };

        rule.handle(&kill(&allies("5"), &axis("100"), HOWITZER), &ctx, &config);
        rule.handle(&event(EventKind::MatchStart { map: "foy_warfare".into() }), &ctx, &config);
        let actions = rule.handle(&kill(&allies("6"), &axis("100"), HOWITZER), &ctx, &config);
        assert!(punished(&actions).is_empty());
        assert_eq!(notes(&actions), vec!["assigned to Allies artillery"]);
    }
}
