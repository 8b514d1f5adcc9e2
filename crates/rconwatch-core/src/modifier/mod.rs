//! Gameplay rule enforcement.
//!
//! A modifier watches one session's event stream and answers rule violations
//! with console commands. Modifiers are a closed set; [`ModifierEngine`] holds
//! the ones enabled for a session and fans every event out to each of them in
//! order.
//!
//! Like the rest of the core, modifiers never talk to the server themselves.
//! They return [`ModifierAction`]s; the capture task executes the commands
//! after the tick's events have been appended and turns the records into
//! `RuleNote` events.

mod no_medic;
mod no_panther;
mod one_man_arty;

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use rconwatch_proto::{Command, PlayerId};
use serde::{Deserialize, Serialize};

use self::{no_medic::NoMedic, no_panther::NoPanther, one_man_arty::OneManArty};
use crate::{
    env::{Environment, later},
    event::{Event, PlayerRef},
    snapshot::Snapshot,
};

/// Weapon label fragments identifying the restricted tank.
pub const DEFAULT_PANTHER_PATTERNS: &[&str] = &["Panther"];

/// Weapon label fragments identifying artillery.
pub const DEFAULT_ARTY_PATTERNS: &[&str] = &["HOWITZER", "25-POUNDER"];

/// Role that may not be used under No-Medic.
pub const DEFAULT_RESTRICTED_ROLE: &str = "Medic";

/// How long a disconnected gunner keeps the artillery slot.
pub const DEFAULT_GUNNER_GRACE: Duration = Duration::from_secs(5 * 60);

/// Upper bound on players killed for one artillery violation.
pub const DEFAULT_PUNISHMENT_SIZE: usize = 10;

/// Minimum time between two artillery punishments of the same offender.
pub const DEFAULT_OFFENDER_COOLDOWN: Duration = Duration::from_secs(30);

/// Minimum time between two Panther punishments of the same killer.
pub const DEFAULT_PANTHER_COOLDOWN: Duration = Duration::from_secs(10);

/// Available rule modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    /// Tank kills with the restricted vehicle are punished
    NoPanther,
    /// One artillery gunner per team
    OneManArty,
    /// The medic role is not allowed
    NoMedic,
}

impl ModifierKind {
    /// Every modifier, in evaluation order.
    pub const ALL: [Self; 3] = [Self::NoPanther, Self::OneManArty, Self::NoMedic];

    /// Stable identifier used in configuration files.
    pub fn id(self) -> &'static str {
        match self {
            Self::NoPanther => "no_panther",
            Self::OneManArty => "one_man_arty",
            Self::NoMedic => "no_medic",
        }
    }

    /// Parse an identifier as produced by [`id`](Self::id).
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id.trim())
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Output of a modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifierAction {
    /// Send an administrative command
    Execute(Command),
    /// Keep a note in the session log
    Record {
        /// Modifier that made the decision
        modifier: ModifierKind,
        /// Player concerned
        player: Option<PlayerRef>,
        /// What happened
        note: String,
    },
}

/// What a modifier may look at while handling an event.
#[derive(Debug)]
pub struct ModifierContext<'a, E: Environment> {
    /// Snapshot the event was derived from
    pub roster: &'a Snapshot,
    /// Current time
    pub now: DateTime<Utc>,
    /// Randomness for punishment selection
    pub env: &'a E,
}

/// Rule parameters shared by all modifiers.
#[derive(Debug, Clone)]
pub struct ModifierConfig {
    /// Weapon fragments identifying the restricted tank
    pub panther_patterns: Vec<String>,
    /// Weapon fragments identifying artillery
    pub arty_patterns: Vec<String>,
    /// Role banned under No-Medic
    pub restricted_role: String,
    /// How long a disconnected gunner keeps the slot
    pub gunner_grace: Duration,
    /// Upper bound on players killed per artillery violation
    pub punishment_size: usize,
    /// Artillery punishment cooldown per offender
    pub offender_cooldown: Duration,
    /// Panther punishment cooldown per killer
    pub panther_cooldown: Duration,
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self {
            panther_patterns: DEFAULT_PANTHER_PATTERNS.iter().map(|s| (*s).to_owned()).collect(),
            arty_patterns: DEFAULT_ARTY_PATTERNS.iter().map(|s| (*s).to_owned()).collect(),
            restricted_role: DEFAULT_RESTRICTED_ROLE.to_owned(),
            gunner_grace: DEFAULT_GUNNER_GRACE,
            punishment_size: DEFAULT_PUNISHMENT_SIZE,
            offender_cooldown: DEFAULT_OFFENDER_COOLDOWN,
            panther_cooldown: DEFAULT_PANTHER_COOLDOWN,
        }
    }
}

impl ModifierConfig {
    fn is_panther(&self, weapon: &str) -> bool {
        matches_any(weapon, &self.panther_patterns)
    }

    fn is_arty(&self, weapon: &str) -> bool {
        matches_any(weapon, &self.arty_patterns)
    }
}

fn matches_any(weapon: &str, patterns: &[String]) -> bool {
    let weapon = weapon.to_ascii_uppercase();
    patterns.iter().any(|p| weapon.contains(&p.to_ascii_uppercase()))
}

/// Per-player "not before" deadlines.
#[derive(Debug, Clone, Default)]
struct Cooldowns {
    until: HashMap<PlayerId, DateTime<Utc>>,
}

impl Cooldowns {
    /// Whether `id` may act now; if so the cooldown restarts.
    fn try_fire(&mut self, id: &PlayerId, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if self.until.get(id).is_some_and(|until| now < *until) {
            return false;
        }
        self.until.retain(|_, until| now < *until);
        self.until.insert(id.clone(), later(now, cooldown));
        true
    }
}

#[derive(Debug, Clone)]
enum Modifier {
    NoPanther(NoPanther),
    OneManArty(OneManArty),
    NoMedic(NoMedic),
}

impl Modifier {
    fn new(kind: ModifierKind) -> Self {
        match kind {
            ModifierKind::NoPanther => Self::NoPanther(NoPanther::default()),
            ModifierKind::OneManArty => Self::OneManArty(OneManArty::default()),
            ModifierKind::NoMedic => Self::NoMedic(NoMedic),
        }
    }

    fn kind(&self) -> ModifierKind {
        match self {
            Self::NoPanther(_) => ModifierKind::NoPanther,
            Self::OneManArty(_) => ModifierKind::OneManArty,
            Self::NoMedic(_) => ModifierKind::NoMedic,
        }
    }

    fn handle<E: Environment>(
        &mut self,
        event: &Event,
        ctx: &ModifierContext<'_, E>,
        config: &ModifierConfig,
    ) -> Vec<ModifierAction> {
        match self {
            Self::NoPanther(m) => m.handle(event, ctx, config),
            Self::OneManArty(m) => m.handle(event, ctx, config),
            Self::NoMedic(m) => m.handle(event, config),
        }
    }

    fn tick<E: Environment>(&mut self, ctx: &ModifierContext<'_, E>, config: &ModifierConfig) -> Vec<ModifierAction> {
        match self {
            Self::OneManArty(m) => m.tick(ctx, config),
            Self::NoPanther(_) | Self::NoMedic(_) => vec![],
        }
    }
}

/// The modifiers enabled for one session.
///
/// While suspended (connection degraded) modifiers keep tracking state, but
/// their commands are dropped instead of queued: a punishment sent minutes
/// late would hit the wrong players.
#[derive(Debug, Clone)]
pub struct ModifierEngine {
    modifiers: Vec<Modifier>,
    config: ModifierConfig,
    suspended: bool,
}

impl ModifierEngine {
    /// Engine running `kinds`, each at most once, in the given order.
    pub fn new(kinds: &[ModifierKind], config: ModifierConfig) -> Self {
        let mut modifiers: Vec<Modifier> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !modifiers.iter().any(|m| m.kind() == *kind) {
                modifiers.push(Modifier::new(*kind));
            }
        }
        Self { modifiers, config, suspended: false }
    }

    /// Enabled modifiers.
    pub fn kinds(&self) -> Vec<ModifierKind> {
        self.modifiers.iter().map(Modifier::kind).collect()
    }

    /// Whether no modifier is enabled.
    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Whether commands are currently dropped.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Drop commands until [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Emit commands again.
    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Feed one event to every modifier.
    pub fn handle<E: Environment>(&mut self, event: &Event, ctx: &ModifierContext<'_, E>) -> Vec<ModifierAction> {
        let mut actions = Vec::new();
        for modifier in &mut self.modifiers {
            actions.extend(modifier.handle(event, ctx, &self.config));
        }
        self.gate(actions)
    }

    /// Advance timers (gunner grace periods).
    pub fn tick<E: Environment>(&mut self, ctx: &ModifierContext<'_, E>) -> Vec<ModifierAction> {
        let mut actions = Vec::new();
        for modifier in &mut self.modifiers {
            actions.extend(modifier.tick(ctx, &self.config));
        }
        self.gate(actions)
    }

    fn gate(&self, actions: Vec<ModifierAction>) -> Vec<ModifierAction> {
        if !self.suspended {
            return actions;
        }
        actions
            .into_iter()
            .filter(|action| match action {
                ModifierAction::Execute(command) => {
                    tracing::warn!(command = %command.redacted(), "connection degraded, dropping modifier command");
                    false
                },
                ModifierAction::Record { .. } => true,
            })
            .collect()
    }
}
