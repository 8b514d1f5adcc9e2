//! Population-driven automatic sessions.
//!
//! One controller per server watches the player count and starts a session
//! when the server fills up, stopping it when the server empties or the
//! session has run for the maximum duration. Hysteresis keeps it from
//! flapping: after a stop, the population must be seen at or below the stop
//! threshold again before a new session can start.
//!
//! # State Machine
//!
//! ```text
//!             pop > stop           pop ≥ start
//! ┌──────┐ ──────────────> ┌──────────┐ ──────────> ┌────────┐
//! │ Idle │                 │ Watching │             │ Active │
//! └──────┘ <────────────── └──────────┘             └────────┘
//!    ↑ ↑      pop ≤ stop                                 │ pop ≤ stop, max duration,
//!    │ └──────────────── pop ≥ start ───────────────────>│ manual start, stop
//!    │                                                   ↓
//!    │            pop ≤ stop                     ┌─────────────┐
//!    └───────────────────────────────────────────│ CoolingDown │
//!                                                └─────────────┘
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{env::later, error::RconError, session::SessionId};

/// Population at which a session starts.
pub const DEFAULT_START_THRESHOLD: u32 = 70;

/// Population at or below which a session stops.
pub const DEFAULT_STOP_THRESHOLD: u32 = 30;

/// Longest an automatic session may run.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5 * 60 * 60);

/// Consecutive low observations needed to stop.
pub const DEFAULT_COOLDOWN_OBSERVATIONS: u32 = 1;

/// Time between population checks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Time between checks after repeated failures.
pub const DEFAULT_SLOW_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Failed iterations before slowing down.
pub const DEFAULT_SLOW_AFTER_FAILURES: u32 = 5;

/// Population query attempts per iteration.
pub const DEFAULT_ATTEMPTS_PER_ITERATION: u32 = 3;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoState {
    /// Population at or below the stop threshold
    Idle,
    /// Population between the thresholds
    Watching,
    /// An automatic session is (being) started
    Active,
    /// Session ended; waiting for the population to drop
    CoolingDown,
}

/// Actions returned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoAction {
    /// Create an automatic session with an open window starting now
    StartSession {
        /// Server name
        server: String,
    },
    /// Stop the automatic session
    StopSession {
        /// Session to stop
        session: SessionId,
    },
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct AutoSessionConfig {
    /// Population at which a session starts
    pub start_threshold: u32,
    /// Population at or below which a session stops
    pub stop_threshold: u32,
    /// Longest an automatic session may run
    pub max_duration: Duration,
    /// Consecutive low observations needed to stop
    pub cooldown_observations: u32,
    /// Time between population checks
    pub interval: Duration,
    /// Time between checks after repeated failures
    pub slow_interval: Duration,
    /// Failed iterations before slowing down
    pub slow_after_failures: u32,
    /// Population query attempts per iteration
    pub attempts_per_iteration: u32,
}

impl Default for AutoSessionConfig {
    fn default() -> Self {
        Self {
            start_threshold: DEFAULT_START_THRESHOLD,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            max_duration: DEFAULT_MAX_DURATION,
            cooldown_observations: DEFAULT_COOLDOWN_OBSERVATIONS,
            interval: DEFAULT_INTERVAL,
            slow_interval: DEFAULT_SLOW_INTERVAL,
            slow_after_failures: DEFAULT_SLOW_AFTER_FAILURES,
            attempts_per_iteration: DEFAULT_ATTEMPTS_PER_ITERATION,
        }
    }
}

/// Read-only view for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoStatus {
    /// Server name
    pub server: String,
    /// Whether the controller acts on observations
    pub enabled: bool,
    /// Current state
    pub state: AutoState,
    /// Session being recorded, if any
    pub session: Option<SessionId>,
    /// Last observed population
    pub last_population: Option<u32>,
    /// Last query failure
    pub last_error: Option<String>,
    /// Consecutive failed iterations
    pub failed_iterations: u32,
}

/// Per-server automatic session controller
///
/// Pure state machine. The driver queries the population, feeds it to
/// [`observe`](Self::observe), executes the returned actions against the
/// session registry, and reports the outcome back.
#[derive(Debug, Clone)]
pub struct AutoSession {
    server: String,
    config: AutoSessionConfig,
    enabled: bool,
    state: AutoState,
    session: Option<SessionId>,
    active_since: Option<DateTime<Utc>>,
    low_observations: u32,
    failed_iterations: u32,
    last_population: Option<u32>,
    last_error: Option<String>,
}

impl AutoSession {
    /// Enabled controller in [`AutoState::Idle`].
    pub fn new(server: impl Into<String>, config: AutoSessionConfig) -> Self {
        debug_assert!(config.stop_threshold < config.start_threshold, "thresholds must not overlap");
        Self {
            server: server.into(),
            config,
            enabled: true,
            state: AutoState::Idle,
            session: None,
            active_since: None,
            low_observations: 0,
            failed_iterations: 0,
            last_population: None,
            last_error: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AutoState {
        self.state
    }

    /// Session currently owned by the controller.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Whether observations are acted upon.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &AutoSessionConfig {
        &self.config
    }

    /// Listing view.
    pub fn status(&self) -> AutoStatus {
        AutoStatus {
            server: self.server.clone(),
            enabled: self.enabled,
            state: self.state,
            session: self.session,
            last_population: self.last_population,
            last_error: self.last_error.clone(),
            failed_iterations: self.failed_iterations,
        }
    }

    /// Delay before the next population check.
    pub fn poll_interval(&self) -> Duration {
        if self.failed_iterations >= self.config.slow_after_failures {
            self.config.slow_interval
        } else {
            self.config.interval
        }
    }

    /// Resume acting on observations.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop acting on observations. A running automatic session is stopped.
    pub fn disable(&mut self) -> Vec<AutoAction> {
        self.enabled = false;
        let actions = self.session.map(|session| AutoAction::StopSession { session }).into_iter().collect();
        self.reset(AutoState::Idle);
        actions
    }

    /// Feed one population observation.
    pub fn observe(&mut self, population: u32, now: DateTime<Utc>) -> Vec<AutoAction> {
        self.last_population = Some(population);
        self.last_error = None;
        if self.failed_iterations >= self.config.slow_after_failures {
            tracing::info!(server = %self.server, "population checks recovered");
        }
        self.failed_iterations = 0;

        if !self.enabled {
            return vec![];
        }

        let low = population <= self.config.stop_threshold;
        match self.state {
            AutoState::Idle | AutoState::Watching => {
                if population >= self.config.start_threshold {
                    tracing::info!(server = %self.server, population, "population reached start threshold");
                    self.state = AutoState::Active;
                    self.active_since = Some(now);
                    self.low_observations = 0;
                    vec![AutoAction::StartSession { server: self.server.clone() }]
                } else {
                    self.state = if low { AutoState::Idle } else { AutoState::Watching };
                    vec![]
                }
            },
            AutoState::Active => {
                self.low_observations = if low { self.low_observations + 1 } else { 0 };
                let expired = self
                    .active_since
                    .is_some_and(|since| later(since, self.config.max_duration) <= now);

                if self.low_observations >= self.config.cooldown_observations.max(1) || expired {
                    tracing::info!(server = %self.server, population, expired, "stopping automatic session");
                    let actions =
                        self.session.map(|session| AutoAction::StopSession { session }).into_iter().collect();
                    self.reset(AutoState::CoolingDown);
                    actions
                } else {
                    vec![]
                }
            },
            AutoState::CoolingDown => {
                if low {
                    self.state = AutoState::Idle;
                }
                vec![]
            },
        }
    }

    /// A population check failed.
    pub fn on_failure(&mut self, error: &RconError) {
        self.failed_iterations = self.failed_iterations.saturating_add(1);
        self.last_error = Some(error.to_string());
        if self.failed_iterations == self.config.slow_after_failures {
            tracing::warn!(
                server = %self.server,
                failures = self.failed_iterations,
                "population checks failing, slowing down"
            );
        }
    }

    /// The session requested by `StartSession` was created.
    pub fn on_session_started(&mut self, session: SessionId, now: DateTime<Utc>) {
        if self.state == AutoState::Active {
            self.session = Some(session);
            self.active_since = Some(now);
        }
    }

    /// The session requested by `StartSession` could not be created (another
    /// session owns the server).
    pub fn on_start_rejected(&mut self) {
        if self.state == AutoState::Active && self.session.is_none() {
            self.reset(AutoState::CoolingDown);
        }
    }

    /// A session completed for reasons other than this controller's own
    /// `StopSession` (manual stop, window end, superseded by a manual start).
    pub fn on_session_completed(&mut self, session: SessionId) {
        if self.session == Some(session) {
            self.reset(AutoState::CoolingDown);
        }
    }

    /// A manual session took over the server.
    pub fn notify_superseded(&mut self) {
        if self.state == AutoState::Active {
            self.reset(AutoState::CoolingDown);
        }
    }

    fn reset(&mut self, state: AutoState) {
        self.state = state;
        self.session = None;
        self.active_since = None;
        self.low_observations = 0;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(mins: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(mins)
    }

    fn controller() -> AutoSession {
        AutoSession::new("eu-1", AutoSessionConfig::default())
    }

    #[test]
    fn idle_watching_active() {
        let mut auto = controller();
        assert!(auto.observe(10, at(0)).is_empty());
        assert_eq!(auto.state(), AutoState::Idle);
        assert!(auto.observe(50, at(1)).is_empty());
        assert_eq!(auto.state(), AutoState::Watching);
        assert_eq!(auto.observe(70, at(2)), vec![AutoAction::StartSession { server: "eu-1".into() }]);
        assert_eq!(auto.state(), AutoState::Active);
    }

    #[test]
    fn low_population_stops_then_hysteresis() {
        let mut auto = controller();
        auto.observe(75, at(0));
        auto.on_session_started(7, at(0));

        assert_eq!(auto.observe(25, at(1)), vec![AutoAction::StopSession { session: 7 }]);
        assert_eq!(auto.state(), AutoState::CoolingDown);
        assert!(auto.observe(20, at(2)).is_empty());
        assert_eq!(auto.state(), AutoState::Idle);
    }

    #[test]
    fn max_duration_stops_and_waits_for_drop() {
        let mut auto = controller();
        auto.observe(80, at(0));
        auto.on_session_started(1, at(0));

        assert!(auto.observe(80, at(299)).is_empty());
        assert_eq!(auto.observe(80, at(300)), vec![AutoAction::StopSession { session: 1 }]);

        // Still full: no restart until the population drops below the stop threshold.
        assert!(auto.observe(90, at(301)).is_empty());
        assert_eq!(auto.state(), AutoState::CoolingDown);
        auto.observe(30, at(302));
        assert_eq!(auto.state(), AutoState::Idle);
        assert_eq!(auto.observe(70, at(303)).len(), 1);
    }

    #[test]
    fn debounced_stop() {
        let mut auto = AutoSession::new("eu-1", AutoSessionConfig { cooldown_observations: 3, ..Default::default() });
        auto.observe(75, at(0));
        auto.on_session_started(2, at(0));
        assert!(auto.observe(25, at(1)).is_empty());
        assert!(auto.observe(40, at(2)).is_empty());
        assert!(auto.observe(25, at(3)).is_empty());
        assert!(auto.observe(25, at(4)).is_empty());
        assert_eq!(auto.observe(25, at(5)), vec![AutoAction::StopSession { session: 2 }]);
    }

    #[test]
    fn manual_start_forces_cooldown() {
        let mut auto = controller();
        auto.observe(75, at(0));
        auto.on_session_started(3, at(0));
        auto.notify_superseded();
        assert_eq!(auto.state(), AutoState::CoolingDown);
        assert_eq!(auto.session(), None);
        assert!(auto.observe(75, at(1)).is_empty());
    }

    #[test]
    fn rejected_start_cools_down() {
        let mut auto = controller();
        auto.observe(75, at(0));
        auto.on_start_rejected();
        assert_eq!(auto.state(), AutoState::CoolingDown);
    }

    #[test]
    fn failures_slow_down_and_recover() {
        let mut auto = controller();
        for _ in 0..5 {
            auto.on_failure(&RconError::Timeout(Duration::from_secs(10)));
        }
        assert_eq!(auto.poll_interval(), DEFAULT_SLOW_INTERVAL);
        assert!(auto.status().last_error.is_some());

        auto.observe(10, at(0));
        assert_eq!(auto.poll_interval(), DEFAULT_INTERVAL);
        assert_eq!(auto.status().last_population, Some(10));
    }

    #[test]
    fn disable_stops_running_session() {
        let mut auto = controller();
        auto.observe(75, at(0));
        auto.on_session_started(4, at(0));
        assert_eq!(auto.disable(), vec![AutoAction::StopSession { session: 4 }]);
        assert!(auto.observe(90, at(1)).is_empty());
        assert!(!auto.is_enabled());
    }
}
