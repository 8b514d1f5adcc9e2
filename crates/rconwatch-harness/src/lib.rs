//! Deterministic test support for rconwatch.
//!
//! Everything a scenario needs to run without a network or a wall clock:
//!
//! - [`SimEnv`]: virtual clock and seeded RNG implementing
//!   [`Environment`](rconwatch_core::Environment)
//! - [`SimServer`]: an in-memory game server (roster, admin log, map) with
//!   fault switches, handing out [`ScriptedConsole`]s that implement
//!   [`RemoteConsole`](rconwatch_core::RemoteConsole)
//! - [`roster`]: player and admin-log line builders
//!
//! Given the same seed and the same script, a scenario produces the same
//! events and the same commands every run.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod roster;
pub mod sim_env;
pub mod sim_server;

pub use sim_env::SimEnv;
pub use sim_server::{ScriptedConsole, SimServer};
