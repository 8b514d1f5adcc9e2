//! Sans-IO core of the remote-console event reconstruction system.
//!
//! Everything here is a pure state machine. Time arrives as a parameter,
//! randomness comes from an [`Environment`], and side effects are returned as
//! action values for a driver to execute. The production driver lives in
//! `rconwatch-server`; tests drive the same machines with a virtual clock.
//!
//! # Components
//!
//! - [`Connection`]: liveness of one remote console (ready, degraded, reconnect
//!   schedule)
//! - [`RemoteConsole`]: request/response seam implemented by transports
//! - [`Snapshot`] / [`LogCursor`]: one consistent view of a server per poll
//! - [`DerivationEngine`]: snapshot diffing, raw-feed merge, ordering, dedup
//! - [`SessionRegistry`]: recording-session lifecycle and conflict rules
//! - [`AutoSession`]: population-driven start/stop with hysteresis
//! - [`ModifierEngine`]: gameplay-rule enforcement over the event stream

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod autosession;
pub mod connection;
pub mod console;
pub mod derive;
pub mod env;
pub mod error;
pub mod event;
pub mod modifier;
pub mod session;
pub mod snapshot;

pub use autosession::{AutoAction, AutoSession, AutoSessionConfig, AutoState, AutoStatus};
pub use connection::{Connection, ConnectionAction, ConnectionConfig, LivenessState};
pub use console::RemoteConsole;
pub use derive::{DerivationConfig, DerivationEngine};
pub use env::Environment;
pub use error::{RconError, SessionError};
pub use event::{Event, EventKind, PlayerRef};
pub use modifier::{ModifierAction, ModifierConfig, ModifierContext, ModifierEngine, ModifierKind};
pub use session::{
    CompletionReason, SessionAction, SessionConfig, SessionId, SessionInfo, SessionOrigin, SessionRegistry,
    SessionRequest, SessionState, SessionWindow,
};
pub use snapshot::{LogCursor, PlayerState, RawLogLine, Snapshot, UnitState};
