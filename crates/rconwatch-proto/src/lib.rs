//! Remote-console wire format.
//!
//! The game server exposes a line-oriented administration console over TCP.
//! Every byte after the initial key packet is XORed with that key, responses
//! carry no length prefix, and list-shaped answers use a tab-separated array
//! with a leading element count. This crate owns everything about those bytes
//! and nothing about sockets: callers hand it raw buffers and get typed values
//! back.
//!
//! # Components
//!
//! - [`XorCipher`]: symmetric stream transform keyed by the server's greeting
//! - [`Command`]: typed requests and their text encoding
//! - [`unpack_array`] / [`Response`]: response shape classification
//! - [`PlayerInfo`], [`PlayerEntry`], [`Slots`]: state query parsers
//! - [`LogLine`], [`LogKind`]: admin-log line parser

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod command;
pub mod errors;
pub mod log;
pub mod player;
pub mod response;

pub use cipher::XorCipher;
pub use command::Command;
pub use errors::{ProtoError, Result};
pub use log::{LogKind, LogLine, LogParty};
pub use player::{PlayerEntry, PlayerId, PlayerInfo, Score, Slots, Team, UnitRef};
pub use response::{Response, unpack_array};
