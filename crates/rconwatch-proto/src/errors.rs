//! Wire-format errors.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Failures while decoding remote-console responses.
///
/// All variants describe malformed input from the server. None of them say
/// anything about the connection itself; the caller decides whether a bad
/// response is worth a retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Server greeting did not contain a usable key
    #[error("missing or empty XOR key")]
    MissingKey,

    /// Array response did not match its declared element count
    #[error("invalid array: declared {declared} elements, found {found}")]
    InvalidArray {
        /// Count from the array prefix
        declared: usize,
        /// Elements actually present
        found: usize,
    },

    /// Array response prefix was not a number
    #[error("invalid array prefix: {0:?}")]
    InvalidArrayPrefix(String),

    /// Player info block was missing a required field or had a bad value
    #[error("malformed player info: {0}")]
    MalformedPlayerInfo(String),

    /// `get playerids` entry was not `name : id`
    #[error("malformed player entry: {0:?}")]
    MalformedPlayerEntry(String),

    /// `get slots` answer was not `online/max`
    #[error("malformed slots response: {0:?}")]
    MalformedSlots(String),

    /// Admin-log line could not be parsed
    #[error("malformed log line: {0:?}")]
    MalformedLogLine(String),

    /// Response bytes were not valid UTF-8
    #[error("response is not valid UTF-8")]
    InvalidUtf8,
}
