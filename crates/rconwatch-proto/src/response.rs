//! Response shape classification.
//!
//! Console answers come in three shapes: a bare status word (`SUCCESS` or
//! `FAIL`), a tab-separated array prefixed with its element count, or free
//! text. The text shape is whatever the command documents; this module only
//! separates status words from payloads and validates arrays.

use crate::errors::{ProtoError, Result};

/// Status word for a successful command.
pub const SUCCESS: &str = "SUCCESS";

/// Status word for a rejected command.
pub const FAIL: &str = "FAIL";

/// Decoded response text, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `SUCCESS`
    Success,
    /// `FAIL`
    Fail,
    /// Any other text
    Text(String),
}

impl Response {
    /// Classify decoded response text.
    pub fn classify(text: impl Into<String>) -> Self {
        let text = text.into();
        match text.as_str() {
            SUCCESS => Self::Success,
            FAIL => Self::Fail,
            _ => Self::Text(text),
        }
    }

    /// Whether the server rejected the request.
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Unpack an array response.
///
/// The wire shape is `<count>\t<item>\t...\t<item>\t`: every element,
/// including the count, is followed by a tab. The segment after the final tab
/// is discarded.
///
/// # Errors
///
/// - `InvalidArrayPrefix` if the count is not a number
/// - `InvalidArray` if the element count does not match (usually an
///   incomplete multipart response)
pub fn unpack_array(text: &str) -> Result<Vec<String>> {
    let mut parts: Vec<&str> = text.split('\t').collect();
    // Trailing segment after the last separator
    parts.pop();

    if parts.is_empty() {
        return Err(ProtoError::InvalidArrayPrefix(text.to_owned()));
    }

    let prefix = parts.remove(0);
    let declared: usize = prefix
        .trim()
        .parse()
        .map_err(|_| ProtoError::InvalidArrayPrefix(prefix.to_owned()))?;

    if declared != parts.len() {
        return Err(ProtoError::InvalidArray { declared, found: parts.len() });
    }

    Ok(parts.into_iter().map(str::to_owned).collect())
}

/// Whether `text` is a complete array response.
///
/// Used by transports to decide whether to keep reading a multipart answer.
pub fn is_complete_array(text: &str) -> bool {
    unpack_array(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_words() {
        assert_eq!(Response::classify("SUCCESS"), Response::Success);
        assert!(Response::classify("FAIL").is_fail());
        assert_eq!(Response::classify("12/100"), Response::Text("12/100".into()));
    }

    #[test]
    fn unpack_empty_array() {
        assert_eq!(unpack_array("0\t").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn unpack_two_items() {
        let items = unpack_array("2\tAlpha : 76561198000000001\tBravo : 76561198000000002\t").unwrap();
        assert_eq!(items, vec!["Alpha : 76561198000000001", "Bravo : 76561198000000002"]);
    }

    #[test]
    fn unpack_truncated_array() {
        let err = unpack_array("3\ta\tb\t").unwrap_err();
        assert_eq!(err, ProtoError::InvalidArray { declared: 3, found: 2 });
        assert!(!is_complete_array("3\ta\tb\t"));
    }

    #[test]
    fn unpack_rejects_non_numeric_prefix() {
        assert!(matches!(unpack_array("x\ta\t"), Err(ProtoError::InvalidArrayPrefix(_))));
        assert!(matches!(unpack_array(""), Err(ProtoError::InvalidArrayPrefix(_))));
    }
}
