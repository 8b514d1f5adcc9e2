//! XOR stream transform.
//!
//! The first packet a console server sends after accepting a TCP connection
//! is the key. From then on every request and every response body is XORed
//! byte-wise with that key, cycling from the start of the key for each
//! message. Because XOR is its own inverse, the same operation encodes
//! requests and decodes responses.

use bytes::{Bytes, BytesMut};

use crate::errors::{ProtoError, Result};

/// Symmetric cipher keyed by the server greeting.
///
/// # Invariants
///
/// - The key is never empty (checked at construction).
/// - `apply(apply(x)) == x` for every input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorCipher {
    key: Bytes,
}

impl XorCipher {
    /// Build a cipher from the greeting packet.
    ///
    /// # Errors
    ///
    /// `ProtoError::MissingKey` if the greeting was empty.
    pub fn from_greeting(greeting: impl Into<Bytes>) -> Result<Self> {
        let key = greeting.into();
        if key.is_empty() {
            return Err(ProtoError::MissingKey);
        }
        Ok(Self { key })
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    /// Transform one whole message.
    ///
    /// Multipart responses must be concatenated before decoding; the key
    /// offset restarts at zero for every message.
    pub fn apply(&self, message: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(message.len());
        out.extend(
            message.iter().zip(self.key.iter().cycle()).map(|(byte, key)| byte ^ key),
        );
        out.freeze()
    }

    /// Decode a response body into text.
    ///
    /// # Errors
    ///
    /// `ProtoError::InvalidUtf8` if the decoded bytes are not UTF-8.
    pub fn decode_text(&self, message: &[u8]) -> Result<String> {
        let plain = self.apply(message);
        String::from_utf8(plain.to_vec()).map_err(|_| ProtoError::InvalidUtf8)
    }
}
