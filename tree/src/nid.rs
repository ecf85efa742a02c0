//! Stable node identifiers.

use std::fmt;
use std::str::FromStr;

/// An opaque 128-bit node identifier, stable across moves. Exists before the
/// node's path is known (the hierarchy service resolves between the two).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Nid([u8; 16]);

impl Nid {
    /// Wraps a raw 128-bit value.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generates a new random identifier.
    pub fn new_random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("system randomness unavailable");
        Self(bytes)
    }

    fn to_hex_upper(self) -> String {
        let mut s = String::with_capacity(32);
        for b in self.0 {
            s.push_str(&format!("{:02X}", b));
        }
        s
    }
}

impl fmt::Debug for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nid({})", self.to_hex_upper())
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_upper())
    }
}

/// Error returned when parsing a hex-encoded [`Nid`] fails.
#[derive(Debug, thiserror::Error)]
#[error("invalid node identifier: {0}")]
pub struct ParseNidError(String);

impl FromStr for Nid {
    type Err = ParseNidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ParseNidError(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| ParseNidError(s.to_string()))?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| ParseNidError(s.to_string()))?;
        }
        Ok(Nid(bytes))
    }
}
