//! C5 — lock token codec.
//!
//! A lock token is the node's [`Nid`] rendered as hex, a literal `-`, and a
//! single check digit computed by a modulo-37 weighted sum over the hex
//! digits (spec.md §4.5). The check digit catches single-character
//! transcription errors in tokens a caller copies by hand.

use crate::nid::Nid;
use std::fmt;
use std::str::FromStr;

/// A lock token: an [`Nid`] plus its check digit.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct LockToken {
    nid: Nid,
}

impl LockToken {
    /// Wraps `nid` as a token; the check digit is derived, never stored.
    pub fn new(nid: Nid) -> Self {
        Self { nid }
    }

    /// The token's underlying node identifier.
    pub fn nid(&self) -> Nid {
        self.nid
    }

    fn check_digit(nid: Nid) -> char {
        let hex = nid.to_string();
        let mut result: u64 = 0;
        let mut multiplier: u64 = 36;
        for c in hex.chars() {
            let value = c.to_digit(16).expect("Nid::to_string is always hex") as u64;
            result += multiplier * value;
            multiplier -= 1;
        }
        let mut rem = result % 37;
        if rem != 0 {
            rem = 37 - rem;
        }
        encode_check_digit(rem)
    }
}

fn encode_check_digit(v: u64) -> char {
    match v {
        0..=9 => (b'0' + v as u8) as char,
        10..=35 => (b'A' + (v - 10) as u8) as char,
        36 => '+',
        _ => unreachable!("remainder is always < 37"),
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.nid, Self::check_digit(self.nid))
    }
}

/// Error returned when parsing a [`LockToken`] fails.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseTokenError {
    /// The token had no `-` separator, or the separator was the last
    /// character with nothing following it.
    #[error("token is missing its '-' separator or check digit: {0:?}")]
    MissingSeparator(String),
    /// The body was not valid hex, or the check digit did not match.
    #[error("token check digit mismatch or malformed body: {0:?}")]
    BadToken(String),
}

impl FromStr for LockToken {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, check) = s
            .split_once('-')
            .ok_or_else(|| ParseTokenError::MissingSeparator(s.to_string()))?;
        if check.len() != 1 {
            return Err(ParseTokenError::MissingSeparator(s.to_string()));
        }
        let nid: Nid = body
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| ParseTokenError::BadToken(s.to_string()))?;
        let expected = LockToken::check_digit(nid);
        let actual = check.chars().next().unwrap().to_ascii_uppercase();
        if expected != actual {
            return Err(ParseTokenError::BadToken(s.to_string()));
        }
        Ok(LockToken { nid })
    }
}
