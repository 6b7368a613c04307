//! Room Codes
//!
//! Short, human-typeable identifiers two clients use to meet in the same room.
//! Codes are uppercase ASCII alphanumerics; parsing is case-insensitive.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Characters a room code may contain.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Shortest code length the server will mint or accept.
pub const MIN_CODE_LENGTH: usize = 4;

/// Longest code length the server will mint or accept.
pub const MAX_CODE_LENGTH: usize = 8;

/// Default minted code length.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Errors when parsing a room code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    /// Code was empty after trimming.
    #[error("room code is empty")]
    Empty,
    /// Code length outside the accepted range.
    #[error("room code length {0} out of range")]
    BadLength(usize),
    /// Code contains a character outside the alphabet.
    #[error("room code contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A normalized (uppercase) room code.
///
/// Ordered so it can key a `BTreeMap`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse user input into a code. Surrounding whitespace is ignored and
    /// letters are upper-cased, so `" ab12 "` and `"AB12"` are the same code.
    pub fn parse(raw: &str) -> Result<Self, RoomCodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomCodeError::Empty);
        }

        let len = trimmed.chars().count();
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&len) {
            return Err(RoomCodeError::BadLength(len));
        }

        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(RoomCodeError::InvalidChar(bad));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Draw a random code of `len` characters.
    ///
    /// `len` is clamped to the accepted range.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let len = len.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH);
        let code = (0..len)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Number of distinct codes of the given length, saturating at `usize::MAX`.
    pub fn space(len: usize) -> usize {
        let len = len.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH) as u32;
        CODE_ALPHABET.len().saturating_pow(len)
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether raw input names this code (case-insensitive).
    pub fn matches(&self, raw: &str) -> bool {
        self.0.eq_ignore_ascii_case(raw.trim())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}
