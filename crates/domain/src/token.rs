//! Human-typed session tokens.
//!
//! A token is exactly 8 characters from `[A-Z0-9]`.  Input is matched
//! case-insensitively and stored uppercase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const TOKEN_LEN: usize = 8;
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Parse user input into a canonical token.
    pub fn parse(raw: &str) -> Result<Self> {
        let candidate = raw.trim();
        if candidate.len() != TOKEN_LEN || !candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!(
                "token must be {TOKEN_LEN} characters from [A-Z0-9], got {candidate:?}"
            )));
        }
        Ok(Self(candidate.to_ascii_uppercase()))
    }

    /// Build a token from alphabet positions.  Positions wrap modulo the
    /// alphabet size, so any source of `usize` values yields a valid token.
    pub fn from_indices(indices: [usize; TOKEN_LEN]) -> Self {
        let token = indices
            .iter()
            .map(|&i| TOKEN_ALPHABET[i % TOKEN_ALPHABET.len()] as char)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Token {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
