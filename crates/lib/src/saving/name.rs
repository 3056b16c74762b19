use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use super::SavingError;
use crate::Result;

/// Default upper bound on save name length.
pub const DEFAULT_MAX_NAME_LEN: usize = 64;

/// A validated save name: non-empty, at most `max_len` bytes of `[a-z0-9-]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaveName(String);

impl SaveName {
    /// Validate `name` against the default length limit.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_max_len(name, DEFAULT_MAX_NAME_LEN)
    }

    /// Validate `name` against a custom length limit.
    pub fn with_max_len(name: impl Into<String>, max_len: usize) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.len() > max_len {
            Some("name is too long")
        } else if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            Some("only lowercase letters, digits and '-' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SavingError::InvalidName { name, reason }.into()),
            None => Ok(SaveName(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SaveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SaveName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SaveName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SaveName {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self> {
        SaveName::new(value)
    }
}

impl TryFrom<&str> for SaveName {
    type Error = crate::Error;

    fn try_from(value: &str) -> Result<Self> {
        SaveName::new(value)
    }
}

impl From<SaveName> for String {
    fn from(name: SaveName) -> Self {
        name.0
    }
}
