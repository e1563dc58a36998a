//! Owner identity.
//!
//! Every conversation belongs to exactly one owner. Authentication is handled
//! outside the core, so the identity is an opaque, non-empty token (in
//! practice an email address) that callers pass explicitly to each operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when an owner identity is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOwnerError;

impl fmt::Display for InvalidOwnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner identity must not be blank")
    }
}

impl std::error::Error for InvalidOwnerError {}

/// The identity that owns a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an owner identity, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidOwnerError`] if the identity is empty after trimming.
    pub fn new(identity: impl Into<String>) -> Result<Self, InvalidOwnerError> {
        let identity = identity.into();
        let trimmed = identity.trim();
        if trimmed.is_empty() {
            return Err(InvalidOwnerError);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = InvalidOwnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = InvalidOwnerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self {
        owner.0
    }
}
