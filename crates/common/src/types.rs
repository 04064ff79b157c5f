//! Identifier types for Wellspring components.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of an externally supplied user identifier.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Error returned when parsing a [`UserId`] from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserIdError {
    #[error("user id must not be empty")]
    Empty,

    #[error("user id exceeds {MAX_USER_ID_LENGTH} characters")]
    TooLong,

    #[error("user id contains invalid characters")]
    InvalidCharacters,
}

/// Identifier of an app user.
///
/// User accounts live in the web app; this service only sees the opaque
/// identifier, so it is a validated string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse and validate a user identifier.
    ///
    /// Accepts ASCII alphanumerics plus `-`, `_`, `.` and `@`.
    ///
    /// # Errors
    ///
    /// Returns [`UserIdError`] for empty, oversized, or malformed input.
    pub fn parse(raw: impl Into<String>) -> Result<Self, UserIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(UserIdError::Empty);
        }
        if raw.len() > MAX_USER_ID_LENGTH {
            return Err(UserIdError::TooLong);
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        {
            return Err(UserIdError::InvalidCharacters);
        }
        Ok(Self(raw))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = UserIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// Unique identifier for one video session attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Create a new random transaction ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_accepts_typical_values() {
        assert!(UserId::parse("user-123").is_ok());
        assert!(UserId::parse("alice@example.com").is_ok());
        assert!(UserId::parse("a.b_c").is_ok());
    }

    #[test]
    fn test_user_id_rejects_bad_input() {
        assert_eq!(UserId::parse(""), Err(UserIdError::Empty));
        assert_eq!(
            UserId::parse("x".repeat(MAX_USER_ID_LENGTH + 1)),
            Err(UserIdError::TooLong)
        );
        assert_eq!(
            UserId::parse("user:1"),
            Err(UserIdError::InvalidCharacters)
        );
        assert_eq!(
            UserId::parse("user 1"),
            Err(UserIdError::InvalidCharacters)
        );
    }

    #[test]
    fn test_user_id_serde_validates() {
        let id: UserId = serde_json::from_str("\"user-7\"").unwrap();
        assert_eq!(id.as_str(), "user-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-7\"");

        let bad: Result<UserId, _> = serde_json::from_str("\"{bad}\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(TransactionId::new(), TransactionId::new());
    }
}
