//! Common data types for screenshare components.

use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of a generated room code.
pub const ROOM_CODE_LEN: usize = 8;

/// Longest identity the relay accepts.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Network identity of a peer on the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a relay-assigned identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a random ephemeral identity, used for guests.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RoomCode> for PeerId {
    fn from(code: RoomCode) -> Self {
        Self(code.0)
    }
}

/// Room code shared with guests. Doubles as the host's peer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh 8-character uppercase code from a random UUID.
    #[must_use]
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        // A simple UUID is 32 hex digits, so the prefix always exists.
        let prefix = simple.get(..ROOM_CODE_LEN).unwrap_or(&simple);
        Self(prefix.to_ascii_uppercase())
    }

    /// Normalize a code typed or pasted by a user: trim, then uppercase.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the result is empty, too long, or has
    /// characters the relay would refuse.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let code = input.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(IdentityError::Empty);
        }
        if code.len() > MAX_IDENTITY_LEN {
            return Err(IdentityError::TooLong(code.len()));
        }
        if let Some(c) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdentityError::InvalidCharacter(c));
        }
        if code.starts_with(['-', '_']) || code.ends_with(['-', '_']) {
            return Err(IdentityError::InvalidBoundary);
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host peer identity for this room.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.0.clone())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// Unique identifier for a media call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a control data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    /// Create a new random channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier for one session manager instance, used in logs
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
