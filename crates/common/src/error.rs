//! Common error types for screenshare components.

use thiserror::Error;

/// A room code or peer identity the relay would not accept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Nothing left after trimming
    #[error("Room code is empty")]
    Empty,

    /// Longer than the relay allows
    #[error("Room code is too long ({0} characters)")]
    TooLong(usize),

    /// Character outside ASCII alphanumerics, `-` and `_`
    #[error("Room code contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// Separator at the start or end
    #[error("Room code cannot start or end with '-' or '_'")]
    InvalidBoundary,
}

/// Control-channel payload that could not be decoded.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not a JSON object with a string `type` field
    #[error("Malformed control message: {0}")]
    Malformed(String),

    /// Well-formed message of a type this build does not handle
    #[error("Unknown control message type: {0}")]
    UnknownType(String),

    /// Outgoing message could not be serialized
    #[error("Failed to encode control message: {0}")]
    Encode(String),
}
