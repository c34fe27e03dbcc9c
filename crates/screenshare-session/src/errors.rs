//! Session error types.
//!
//! Every error maps onto one [`ErrorKind`] of the failure taxonomy and has a
//! non-empty [`SessionError::client_message`] for the UI's error callback.
//! Internal details stay in logs.

use crate::actors::Role;
use crate::media::CaptureError;
use crate::transport::TransportError;
use common::error::IdentityError;
use thiserror::Error;

/// Failure category, also used as a bounded metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Platform refused the capture prompt.
    CaptureDenied,
    /// Platform lacks capture or no source could be opened.
    CaptureUnavailable,
    /// Identity taken or relay unreachable while registering.
    Registration,
    /// Media negotiation failed for one call leg.
    Call,
    /// Control channel could not be opened or dropped abnormally.
    DataChannel,
    /// Relay connection lost.
    TransportDisconnected,
    /// Caller misuse (wrong role, bad room code) or a superseded operation.
    Usage,
    /// Actor mailbox failures.
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CaptureDenied => "capture_denied",
            ErrorKind::CaptureUnavailable => "capture_unavailable",
            ErrorKind::Registration => "registration",
            ErrorKind::Call => "call",
            ErrorKind::DataChannel => "data_channel",
            ErrorKind::TransportDisconnected => "transport_disconnected",
            ErrorKind::Usage => "usage",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Screen capture failed.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// The relay refused or never confirmed our identity.
    #[error("Registration failed: {0}")]
    Registration(#[source] TransportError),

    /// Peer network failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Room code rejected before reaching the relay.
    #[error("Invalid room code: {0}")]
    InvalidRoomCode(#[from] IdentityError),

    /// Entry operation for the other role on an already-claimed session.
    #[error("Session is already a {current}, cannot act as {requested}")]
    RoleConflict { current: Role, requested: Role },

    /// A later operation (stop, reset, another entry operation or
    /// shutdown) took over before this one finished.
    #[error("Operation superseded by {0}")]
    Superseded(&'static str),

    /// Internal error (actor mailbox).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Failure category of a transport error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::UnavailableId(_)
            | TransportError::PeerUnavailable(_)
            | TransportError::Destroyed => ErrorKind::Registration,
            TransportError::Network(_) => ErrorKind::TransportDisconnected,
            TransportError::Negotiation(_) => ErrorKind::Call,
            TransportError::Channel(_) => ErrorKind::DataChannel,
        }
    }
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Capture(CaptureError::Denied(_)) => ErrorKind::CaptureDenied,
            SessionError::Capture(_) => ErrorKind::CaptureUnavailable,
            SessionError::Registration(_) => ErrorKind::Registration,
            SessionError::Transport(e) => e.kind(),
            SessionError::InvalidRoomCode(_)
            | SessionError::RoleConflict { .. }
            | SessionError::Superseded(_) => ErrorKind::Usage,
            SessionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message for the UI. Never empty.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Capture(CaptureError::Denied(_)) => {
                "Screen sharing permission was denied".to_string()
            }
            SessionError::Capture(CaptureError::Unavailable(_)) => {
                "Could not start screen capture".to_string()
            }
            SessionError::Capture(e) => e.to_string(),
            SessionError::Registration(e) | SessionError::Transport(e) => e.to_string(),
            SessionError::InvalidRoomCode(e) => e.to_string(),
            SessionError::RoleConflict { .. } => self.to_string(),
            SessionError::Superseded(_) => "The operation was cancelled".to_string(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
