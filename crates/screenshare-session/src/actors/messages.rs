//! Message types for the session actor.
//!
//! UI-facing operations reach the actor as [`SessionMessage`]s over a
//! bounded `tokio::sync::mpsc` mailbox. Request/reply operations carry a
//! `tokio::sync::oneshot` sender. Tasks the actor spawns for capture and
//! relay registration report back through the same mailbox.

use crate::errors::SessionError;
use crate::media::{CaptureError, MediaStream};
use crate::registry::GuestRoster;
use crate::status::SessionStatus;
use crate::transport::{PeerLink, TransportError};
use common::types::{PeerId, RoomCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Side of the room this session plays. Fixed by the first entry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Set the display name used in the control-channel handshake.
    SetNickname { nickname: String },

    /// Register the host identity without capturing media.
    InitializeHostRoom {
        room_id: RoomCode,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Capture the screen and share it in the room.
    StartScreenShare {
        room_id: RoomCode,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Join a host's room as a guest.
    JoinScreenShare {
        room_id: RoomCode,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Host: stop sharing, keep the room. Guest: leave.
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Tear everything down and forget the role.
    Reset { respond_to: oneshot::Sender<()> },

    /// Diagnostic state.
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },

    /// The primary video track of a captured stream ended.
    CaptureEnded { stream_id: String },

    /// The capture prompt of pending operation `operation` was answered.
    CaptureFinished {
        operation: u64,
        result: Result<MediaStream, CaptureError>,
    },

    /// Relay registration for pending operation `operation` finished.
    PeerOpened {
        operation: u64,
        result: Result<PeerLink, TransportError>,
    },
}

/// Everything the UI can read without a round trip.
///
/// Published by the actor after each mutation. Guest count and guest list
/// always come from the same `guests` roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub role: Option<Role>,
    pub room_id: Option<RoomCode>,
    pub status: Option<SessionStatus>,
    /// Identity of the live peer handle, if any.
    pub peer_id: Option<PeerId>,
    pub local_nickname: String,
    /// Guest only. Empty until the host's handshake arrives.
    pub host_nickname: String,
    /// Host only.
    pub guests: GuestRoster,
    /// Host has a local capture attached.
    pub sharing: bool,
    /// Guest has a remote stream attached.
    pub receiving: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub fn all_users(&self) -> AllUsers {
        match self.role {
            Some(Role::Host) => AllUsers {
                host: self.local_nickname.clone(),
                guests: self.guests.nicknames(),
            },
            Some(Role::Guest) => AllUsers {
                host: self.host_nickname.clone(),
                guests: vec![self.local_nickname.clone()],
            },
            None => AllUsers::default(),
        }
    }
}

/// Nicknames of everyone this session knows to be in the room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllUsers {
    pub host: String,
    pub guests: Vec<String>,
}

/// Session state returned by `GetState`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub snapshot: SessionSnapshot,
    /// Call legs currently held (host: one per guest, guest: at most one).
    pub live_calls: usize,
    pub mailbox_depth: usize,
    pub messages_processed: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::Host.to_string(), "host");
        assert_eq!(serde_json::to_string(&Role::Guest).unwrap(), "\"guest\"");
    }

    #[test]
    fn test_all_users_for_guest() {
        let snapshot = SessionSnapshot {
            role: Some(Role::Guest),
            local_nickname: "GuestUser".to_string(),
            host_nickname: "HostUser".to_string(),
            ..SessionSnapshot::default()
        };

        assert_eq!(
            snapshot.all_users(),
            AllUsers {
                host: "HostUser".to_string(),
                guests: vec!["GuestUser".to_string()],
            }
        );
    }

    #[test]
    fn test_all_users_without_role_is_empty() {
        assert_eq!(SessionSnapshot::default().all_users(), AllUsers::default());
    }
}
