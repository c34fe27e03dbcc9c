//! Screen-Share Session Library
//!
//! Peer-to-peer screen sharing between one host and any number of guests,
//! driven by a single session actor per participant:
//!
//! - Room lifecycle: a host registers a room code as its peer identity,
//!   guests dial that identity
//! - Media session: the host captures its screen and places one call leg per
//!   guest; a guest answers the host's call and surfaces the remote stream
//! - Control channel: a data channel per guest carrying the nickname handshake
//! - Guest registry and status projection for the UI
//!
//! Signaling, NAT traversal and media negotiation are not done here. The
//! embedding application injects a [`transport::PeerNetwork`] and a
//! [`media::MediaCapture`].
//!
//! # Architecture
//!
//! ```text
//! SessionHandle ──► SessionActor
//!                   ├── PeerHandle (one, replaced on reconnect)
//!                   ├── MediaStream (host capture / guest remote)
//!                   ├── GuestRegistry (host)
//!                   └── StatusProjector ──► SessionCallbacks
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Session actor, handle and mailbox messages
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types and failure taxonomy
//! - [`media`] - Media streams, tracks and the capture port
//! - [`transport`] - Peer-network port
//! - [`registry`] - Host-side guest registry
//! - [`status`] - Status values and UI callbacks

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod registry;
pub mod status;
pub mod transport;

pub use actors::{AllUsers, Role, SessionActor, SessionHandle, SessionSnapshot, SessionState};
pub use config::Config;
pub use errors::{ErrorKind, SessionError};
pub use registry::{GuestEntry, GuestRoster};
pub use status::{SessionCallbacks, SessionStatus};
