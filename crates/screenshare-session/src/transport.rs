//! Peer-network port.
//!
//! The session never talks to a signaling relay or negotiates ICE/SDP
//! itself. It consumes an implementation of [`PeerNetwork`] that provides:
//!
//! - identity registration ([`PeerNetwork::open`] resolves once the relay
//!   has accepted the identity, i.e. on the peer's `open` event)
//! - outbound calls and data connections from the returned [`PeerHandle`]
//! - every lifecycle event (`call`, `connection`, `data`, `close`, `error`,
//!   `disconnected`) as a [`PeerEvent`] on the link's event stream
//!
//! Events for calls and channels carry the [`CallId`] / [`ChannelId`] of the
//! object they belong to, so the session can drop events for legs it has
//! already torn down. Each handle has its own event stream; once the
//! session drops a [`PeerLink`], nothing from that handle reaches it again.

use crate::media::MediaStream;
use async_trait::async_trait;
use common::types::{CallId, ChannelId, PeerId};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport-level failures reported by the peer network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The requested identity is registered by someone else.
    #[error("Room code {0} is already in use")]
    UnavailableId(String),

    /// No peer with that identity is registered on the relay.
    #[error("Could not find a peer with ID {0}")]
    PeerUnavailable(String),

    /// The relay could not be reached or dropped us.
    #[error("Failed to connect to peer network: {0}")]
    Network(String),

    /// Media negotiation failed for one call.
    #[error("Call failed: {0}")]
    Negotiation(String),

    /// The control data channel failed.
    #[error("Failed to connect to host: {0}")]
    Channel(String),

    /// The handle was destroyed before the operation.
    #[error("Peer connection has been destroyed")]
    Destroyed,
}

/// Options for creating a peer handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerOptions {
    /// STUN/TURN server URLs.
    pub ice_servers: Vec<String>,
}

/// One media call leg, from this side's point of view.
pub trait MediaCall: Send + Sync + fmt::Debug {
    fn id(&self) -> CallId;

    fn remote_peer(&self) -> &PeerId;

    /// Accept an incoming call, optionally sending media back.
    fn answer(&self, stream: Option<&MediaStream>) -> Result<(), TransportError>;

    /// Close the leg. Safe to call more than once.
    fn close(&self);
}

/// One control data channel, from this side's point of view.
pub trait DataChannel: Send + Sync + fmt::Debug {
    fn id(&self) -> ChannelId;

    fn remote_peer(&self) -> &PeerId;

    fn send(&self, payload: Value) -> Result<(), TransportError>;

    /// Close the channel. Safe to call more than once.
    fn close(&self);
}

/// A registered identity on the peer network.
pub trait PeerHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> &PeerId;

    fn is_destroyed(&self) -> bool;

    fn is_disconnected(&self) -> bool;

    /// Place a media call carrying `stream` to `remote`.
    fn call(&self, remote: &PeerId, stream: &MediaStream)
        -> Result<Box<dyn MediaCall>, TransportError>;

    /// Open a control data channel to `remote`.
    fn connect(&self, remote: &PeerId) -> Result<Box<dyn DataChannel>, TransportError>;

    /// Unregister and close every call and channel on this handle.
    fn destroy(&self);
}

/// Everything the peer network reports for one handle.
#[derive(Debug)]
pub enum PeerEvent {
    /// A remote peer is calling us.
    IncomingCall(Box<dyn MediaCall>),
    /// A remote peer opened a data channel to us.
    IncomingConnection(Box<dyn DataChannel>),
    /// Remote media arrived on a call.
    CallStream { call_id: CallId, stream: MediaStream },
    CallClosed { call_id: CallId },
    CallError { call_id: CallId, error: TransportError },
    ChannelOpen { channel_id: ChannelId },
    ChannelData { channel_id: ChannelId, payload: Value },
    ChannelClosed { channel_id: ChannelId },
    ChannelError { channel_id: ChannelId, error: TransportError },
    /// Lost the relay connection. Existing legs may still be alive.
    Disconnected,
    /// The handle was destroyed.
    Closed,
    /// Handle-level failure.
    Error(TransportError),
}

impl PeerEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PeerEvent::IncomingCall(_) => "call",
            PeerEvent::IncomingConnection(_) => "connection",
            PeerEvent::CallStream { .. } => "call_stream",
            PeerEvent::CallClosed { .. } => "call_close",
            PeerEvent::CallError { .. } => "call_error",
            PeerEvent::ChannelOpen { .. } => "channel_open",
            PeerEvent::ChannelData { .. } => "channel_data",
            PeerEvent::ChannelClosed { .. } => "channel_close",
            PeerEvent::ChannelError { .. } => "channel_error",
            PeerEvent::Disconnected => "disconnected",
            PeerEvent::Closed => "close",
            PeerEvent::Error(_) => "error",
        }
    }
}

/// An open handle plus its event stream.
#[derive(Debug)]
pub struct PeerLink {
    pub handle: Arc<dyn PeerHandle>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Entry point into the peer network.
#[async_trait]
pub trait PeerNetwork: Send + Sync + 'static {
    /// Register `id` (or a relay-assigned identity when `None`) and wait
    /// until the relay confirms it.
    async fn open(&self, id: Option<PeerId>, options: &PeerOptions)
        -> Result<PeerLink, TransportError>;
}
