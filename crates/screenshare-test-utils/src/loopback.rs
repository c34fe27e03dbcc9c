//! In-process peer network for session testing.
//!
//! [`LoopbackRelay`] implements [`PeerNetwork`] by routing every call and
//! channel event between sessions in the same process. It behaves like a
//! signaling relay plus perfect media transport:
//!
//! - `open` registers an identity (rejecting duplicates)
//! - `connect` delivers `IncomingConnection` to the remote, then
//!   `ChannelOpen` to both ends
//! - `call` delivers `IncomingCall` to the remote; `answer` delivers the
//!   caller's stream to the answerer (and the answerer's stream back)
//! - closing a call or channel delivers the close to both ends
//! - `destroy` closes everything the handle owns
//!
//! Failure injection helpers simulate registration, negotiation, channel
//! and relay failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use screenshare_test_utils::LoopbackRelay;
//!
//! let relay = LoopbackRelay::new();
//! relay.fail_next_open(TransportError::Network("relay down".to_string()));
//! assert_eq!(relay.open_count(), 0);
//! ```

use async_trait::async_trait;
use common::types::{CallId, ChannelId, PeerId};
use screenshare_session::media::MediaStream;
use screenshare_session::transport::{
    DataChannel, MediaCall, PeerEvent, PeerHandle, PeerLink, PeerNetwork, PeerOptions,
    TransportError,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One registered handle's inbox.
#[derive(Debug, Clone)]
struct Endpoint {
    peer: PeerId,
    serial: u64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Endpoint {
    fn deliver(&self, event: PeerEvent) {
        // The session drops the receiver when it lets go of a handle.
        let _ = self.events.send(event);
    }

    fn is(&self, peer: &PeerId, serial: u64) -> bool {
        &self.peer == peer && self.serial == serial
    }
}

#[derive(Debug)]
struct Registration {
    serial: u64,
    endpoint: Endpoint,
    flags: Arc<HandleFlags>,
}

#[derive(Debug, Default)]
struct HandleFlags {
    destroyed: AtomicBool,
    disconnected: AtomicBool,
}

#[derive(Debug)]
struct CallRecord {
    caller: Endpoint,
    callee: Endpoint,
    stream: MediaStream,
}

#[derive(Debug)]
struct ChannelRecord {
    initiator: Endpoint,
    acceptor: Endpoint,
}

impl ChannelRecord {
    fn other(&self, from: &PeerId) -> &Endpoint {
        if &self.initiator.peer == from {
            &self.acceptor
        } else {
            &self.initiator
        }
    }
}

#[derive(Debug, Default)]
struct RelayState {
    peers: HashMap<PeerId, Registration>,
    calls: HashMap<CallId, CallRecord>,
    channels: HashMap<ChannelId, ChannelRecord>,
    fail_next_open: Option<TransportError>,
    failing_callees: HashSet<PeerId>,
    calls_placed: HashMap<PeerId, usize>,
    open_count: usize,
    last_options: Option<PeerOptions>,
}

impl RelayState {
    fn endpoint(&self, peer: &PeerId) -> Option<Endpoint> {
        self.peers.get(peer).map(|r| r.endpoint.clone())
    }

    /// Remove every call and channel touching `peer`/`serial`, notifying
    /// both ends.
    fn close_everything_of(&mut self, peer: &PeerId, serial: u64) {
        let call_ids: Vec<CallId> = self
            .calls
            .iter()
            .filter(|(_, c)| c.caller.is(peer, serial) || c.callee.is(peer, serial))
            .map(|(id, _)| *id)
            .collect();
        for call_id in call_ids {
            if let Some(record) = self.calls.remove(&call_id) {
                record.caller.deliver(PeerEvent::CallClosed { call_id });
                record.callee.deliver(PeerEvent::CallClosed { call_id });
            }
        }

        let channel_ids: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| c.initiator.is(peer, serial) || c.acceptor.is(peer, serial))
            .map(|(id, _)| *id)
            .collect();
        for channel_id in channel_ids {
            if let Some(record) = self.channels.remove(&channel_id) {
                record.initiator.deliver(PeerEvent::ChannelClosed { channel_id });
                record.acceptor.deliver(PeerEvent::ChannelClosed { channel_id });
            }
        }
    }
}

/// In-memory peer network shared by every session in a test.
#[derive(Debug, Clone, Default)]
pub struct LoopbackRelay {
    inner: Arc<Mutex<RelayState>>,
    serials: Arc<AtomicU64>,
}

impl LoopbackRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        self.inner.lock().unwrap().fail_next_open = Some(error);
    }

    /// Make every future call to `callee` fail negotiation after it is placed.
    pub fn fail_calls_to(&self, callee: &PeerId) {
        self.inner
            .lock()
            .unwrap()
            .failing_callees
            .insert(callee.clone());
    }

    /// Drop `peer`'s relay connection. Its identity is released; calls and
    /// channels stay up.
    pub fn disconnect(&self, peer: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(registration) = inner.peers.remove(peer) {
            registration
                .flags
                .disconnected
                .store(true, Ordering::SeqCst);
            registration.endpoint.deliver(PeerEvent::Disconnected);
        }
    }

    /// Simulate a peer vanishing (tab closed): everything it had is closed
    /// and its handle reports `Closed`.
    pub fn kill(&self, peer: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(registration) = inner.peers.remove(peer) {
            registration.flags.destroyed.store(true, Ordering::SeqCst);
            inner.close_everything_of(peer, registration.serial);
            registration.endpoint.deliver(PeerEvent::Closed);
        }
    }

    /// Deliver a handle-level error to `peer`.
    pub fn emit_error(&self, peer: &PeerId, error: TransportError) {
        self.send_event(peer, PeerEvent::Error(error));
    }

    /// Fail every channel touching `peer`, reporting `error` to both ends.
    pub fn fail_channels_of(&self, peer: &PeerId, error: &TransportError) {
        let mut inner = self.inner.lock().unwrap();
        let channel_ids: Vec<ChannelId> = inner
            .channels
            .iter()
            .filter(|(_, c)| &c.initiator.peer == peer || &c.acceptor.peer == peer)
            .map(|(id, _)| *id)
            .collect();
        for channel_id in channel_ids {
            if let Some(record) = inner.channels.remove(&channel_id) {
                record.initiator.deliver(PeerEvent::ChannelError {
                    channel_id,
                    error: error.clone(),
                });
                record.acceptor.deliver(PeerEvent::ChannelError {
                    channel_id,
                    error: error.clone(),
                });
            }
        }
    }

    /// Push an arbitrary event to the handle registered as `peer`.
    pub fn send_event(&self, peer: &PeerId, event: PeerEvent) {
        let inner = self.inner.lock().unwrap();
        if let Some(endpoint) = inner.endpoint(peer) {
            endpoint.deliver(event);
        }
    }

    /// Successful and failed `open` attempts so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.lock().unwrap().open_count
    }

    #[must_use]
    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.inner.lock().unwrap().peers.contains_key(peer)
    }

    #[must_use]
    pub fn registered_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.lock().unwrap().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Calls currently open on the relay.
    #[must_use]
    pub fn live_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    /// Calls currently open to `callee`.
    #[must_use]
    pub fn live_calls_to(&self, callee: &PeerId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .values()
            .filter(|c| &c.callee.peer == callee)
            .count()
    }

    #[must_use]
    pub fn live_channels(&self) -> usize {
        self.inner.lock().unwrap().channels.len()
    }

    /// Calls ever placed to `callee`.
    #[must_use]
    pub fn calls_placed_to(&self, callee: &PeerId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls_placed
            .get(callee)
            .copied()
            .unwrap_or_default()
    }

    /// Options passed to the most recent `open`.
    #[must_use]
    pub fn last_options(&self) -> Option<PeerOptions> {
        self.inner.lock().unwrap().last_options.clone()
    }
}

#[async_trait]
impl PeerNetwork for LoopbackRelay {
    async fn open(
        &self,
        id: Option<PeerId>,
        options: &PeerOptions,
    ) -> Result<PeerLink, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.open_count += 1;
        inner.last_options = Some(options.clone());

        if let Some(error) = inner.fail_next_open.take() {
            return Err(error);
        }

        let peer = id.unwrap_or_else(PeerId::ephemeral);
        if inner.peers.contains_key(&peer) {
            return Err(TransportError::UnavailableId(peer.to_string()));
        }

        let serial = self.serials.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = Arc::new(HandleFlags::default());
        let endpoint = Endpoint {
            peer: peer.clone(),
            serial,
            events: tx,
        };
        inner.peers.insert(
            peer.clone(),
            Registration {
                serial,
                endpoint: endpoint.clone(),
                flags: Arc::clone(&flags),
            },
        );
        debug!(target: "screenshare.loopback", peer = %peer, serial, "Peer registered");

        let handle = LoopbackPeer {
            endpoint,
            flags,
            relay: Arc::clone(&self.inner),
        };
        Ok(PeerLink {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

/// A handle registered on the loopback relay.
#[derive(Debug)]
pub struct LoopbackPeer {
    endpoint: Endpoint,
    flags: Arc<HandleFlags>,
    relay: Arc<Mutex<RelayState>>,
}

impl LoopbackPeer {
    fn check_alive(&self) -> Result<(), TransportError> {
        if self.flags.destroyed.load(Ordering::SeqCst) {
            Err(TransportError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl PeerHandle for LoopbackPeer {
    fn id(&self) -> &PeerId {
        &self.endpoint.peer
    }

    fn is_destroyed(&self) -> bool {
        self.flags.destroyed.load(Ordering::SeqCst)
    }

    fn is_disconnected(&self) -> bool {
        self.flags.disconnected.load(Ordering::SeqCst)
    }

    fn call(
        &self,
        remote: &PeerId,
        stream: &MediaStream,
    ) -> Result<Box<dyn MediaCall>, TransportError> {
        self.check_alive()?;
        let mut inner = self.relay.lock().unwrap();
        let callee = inner
            .endpoint(remote)
            .ok_or_else(|| TransportError::PeerUnavailable(remote.to_string()))?;

        let call_id = CallId::new();
        *inner.calls_placed.entry(remote.clone()).or_default() += 1;

        if inner.failing_callees.contains(remote) {
            self.endpoint.deliver(PeerEvent::CallError {
                call_id,
                error: TransportError::Negotiation("ICE negotiation failed".to_string()),
            });
        } else {
            callee.deliver(PeerEvent::IncomingCall(Box::new(LoopbackCall {
                id: call_id,
                local: remote.clone(),
                remote: self.endpoint.peer.clone(),
                relay: Arc::clone(&self.relay),
            })));
            inner.calls.insert(
                call_id,
                CallRecord {
                    caller: self.endpoint.clone(),
                    callee,
                    stream: stream.clone(),
                },
            );
        }

        Ok(Box::new(LoopbackCall {
            id: call_id,
            local: self.endpoint.peer.clone(),
            remote: remote.clone(),
            relay: Arc::clone(&self.relay),
        }))
    }

    fn connect(&self, remote: &PeerId) -> Result<Box<dyn DataChannel>, TransportError> {
        self.check_alive()?;
        let mut inner = self.relay.lock().unwrap();
        let acceptor = inner
            .endpoint(remote)
            .ok_or_else(|| TransportError::PeerUnavailable(remote.to_string()))?;

        let channel_id = ChannelId::new();
        acceptor.deliver(PeerEvent::IncomingConnection(Box::new(LoopbackChannel {
            id: channel_id,
            local: remote.clone(),
            remote: self.endpoint.peer.clone(),
            relay: Arc::clone(&self.relay),
        })));
        acceptor.deliver(PeerEvent::ChannelOpen { channel_id });
        self.endpoint.deliver(PeerEvent::ChannelOpen { channel_id });
        inner.channels.insert(
            channel_id,
            ChannelRecord {
                initiator: self.endpoint.clone(),
                acceptor,
            },
        );

        Ok(Box::new(LoopbackChannel {
            id: channel_id,
            local: self.endpoint.peer.clone(),
            remote: remote.clone(),
            relay: Arc::clone(&self.relay),
        }))
    }

    fn destroy(&self) {
        if self.flags.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.relay.lock().unwrap();
        let registered_here = inner
            .peers
            .get(&self.endpoint.peer)
            .is_some_and(|r| r.serial == self.endpoint.serial);
        if registered_here {
            inner.peers.remove(&self.endpoint.peer);
        }
        inner.close_everything_of(&self.endpoint.peer, self.endpoint.serial);
        self.endpoint.deliver(PeerEvent::Closed);
        debug!(
            target: "screenshare.loopback",
            peer = %self.endpoint.peer,
            serial = self.endpoint.serial,
            "Peer destroyed"
        );
    }
}

/// One side of a loopback call.
#[derive(Debug)]
pub struct LoopbackCall {
    id: CallId,
    local: PeerId,
    remote: PeerId,
    relay: Arc<Mutex<RelayState>>,
}

impl MediaCall for LoopbackCall {
    fn id(&self) -> CallId {
        self.id
    }

    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn answer(&self, stream: Option<&MediaStream>) -> Result<(), TransportError> {
        let inner = self.relay.lock().unwrap();
        let record = inner
            .calls
            .get(&self.id)
            .ok_or_else(|| TransportError::Negotiation("call is no longer open".to_string()))?;
        if record.callee.peer != self.local {
            return Err(TransportError::Negotiation(
                "only the callee can answer".to_string(),
            ));
        }

        record.callee.deliver(PeerEvent::CallStream {
            call_id: self.id,
            stream: record.stream.clone(),
        });
        if let Some(stream) = stream {
            record.caller.deliver(PeerEvent::CallStream {
                call_id: self.id,
                stream: stream.clone(),
            });
        }
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.relay.lock().unwrap();
        if let Some(record) = inner.calls.remove(&self.id) {
            record.caller.deliver(PeerEvent::CallClosed { call_id: self.id });
            record.callee.deliver(PeerEvent::CallClosed { call_id: self.id });
        }
    }
}

/// One end of a loopback data channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    id: ChannelId,
    local: PeerId,
    remote: PeerId,
    relay: Arc<Mutex<RelayState>>,
}

impl DataChannel for LoopbackChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    fn send(&self, payload: Value) -> Result<(), TransportError> {
        let inner = self.relay.lock().unwrap();
        let record = inner
            .channels
            .get(&self.id)
            .ok_or_else(|| TransportError::Channel("channel is closed".to_string()))?;
        record.other(&self.local).deliver(PeerEvent::ChannelData {
            channel_id: self.id,
            payload,
        });
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.relay.lock().unwrap();
        if let Some(record) = inner.channels.remove(&self.id) {
            record
                .initiator
                .deliver(PeerEvent::ChannelClosed { channel_id: self.id });
            record
                .acceptor
                .deliver(PeerEvent::ChannelClosed { channel_id: self.id });
        }
    }
}
