//! `SessionActor` - the peer screen-share session manager.
//!
//! One actor per browser tab (or process) and role. It owns all session
//! state and is the only writer of it:
//!
//! - the single peer handle and that handle's event stream
//! - the local capture (host) or the received remote stream (guest)
//! - call legs and the control channel(s)
//! - the guest registry (host)
//! - the status projector and UI callbacks
//!
//! # Event sources
//!
//! The run loop selects over cancellation, the command mailbox and the
//! current peer handle's event stream. Replacing or destroying the handle
//! drops its stream, so events from a torn-down handle are never seen.
//! Call and channel events are matched by id against the legs the actor
//! still holds; anything else is stale and ignored.
//!
//! # Suspending work
//!
//! The capture prompt and relay registration run as spawned tasks. The
//! entry operation that started one is parked as the single pending
//! operation, and the task posts its result back through the mailbox as
//! `CaptureFinished` or `PeerOpened`. Meanwhile the loop keeps serving
//! commands and peer events. Stop, reset, a newer entry operation or
//! shutdown abandon the pending operation: its task is cancelled, its
//! caller gets `Superseded`, and a result that still arrives is released
//! instead of applied.
//!
//! # Lifecycle
//!
//! 1. Spawned idle, no role
//! 2. First entry operation fixes the role (host or guest)
//! 3. `reset` returns to idle; cancellation or dropping every handle exits

use super::messages::{AllUsers, Role, SessionMessage, SessionSnapshot, SessionState};
use super::metrics::MailboxMonitor;
use crate::config::Config;
use crate::errors::SessionError;
use crate::media::{CaptureError, MediaCapture, MediaStream};
use crate::observability::metrics;
use crate::registry::{GuestEntry, GuestRegistry, GuestRoster, RemovedGuest};
use crate::status::{SessionCallbacks, SessionStatus, StatusProjector};
use crate::transport::{
    DataChannel, MediaCall, PeerEvent, PeerHandle, PeerLink, PeerNetwork, TransportError,
};
use common::error::ProtocolError;
use common::protocol::ControlMessage;
use common::types::{CallId, ChannelId, PeerId, RoomCode, SessionId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Handle to a `SessionActor`.
///
/// Commands go through the mailbox. Reads come from the latest published
/// [`SessionSnapshot`] and never block.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Set the nickname sent in the control-channel handshake.
    pub async fn set_nickname(&self, nickname: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::SetNickname {
                nickname: nickname.into(),
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Generate a fresh room code for hosting.
    #[must_use]
    pub fn generate_room_id(&self) -> RoomCode {
        RoomCode::generate()
    }

    /// Register `room_id` as this host's identity without capturing media.
    pub async fn initialize_host_room(&self, room_id: RoomCode) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::InitializeHostRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Capture the screen and share it with every guest in `room_id`.
    pub async fn start_screen_share(&self, room_id: RoomCode) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StartScreenShare {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Join `room_id` as a guest. Resolves once the host is being dialed;
    /// the stream arrives later through `on_stream_received`.
    pub async fn join_screen_share(&self, room_id: RoomCode) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::JoinScreenShare {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Host: stop sharing and keep the room. Guest: leave the room.
    pub async fn stop_screen_share(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::StopScreenShare { respond_to })
            .await?
    }

    /// Tear everything down and forget the role.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionMessage::Reset { respond_to })
            .await
    }

    /// Diagnostic state, including mailbox statistics.
    pub async fn get_state(&self) -> Result<SessionState, SessionError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    #[must_use]
    pub fn status(&self) -> Option<SessionStatus> {
        self.snapshot.borrow().status
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.snapshot.borrow().role
    }

    #[must_use]
    pub fn room_id(&self) -> Option<RoomCode> {
        self.snapshot.borrow().room_id.clone()
    }

    /// Number of guests in the host's registry.
    #[must_use]
    pub fn guest_count(&self) -> usize {
        self.snapshot.borrow().guests.count()
    }

    #[must_use]
    pub fn connected_guests(&self) -> Vec<GuestEntry> {
        self.snapshot.borrow().guests.list().to_vec()
    }

    /// Count and list from one instant.
    #[must_use]
    pub fn guest_roster(&self) -> GuestRoster {
        self.snapshot.borrow().guests.clone()
    }

    /// Guest only. Empty until the host's nickname arrives.
    #[must_use]
    pub fn host_nickname(&self) -> String {
        self.snapshot.borrow().host_nickname.clone()
    }

    /// Identity of the live peer handle.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        self.snapshot.borrow().peer_id.clone()
    }

    #[must_use]
    pub fn all_users(&self) -> AllUsers {
        self.snapshot.borrow().all_users()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a published snapshot satisfies `condition`.
    pub async fn wait_until(
        &self,
        condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(condition)
            .await
            .map_err(|e| SessionError::Internal(format!("snapshot channel closed: {e}")))?;
        Ok(snapshot.clone())
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }
}

type Responder = oneshot::Sender<Result<(), SessionError>>;

/// The suspended step an entry operation is waiting on.
enum Awaiting {
    /// Host: the platform capture prompt.
    Capture { room_id: RoomCode },
    /// Relay registration of this session's identity.
    Registration(Registration),
}

/// What to do once the relay confirms the identity.
enum Registration {
    /// Host room, with the capture to share if the operation made one.
    Host {
        room_id: RoomCode,
        stream: Option<MediaStream>,
    },
    Guest {
        room_id: RoomCode,
    },
}

/// An entry operation whose reply waits on a spawned task.
struct PendingOperation {
    id: u64,
    awaiting: Awaiting,
    respond_to: Responder,
    cancel_token: CancellationToken,
}

/// The live peer handle and its event stream.
struct ActivePeer {
    handle: Arc<dyn PeerHandle>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    config: Config,
    network: Arc<dyn PeerNetwork>,
    capture: Arc<dyn MediaCapture>,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Lets spawned tasks post back without keeping the actor alive.
    self_sender: mpsc::WeakSender<SessionMessage>,
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    projector: StatusProjector,

    role: Option<Role>,
    room_id: Option<RoomCode>,
    local_nickname: String,
    peer: Option<ActivePeer>,
    /// At most one entry operation waits on capture or registration.
    pending: Option<PendingOperation>,
    operations: u64,

    // Host side.
    local_stream: Option<MediaStream>,
    guests: GuestRegistry,

    // Guest side.
    host_nickname: String,
    host_channel: Option<Box<dyn DataChannel>>,
    inbound_call: Option<Box<dyn MediaCall>>,
    remote_stream: Option<MediaStream>,
    /// Reached `Connected` at least once in the current room.
    has_connected: bool,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: Config,
        network: Arc<dyn PeerNetwork>,
        capture: Arc<dyn MediaCapture>,
        callbacks: SessionCallbacks,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let session_id = SessionId::new();

        let actor = Self {
            session_id,
            config,
            network,
            capture,
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            mailbox: MailboxMonitor::new(session_id.to_string()),
            snapshot_tx,
            projector: StatusProjector::new(callbacks),
            role: None,
            room_id: None,
            local_nickname: String::new(),
            peer: None,
            pending: None,
            operations: 0,
            local_stream: None,
            guests: GuestRegistry::new(),
            host_nickname: String::new(),
            host_channel: None,
            inbound_call: None,
            remote_stream: None,
            has_connected: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            snapshot: snapshot_rx,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "screenshare.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(
            target: "screenshare.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "screenshare.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(
                                target: "screenshare.actor.session",
                                session_id = %self.session_id,
                                "All session handles dropped, exiting"
                            );
                            break;
                        }
                    }
                }

                event = next_peer_event(&mut self.peer) => {
                    match event {
                        Some(event) => self.handle_peer_event(event),
                        None => self.on_peer_closed(),
                    }
                    self.publish();
                }
            }
        }

        self.shutdown();

        info!(
            target: "screenshare.actor.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "SessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::SetNickname { nickname } => {
                self.local_nickname = nickname.trim().to_string();
                self.publish();
            }

            SessionMessage::InitializeHostRoom {
                room_id,
                respond_to,
            } => self.initialize_host_room(room_id, respond_to),

            SessionMessage::StartScreenShare {
                room_id,
                respond_to,
            } => self.start_screen_share(room_id, respond_to),

            SessionMessage::JoinScreenShare {
                room_id,
                respond_to,
            } => self.join_screen_share(room_id, respond_to),

            SessionMessage::StopScreenShare { respond_to } => {
                self.stop_screen_share();
                self.reply(respond_to, Ok(()));
            }

            SessionMessage::Reset { respond_to } => {
                self.reset();
                self.publish();
                let _ = respond_to.send(());
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }

            SessionMessage::CaptureEnded { stream_id } => {
                self.on_capture_ended(&stream_id);
                self.publish();
            }

            SessionMessage::CaptureFinished { operation, result } => {
                self.on_capture_finished(operation, result);
                self.publish();
            }

            SessionMessage::PeerOpened { operation, result } => {
                self.on_peer_opened(operation, result);
                self.publish();
            }
        }
    }

    /// Publish, then answer an entry operation.
    fn reply(&self, respond_to: Responder, result: Result<(), SessionError>) {
        self.publish();
        let _ = respond_to.send(result);
    }

    // ------------------------------------------------------------------
    // Entry operations
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(room_id = %room_id))]
    fn initialize_host_room(&mut self, room_id: RoomCode, respond_to: Responder) {
        if let Err(e) = self.claim_role(Role::Host) {
            self.reply(respond_to, Err(e));
            return;
        }
        self.abandon_pending("initialize_host_room");

        let identity = room_id.peer_id();
        if self.reuse_peer(Some(&identity)) {
            self.enter_room(room_id);
            self.reply(respond_to, Ok(()));
        } else {
            self.begin_registration(
                Registration::Host {
                    room_id,
                    stream: None,
                },
                Some(identity),
                respond_to,
            );
        }
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    fn start_screen_share(&mut self, room_id: RoomCode, respond_to: Responder) {
        if let Err(e) = self.claim_role(Role::Host) {
            self.reply(respond_to, Err(e));
            return;
        }

        if !self.capture.is_supported() {
            let e = SessionError::Capture(CaptureError::Unsupported);
            self.fail(&e);
            self.reply(respond_to, Err(e));
            return;
        }
        self.abandon_pending("start_screen_share");

        // A new capture replaces the one being shared.
        if let Some(previous) = self.local_stream.take() {
            previous.stop_all();
            self.guests.close_calls();
        }

        self.transition(SessionStatus::Connecting);

        let (operation, cancel_token) = self.begin(Awaiting::Capture { room_id }, respond_to);
        debug!(
            target: "screenshare.actor.session",
            operation = operation,
            "Opening capture prompt"
        );
        let capture = Arc::clone(&self.capture);
        let constraints = self.config.capture_constraints();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = capture.capture(&constraints) => result,
                () = cancel_token.cancelled() => return,
            };
            post_result(&sender, SessionMessage::CaptureFinished { operation, result }).await;
        });
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    fn join_screen_share(&mut self, room_id: RoomCode, respond_to: Responder) {
        if let Err(e) = self.claim_role(Role::Guest) {
            self.reply(respond_to, Err(e));
            return;
        }
        self.abandon_pending("join_screen_share");

        self.transition(SessionStatus::Connecting);
        self.release_host_link();
        self.has_connected = false;
        self.host_nickname.clear();
        self.room_id = Some(room_id.clone());

        if self.reuse_peer(None) {
            let result = self.dial_host(&room_id);
            self.reply(respond_to, result);
        } else {
            self.begin_registration(Registration::Guest { room_id }, None, respond_to);
        }
    }

    fn stop_screen_share(&mut self) {
        self.abandon_pending("stop_screen_share");
        match self.role {
            Some(Role::Host) => self.stop_sharing("stopped by user"),
            Some(Role::Guest) => self.leave_room(),
            None => debug!(
                target: "screenshare.actor.session",
                "Stop requested before any entry operation"
            ),
        }
    }

    fn reset(&mut self) {
        info!(
            target: "screenshare.actor.session",
            role = ?self.role,
            room_id = ?self.room_id,
            "Resetting session"
        );
        self.abandon_pending("reset");
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        self.release_peer();
        self.release_host_link();
        self.role = None;
        self.room_id = None;
        self.host_nickname.clear();
        self.has_connected = false;
        self.projector.clear();
    }

    // ------------------------------------------------------------------
    // Pending operations
    // ------------------------------------------------------------------

    /// Park `respond_to` until the spawned step reports back.
    fn begin(&mut self, awaiting: Awaiting, respond_to: Responder) -> (u64, CancellationToken) {
        self.operations += 1;
        let cancel_token = self.cancel_token.child_token();
        self.pending = Some(PendingOperation {
            id: self.operations,
            awaiting,
            respond_to,
            cancel_token: cancel_token.clone(),
        });
        (self.operations, cancel_token)
    }

    /// Cancel the in-flight entry operation, if any. A capture it already
    /// produced is stopped and its caller gets [`SessionError::Superseded`].
    fn abandon_pending(&mut self, by: &'static str) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        pending.cancel_token.cancel();
        if let Awaiting::Registration(Registration::Host {
            stream: Some(stream),
            ..
        }) = &pending.awaiting
        {
            stream.stop_all();
        }
        info!(
            target: "screenshare.actor.session",
            operation = pending.id,
            superseded_by = by,
            "Abandoning pending operation"
        );
        let _ = pending.respond_to.send(Err(SessionError::Superseded(by)));
    }

    fn take_capture(&mut self, operation: u64) -> Option<(RoomCode, Responder)> {
        match self.pending.take() {
            Some(PendingOperation {
                id,
                awaiting: Awaiting::Capture { room_id },
                respond_to,
                ..
            }) if id == operation => Some((room_id, respond_to)),
            other => {
                self.pending = other;
                None
            }
        }
    }

    fn take_registration(&mut self, operation: u64) -> Option<(Registration, Responder)> {
        match self.pending.take() {
            Some(PendingOperation {
                id,
                awaiting: Awaiting::Registration(registration),
                respond_to,
                ..
            }) if id == operation => Some((registration, respond_to)),
            other => {
                self.pending = other;
                None
            }
        }
    }

    fn on_capture_finished(&mut self, operation: u64, result: Result<MediaStream, CaptureError>) {
        let Some((room_id, respond_to)) = self.take_capture(operation) else {
            debug!(
                target: "screenshare.actor.session",
                operation = operation,
                "Discarding capture of an abandoned operation"
            );
            if let Ok(stream) = result {
                stream.stop_all();
            }
            return;
        };

        let stream = match result {
            Ok(stream) if stream.primary_video().is_some() => stream,
            Ok(stream) => {
                stream.stop_all();
                let e = SessionError::Capture(CaptureError::NoVideoTrack);
                self.fail(&e);
                self.reply(respond_to, Err(e));
                return;
            }
            Err(e) => {
                let e = SessionError::Capture(e);
                self.fail(&e);
                self.reply(respond_to, Err(e));
                return;
            }
        };

        let identity = room_id.peer_id();
        if self.reuse_peer(Some(&identity)) {
            self.attach_share(room_id, stream);
            self.reply(respond_to, Ok(()));
        } else {
            self.begin_registration(
                Registration::Host {
                    room_id,
                    stream: Some(stream),
                },
                Some(identity),
                respond_to,
            );
        }
    }

    fn on_peer_opened(&mut self, operation: u64, result: Result<PeerLink, TransportError>) {
        let Some((registration, respond_to)) = self.take_registration(operation) else {
            debug!(
                target: "screenshare.actor.session",
                operation = operation,
                "Discarding peer handle of an abandoned operation"
            );
            if let Ok(link) = result {
                link.handle.destroy();
            }
            return;
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                if let Registration::Host {
                    stream: Some(stream),
                    ..
                } = registration
                {
                    stream.stop_all();
                }
                let e = SessionError::Registration(e);
                self.fail(&e);
                self.reply(respond_to, Err(e));
                return;
            }
        };

        info!(
            target: "screenshare.actor.session",
            peer_id = %link.handle.id(),
            "Peer handle open"
        );
        self.peer = Some(ActivePeer {
            handle: link.handle,
            events: link.events,
        });

        let result = match registration {
            Registration::Host {
                room_id,
                stream: None,
            } => {
                self.enter_room(room_id);
                Ok(())
            }
            Registration::Host {
                room_id,
                stream: Some(stream),
            } => {
                self.attach_share(room_id, stream);
                Ok(())
            }
            Registration::Guest { room_id } => self.dial_host(&room_id),
        };
        self.reply(respond_to, result);
    }

    // ------------------------------------------------------------------
    // Peer connection lifecycle
    // ------------------------------------------------------------------

    /// Whether the current handle can be kept: live, and registered under
    /// `identity` when one is given.
    fn reuse_peer(&self, identity: Option<&PeerId>) -> bool {
        let Some(active) = &self.peer else {
            return false;
        };
        let handle = &active.handle;
        let identity_matches = match identity {
            Some(id) => handle.id() == id,
            None => true,
        };
        let reusable = identity_matches && !handle.is_destroyed() && !handle.is_disconnected();
        if reusable {
            debug!(
                target: "screenshare.actor.session",
                peer_id = %handle.id(),
                "Reusing peer handle"
            );
        }
        reusable
    }

    /// Destroy the current handle and register a new one in the background.
    fn begin_registration(
        &mut self,
        registration: Registration,
        identity: Option<PeerId>,
        respond_to: Responder,
    ) {
        self.release_peer();

        let (operation, cancel_token) =
            self.begin(Awaiting::Registration(registration), respond_to);
        debug!(
            target: "screenshare.actor.session",
            operation = operation,
            "Registering with relay"
        );
        let network = Arc::clone(&self.network);
        let options = self.config.peer_options();
        let sender = self.self_sender.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = network.open(identity, &options) => result,
                () = cancel_token.cancelled() => return,
            };
            post_result(&sender, SessionMessage::PeerOpened { operation, result }).await;
        });
    }

    /// Destroy the current handle and everything bound to it.
    fn release_peer(&mut self) {
        let Some(active) = self.peer.take() else {
            return;
        };

        info!(
            target: "screenshare.actor.session",
            peer_id = %active.handle.id(),
            guests = self.guests.count(),
            "Destroying peer handle"
        );
        for guest in self.guests.drain() {
            self.drop_guest(guest, "peer handle replaced");
        }
        self.release_host_link();
        self.guests.close_calls();
        active.handle.destroy();
    }

    fn on_peer_closed(&mut self) {
        warn!(target: "screenshare.actor.session", "Peer handle closed");
        self.release_peer();
        self.transition(SessionStatus::Disconnected);
    }

    fn enter_room(&mut self, room_id: RoomCode) {
        self.room_id = Some(room_id);
        if self.local_stream.is_none() {
            self.transition(SessionStatus::Setup);
        }
    }

    /// Open the control channel to the room's host.
    fn dial_host(&mut self, room_id: &RoomCode) -> Result<(), SessionError> {
        let dialed = match &self.peer {
            Some(active) => active.handle.connect(&room_id.peer_id()),
            None => Err(TransportError::Destroyed),
        };
        match dialed {
            Ok(channel) => {
                debug!(
                    target: "screenshare.actor.session",
                    room_id = %room_id,
                    channel_id = %channel.id(),
                    "Dialing host"
                );
                self.host_channel = Some(channel);
                Ok(())
            }
            Err(e) => {
                let e = SessionError::Transport(e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Media session (host)
    // ------------------------------------------------------------------

    /// Share a fresh capture in `room_id` and call every registered guest,
    /// including guests who joined while the capture prompt was open.
    fn attach_share(&mut self, room_id: RoomCode, stream: MediaStream) {
        info!(
            target: "screenshare.actor.session",
            room_id = %room_id,
            stream_id = %stream.id(),
            guests = self.guests.count(),
            "Sharing started"
        );
        self.room_id = Some(room_id);
        self.watch_capture_end(&stream);
        self.local_stream = Some(stream);
        self.transition(SessionStatus::Connected);

        for guest_id in self.guests.ids() {
            self.call_guest(&guest_id);
        }
    }

    /// Stop local tracks and close every call leg. Guests and the peer
    /// handle stay so the room survives.
    fn stop_sharing(&mut self, reason: &str) {
        if let Some(stream) = self.local_stream.take() {
            let stopped = stream.stop_all();
            info!(
                target: "screenshare.actor.session",
                stream_id = %stream.id(),
                tracks_stopped = stopped,
                reason = reason,
                "Sharing stopped"
            );
        }
        let closed = self.guests.close_calls();
        if closed > 0 {
            debug!(
                target: "screenshare.actor.session",
                calls_closed = closed,
                "Closed call legs"
            );
        }
        self.transition(SessionStatus::Setup);
    }

    /// Post `CaptureEnded` when the stream's primary video track ends.
    fn watch_capture_end(&self, stream: &MediaStream) {
        let Some(track) = stream.primary_video().cloned() else {
            return;
        };
        let stream_id = stream.id().to_string();
        let sender = self.self_sender.clone();
        let cancel_token = self.cancel_token.child_token();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = track.ended() => {
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender.send(SessionMessage::CaptureEnded { stream_id }).await;
                    }
                }
            }
        });
    }

    fn on_capture_ended(&mut self, stream_id: &str) {
        let current = self
            .local_stream
            .as_ref()
            .is_some_and(|stream| stream.id() == stream_id);
        if current {
            self.stop_sharing("capture ended");
        } else {
            debug!(
                target: "screenshare.actor.session",
                stream_id = %stream_id,
                "Ignoring end of a capture that is no longer shared"
            );
        }
    }

    /// Place the outbound call to one guest, unless one is already up.
    fn call_guest(&mut self, guest_id: &PeerId) {
        let (Some(active), Some(stream)) = (&self.peer, &self.local_stream) else {
            return;
        };
        if self.guests.has_call(guest_id) {
            debug!(
                target: "screenshare.actor.session",
                guest_id = %guest_id,
                "Guest already has a call leg"
            );
            return;
        }

        match active.handle.call(guest_id, stream) {
            Ok(call) => {
                metrics::record_call_placed();
                debug!(
                    target: "screenshare.actor.session",
                    guest_id = %guest_id,
                    call_id = %call.id(),
                    "Calling guest"
                );
                if let Err(call) = self.guests.attach_call(guest_id, call) {
                    call.close();
                }
            }
            Err(e) => {
                metrics::record_call_failure();
                warn!(
                    target: "screenshare.actor.session",
                    guest_id = %guest_id,
                    error = %e,
                    "Call to guest failed"
                );
                if let Some(guest) = self.guests.remove(guest_id) {
                    self.drop_guest(guest, "call failed");
                }
            }
        }
    }

    fn drop_guest(&mut self, guest: RemovedGuest, reason: &str) {
        let entry = guest.close();
        info!(
            target: "screenshare.actor.session",
            guest_id = %entry.id,
            reason = reason,
            guest_count = self.guests.count(),
            "Guest left"
        );
        metrics::record_guest_event("left");
        self.projector.guest_left(&entry.id);
    }

    // ------------------------------------------------------------------
    // Guest side
    // ------------------------------------------------------------------

    fn leave_room(&mut self) {
        info!(
            target: "screenshare.actor.session",
            room_id = ?self.room_id,
            "Leaving room"
        );
        self.release_host_link();
        self.release_peer();
        self.has_connected = false;
        self.transition(SessionStatus::Disconnected);
    }

    /// Close the host channel and the inbound call.
    fn release_host_link(&mut self) {
        if let Some(call) = self.inbound_call.take() {
            call.close();
        }
        if let Some(channel) = self.host_channel.take() {
            channel.close();
        }
        self.remote_stream = None;
    }

    fn is_host_channel(&self, channel_id: ChannelId) -> bool {
        self.host_channel
            .as_ref()
            .is_some_and(|channel| channel.id() == channel_id)
    }

    fn is_inbound_call(&self, call_id: CallId) -> bool {
        self.inbound_call
            .as_ref()
            .is_some_and(|call| call.id() == call_id)
    }

    fn host_peer_id(&self) -> Option<PeerId> {
        self.room_id.as_ref().map(RoomCode::peer_id)
    }

    // ------------------------------------------------------------------
    // Peer events
    // ------------------------------------------------------------------

    fn handle_peer_event(&mut self, event: PeerEvent) {
        debug!(
            target: "screenshare.actor.session",
            event = event.name(),
            role = ?self.role,
            "Peer event"
        );

        match event {
            PeerEvent::IncomingCall(call) => self.on_incoming_call(call),
            PeerEvent::IncomingConnection(channel) => self.on_incoming_connection(channel),
            PeerEvent::CallStream { call_id, stream } => self.on_call_stream(call_id, stream),
            PeerEvent::CallClosed { call_id } => self.on_call_closed(call_id),
            PeerEvent::CallError { call_id, error } => self.on_call_error(call_id, error),
            PeerEvent::ChannelOpen { channel_id } => self.on_channel_open(channel_id),
            PeerEvent::ChannelData {
                channel_id,
                payload,
            } => self.on_channel_data(channel_id, &payload),
            PeerEvent::ChannelClosed { channel_id } => self.on_channel_closed(channel_id),
            PeerEvent::ChannelError { channel_id, error } => {
                self.on_channel_error(channel_id, error);
            }
            PeerEvent::Disconnected => {
                warn!(target: "screenshare.actor.session", "Lost connection to relay");
                self.transition(SessionStatus::Disconnected);
            }
            PeerEvent::Closed => self.on_peer_closed(),
            PeerEvent::Error(error) => self.fail(&SessionError::Transport(error)),
        }
    }

    fn on_incoming_call(&mut self, call: Box<dyn MediaCall>) {
        match self.role {
            Some(Role::Guest) => self.accept_host_call(call),
            Some(Role::Host) => self.answer_guest_call(call),
            None => call.close(),
        }
    }

    fn accept_host_call(&mut self, call: Box<dyn MediaCall>) {
        if self.host_peer_id().as_ref() != Some(call.remote_peer()) {
            warn!(
                target: "screenshare.actor.session",
                caller = %call.remote_peer(),
                "Rejecting call from a peer that is not the room host"
            );
            call.close();
            return;
        }

        // Never attach two calls to the same sink.
        if let Some(previous) = self.inbound_call.take() {
            debug!(
                target: "screenshare.actor.session",
                call_id = %previous.id(),
                "Closing previous call leg"
            );
            previous.close();
        }
        self.remote_stream = None;

        if let Err(e) = call.answer(None) {
            call.close();
            self.fail(&SessionError::Transport(e));
            return;
        }

        debug!(
            target: "screenshare.actor.session",
            call_id = %call.id(),
            "Answered host call"
        );
        self.inbound_call = Some(call);
        self.transition(SessionStatus::Connecting);
    }

    fn answer_guest_call(&mut self, call: Box<dyn MediaCall>) {
        let remote = call.remote_peer().clone();
        let stream = match &self.local_stream {
            Some(stream) if self.guests.contains(&remote) => stream,
            _ => {
                debug!(
                    target: "screenshare.actor.session",
                    caller = %remote,
                    "Declining inbound call"
                );
                call.close();
                return;
            }
        };

        if let Err(e) = call.answer(Some(stream)) {
            warn!(
                target: "screenshare.actor.session",
                guest_id = %remote,
                error = %e,
                "Failed to answer guest call"
            );
            call.close();
            return;
        }
        match self.guests.attach_call(&remote, call) {
            Ok(Some(previous)) => previous.close(),
            Ok(None) => {}
            Err(call) => call.close(),
        }
    }

    fn on_incoming_connection(&mut self, channel: Box<dyn DataChannel>) {
        match self.role {
            Some(Role::Host) => {
                let (entry, previous) = self.guests.insert(channel);
                if let Some(previous) = previous {
                    previous.close();
                }
                info!(
                    target: "screenshare.actor.session",
                    guest_id = %entry.id,
                    guest_count = self.guests.count(),
                    "Guest connected"
                );
                metrics::record_guest_event("joined");
                self.projector.guest_joined(&entry);

                if self.local_stream.is_some() {
                    self.call_guest(&entry.id);
                }
            }
            Some(Role::Guest)
                if self.host_channel.is_none()
                    && self.host_peer_id().as_ref() == Some(channel.remote_peer()) =>
            {
                self.host_channel = Some(channel);
            }
            _ => {
                debug!(
                    target: "screenshare.actor.session",
                    remote = %channel.remote_peer(),
                    "Declining data connection"
                );
                channel.close();
            }
        }
    }

    fn on_call_stream(&mut self, call_id: CallId, stream: MediaStream) {
        if self.role != Some(Role::Guest) || !self.is_inbound_call(call_id) {
            debug!(
                target: "screenshare.actor.session",
                call_id = %call_id,
                "Ignoring stream for a call this session does not hold"
            );
            return;
        }
        if self
            .remote_stream
            .as_ref()
            .is_some_and(|current| current.id() == stream.id())
        {
            return;
        }

        info!(
            target: "screenshare.actor.session",
            call_id = %call_id,
            stream_id = %stream.id(),
            "Remote stream attached"
        );
        self.projector.stream_received(&stream);
        self.remote_stream = Some(stream);
        self.has_connected = true;
        self.transition(SessionStatus::Connected);
    }

    fn on_call_closed(&mut self, call_id: CallId) {
        match self.role {
            Some(Role::Host) => {
                if let Some(guest_id) = self.guests.detach_call(call_id) {
                    debug!(
                        target: "screenshare.actor.session",
                        guest_id = %guest_id,
                        call_id = %call_id,
                        "Call leg closed"
                    );
                }
            }
            Some(Role::Guest) if self.is_inbound_call(call_id) => {
                self.inbound_call = None;
                self.remote_stream = None;
                if self.has_connected {
                    info!(
                        target: "screenshare.actor.session",
                        call_id = %call_id,
                        "Host paused sharing"
                    );
                    self.transition(SessionStatus::Waiting);
                }
            }
            _ => {}
        }
    }

    fn on_call_error(&mut self, call_id: CallId, error: TransportError) {
        match self.role {
            // Scoped to the one guest; the host stays up.
            Some(Role::Host) => {
                if let Some(guest) = self.guests.remove_by_call(call_id) {
                    metrics::record_call_failure();
                    warn!(
                        target: "screenshare.actor.session",
                        call_id = %call_id,
                        error = %error,
                        "Call leg failed"
                    );
                    self.drop_guest(guest, "call failed");
                }
            }
            Some(Role::Guest) if self.is_inbound_call(call_id) => {
                if let Some(call) = self.inbound_call.take() {
                    call.close();
                }
                self.remote_stream = None;
                self.fail(&SessionError::Transport(error));
            }
            _ => {}
        }
    }

    fn on_channel_open(&mut self, channel_id: ChannelId) {
        let message = match ControlMessage::nickname(self.local_nickname.clone()).to_value() {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    target: "screenshare.actor.session",
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to encode nickname"
                );
                return;
            }
        };
        match self.role {
            Some(Role::Host) => {
                if let Some(channel) = self.guests.channel(channel_id) {
                    if let Err(e) = channel.send(message) {
                        warn!(
                            target: "screenshare.actor.session",
                            guest_id = %channel.remote_peer(),
                            error = %e,
                            "Failed to send nickname to guest"
                        );
                    }
                }
            }
            Some(Role::Guest) if self.is_host_channel(channel_id) => {
                let sent = self
                    .host_channel
                    .as_ref()
                    .map_or(Ok(()), |channel| channel.send(message));
                match sent {
                    Ok(()) => debug!(
                        target: "screenshare.actor.session",
                        channel_id = %channel_id,
                        "Connected to host, nickname sent"
                    ),
                    Err(e) => self.fail(&SessionError::Transport(e)),
                }
            }
            _ => {}
        }
    }

    fn on_channel_data(&mut self, channel_id: ChannelId, payload: &Value) {
        let message = match ControlMessage::from_value(payload) {
            Ok(message) => message,
            Err(ProtocolError::UnknownType(kind)) => {
                debug!(
                    target: "screenshare.actor.session",
                    channel_id = %channel_id,
                    message_type = %kind,
                    "Ignoring unknown control message"
                );
                return;
            }
            Err(e) => {
                warn!(
                    target: "screenshare.actor.session",
                    channel_id = %channel_id,
                    error = %e,
                    "Dropping malformed control message"
                );
                return;
            }
        };

        let ControlMessage::Nickname { nickname } = message;
        match self.role {
            Some(Role::Host) => {
                if let Some(entry) = self.guests.rename(channel_id, &nickname) {
                    info!(
                        target: "screenshare.actor.session",
                        guest_id = %entry.id,
                        nickname = %entry.nickname,
                        "Guest nickname received"
                    );
                    metrics::record_guest_event("renamed");
                    self.projector.guest_joined(&entry);
                }
            }
            Some(Role::Guest) if self.is_host_channel(channel_id) => {
                let nickname = nickname.trim();
                if !nickname.is_empty() {
                    info!(
                        target: "screenshare.actor.session",
                        nickname = %nickname,
                        "Host nickname received"
                    );
                    self.host_nickname = nickname.to_string();
                }
            }
            _ => {}
        }
    }

    fn on_channel_closed(&mut self, channel_id: ChannelId) {
        match self.role {
            Some(Role::Host) => {
                if let Some(guest) = self.guests.remove_by_channel(channel_id) {
                    self.drop_guest(guest, "channel closed");
                }
            }
            Some(Role::Guest) if self.is_host_channel(channel_id) => {
                info!(
                    target: "screenshare.actor.session",
                    channel_id = %channel_id,
                    "Host closed the room"
                );
                self.release_host_link();
                self.transition(SessionStatus::Disconnected);
            }
            _ => {}
        }
    }

    fn on_channel_error(&mut self, channel_id: ChannelId, error: TransportError) {
        match self.role {
            Some(Role::Host) => {
                if let Some(guest) = self.guests.remove_by_channel(channel_id) {
                    warn!(
                        target: "screenshare.actor.session",
                        guest_id = %guest.entry.id,
                        error = %error,
                        "Guest channel failed"
                    );
                    self.drop_guest(guest, "channel error");
                }
            }
            Some(Role::Guest) if self.is_host_channel(channel_id) => {
                // Without the control channel the host link is gone.
                self.release_host_link();
                self.fail(&SessionError::Transport(error));
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Status and publication
    // ------------------------------------------------------------------

    fn claim_role(&mut self, requested: Role) -> Result<(), SessionError> {
        match self.role {
            Some(current) if current != requested => {
                warn!(
                    target: "screenshare.actor.session",
                    current = %current,
                    requested = %requested,
                    "Entry operation for the other role"
                );
                Err(SessionError::RoleConflict { current, requested })
            }
            _ => {
                self.role = Some(requested);
                Ok(())
            }
        }
    }

    fn role_label(&self) -> &'static str {
        self.role.map_or("none", |role| role.as_str())
    }

    fn transition(&mut self, status: SessionStatus) {
        if self.projector.set(status) {
            metrics::record_status_transition(self.role_label(), status.as_str());
            self.publish();
        }
    }

    fn fail(&mut self, error: &SessionError) {
        metrics::record_session_error(error.kind());
        warn!(
            target: "screenshare.actor.session",
            error = %error,
            kind = error.kind().as_str(),
            "Operation failed"
        );
        if self.projector.fail(&error.client_message()) {
            metrics::record_status_transition(self.role_label(), SessionStatus::Error.as_str());
        }
        self.publish();
    }

    /// Publish a fresh snapshot if anything visible changed.
    fn publish(&self) {
        let guests = self.guests.roster();
        if self.role == Some(Role::Host) {
            metrics::set_guests_connected(guests.count());
        }
        let snapshot = SessionSnapshot {
            role: self.role,
            room_id: self.room_id.clone(),
            status: self.projector.current(),
            peer_id: self.peer.as_ref().map(|active| active.handle.id().clone()),
            local_nickname: self.local_nickname.clone(),
            host_nickname: self.host_nickname.clone(),
            guests,
            sharing: self.local_stream.is_some(),
            receiving: self.remote_stream.is_some(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn state(&self) -> SessionState {
        SessionState {
            snapshot: self.snapshot_tx.borrow().clone(),
            live_calls: self.guests.live_calls() + usize::from(self.inbound_call.is_some()),
            mailbox_depth: self.mailbox.current_depth(),
            messages_processed: self.mailbox.messages_processed(),
        }
    }

    /// Release everything on exit, without UI callbacks.
    fn shutdown(&mut self) {
        self.abandon_pending("shutdown");
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        for guest in self.guests.drain() {
            guest.close();
        }
        self.release_host_link();
        if let Some(active) = self.peer.take() {
            active.handle.destroy();
        }
        self.publish();
    }
}

/// Deliver a spawned task's result, releasing it if the actor is gone.
async fn post_result(sender: &mpsc::WeakSender<SessionMessage>, message: SessionMessage) {
    match sender.upgrade() {
        Some(sender) => {
            if let Err(mpsc::error::SendError(message)) = sender.send(message).await {
                release_unclaimed(message);
            }
        }
        None => release_unclaimed(message),
    }
}

/// Stop or destroy what an undelivered task result carries.
fn release_unclaimed(message: SessionMessage) {
    match message {
        SessionMessage::CaptureFinished {
            result: Ok(stream), ..
        } => {
            stream.stop_all();
        }
        SessionMessage::PeerOpened {
            result: Ok(link), ..
        } => link.handle.destroy(),
        _ => {}
    }
}

/// Next event from the live handle; pending forever when there is none.
async fn next_peer_event(peer: &mut Option<ActivePeer>) -> Option<PeerEvent> {
    match peer {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}
