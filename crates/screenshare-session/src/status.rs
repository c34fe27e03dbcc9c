//! Externally observable status and the UI callback surface.
//!
//! [`StatusProjector`] is the only place callbacks are invoked. It fires
//! `on_status_change` only when the status actually changes, and always
//! fires `on_error` with a non-empty message before the `Error` status
//! that accompanies it.
//!
//! Callbacks run on the session task. They must return quickly and must
//! not call back into the session synchronously.

use crate::media::MediaStream;
use crate::registry::GuestEntry;
use common::types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Message used if an error reaches the projector without one.
const FALLBACK_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Status shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Host capturing and registering, or guest dialing out.
    Connecting,
    /// Media flowing in the direction of the role.
    Connected,
    /// Guest left, or the relay connection was lost.
    Disconnected,
    /// An operation failed. Retrying the operation is allowed.
    Error,
    /// Guest only: was connected, host paused sharing.
    Waiting,
    /// Host only: room open, nothing shared.
    Setup,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Setup => "setup",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type StatusCallback = Box<dyn Fn(SessionStatus) + Send + Sync>;
pub type StreamCallback = Box<dyn Fn(MediaStream) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(String) + Send + Sync>;
pub type GuestJoinedCallback = Box<dyn Fn(GuestEntry) + Send + Sync>;
pub type GuestLeftCallback = Box<dyn Fn(PeerId) + Send + Sync>;

/// UI hooks. Every hook is optional.
#[derive(Default)]
pub struct SessionCallbacks {
    on_status_change: Option<StatusCallback>,
    on_stream_received: Option<StreamCallback>,
    on_error: Option<ErrorCallback>,
    on_guest_joined: Option<GuestJoinedCallback>,
    on_guest_left: Option<GuestLeftCallback>,
}

impl SessionCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_status_change(mut self, f: impl Fn(SessionStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Box::new(f));
        self
    }

    /// Guest only. Fires once per remote stream attachment.
    #[must_use]
    pub fn on_stream_received(mut self, f: impl Fn(MediaStream) + Send + Sync + 'static) -> Self {
        self.on_stream_received = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Host only. Fires on insert and again on every nickname update.
    #[must_use]
    pub fn on_guest_joined(mut self, f: impl Fn(GuestEntry) + Send + Sync + 'static) -> Self {
        self.on_guest_joined = Some(Box::new(f));
        self
    }

    /// Host only.
    #[must_use]
    pub fn on_guest_left(mut self, f: impl Fn(PeerId) + Send + Sync + 'static) -> Self {
        self.on_guest_left = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_stream_received", &self.on_stream_received.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_guest_joined", &self.on_guest_joined.is_some())
            .field("on_guest_left", &self.on_guest_left.is_some())
            .finish()
    }
}

/// Current status plus the hooks that report it.
#[derive(Debug)]
pub(crate) struct StatusProjector {
    callbacks: SessionCallbacks,
    current: Option<SessionStatus>,
}

impl StatusProjector {
    pub(crate) fn new(callbacks: SessionCallbacks) -> Self {
        Self {
            callbacks,
            current: None,
        }
    }

    pub(crate) fn current(&self) -> Option<SessionStatus> {
        self.current
    }

    /// Move to `status`. Returns false (and stays quiet) if already there.
    pub(crate) fn set(&mut self, status: SessionStatus) -> bool {
        if self.current == Some(status) {
            return false;
        }

        debug!(
            target: "screenshare.status",
            from = ?self.current,
            to = %status,
            "Status transition"
        );
        self.current = Some(status);
        if let Some(cb) = &self.callbacks.on_status_change {
            cb(status);
        }
        true
    }

    /// Report `message` through `on_error`, then move to `Error`.
    /// Returns whether the status changed.
    pub(crate) fn fail(&mut self, message: &str) -> bool {
        let message = if message.trim().is_empty() {
            FALLBACK_ERROR_MESSAGE
        } else {
            message
        };

        warn!(target: "screenshare.status", error = %message, "Session error");
        if let Some(cb) = &self.callbacks.on_error {
            cb(message.to_string());
        }
        self.set(SessionStatus::Error)
    }

    pub(crate) fn stream_received(&self, stream: &MediaStream) {
        if let Some(cb) = &self.callbacks.on_stream_received {
            cb(stream.clone());
        }
    }

    pub(crate) fn guest_joined(&self, entry: &GuestEntry) {
        if let Some(cb) = &self.callbacks.on_guest_joined {
            cb(entry.clone());
        }
    }

    pub(crate) fn guest_left(&self, guest_id: &PeerId) {
        if let Some(cb) = &self.callbacks.on_guest_left {
            cb(guest_id.clone());
        }
    }

    /// Forget the current status without notifying anyone.
    pub(crate) fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Status(SessionStatus),
        Error(String),
    }

    fn recording_projector() -> (StatusProjector, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let status_log = Arc::clone(&seen);
        let error_log = Arc::clone(&seen);
        let callbacks = SessionCallbacks::new()
            .on_status_change(move |s| status_log.lock().unwrap().push(Seen::Status(s)))
            .on_error(move |m| error_log.lock().unwrap().push(Seen::Error(m)));
        (StatusProjector::new(callbacks), seen)
    }

    #[test]
    fn test_set_only_fires_on_change() {
        let (mut projector, seen) = recording_projector();

        assert!(projector.set(SessionStatus::Setup));
        assert!(!projector.set(SessionStatus::Setup));
        assert!(projector.set(SessionStatus::Connecting));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Status(SessionStatus::Setup),
                Seen::Status(SessionStatus::Connecting)
            ]
        );
        assert_eq!(projector.current(), Some(SessionStatus::Connecting));
    }

    #[test]
    fn test_fail_reports_message_before_status() {
        let (mut projector, seen) = recording_projector();

        projector.fail("Screen sharing permission was denied");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Error("Screen sharing permission was denied".to_string()),
                Seen::Status(SessionStatus::Error)
            ]
        );
    }

    #[test]
    fn test_fail_never_reports_empty_message() {
        let (mut projector, seen) = recording_projector();

        projector.fail("  ");

        let first = seen.lock().unwrap().first().cloned().unwrap();
        assert_eq!(first, Seen::Error(FALLBACK_ERROR_MESSAGE.to_string()));
    }

    #[test]
    fn test_repeated_failures_report_each_message() {
        let (mut projector, seen) = recording_projector();

        projector.fail("first");
        projector.fail("second");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Error("first".to_string()),
                Seen::Status(SessionStatus::Error),
                Seen::Error("second".to_string()),
            ]
        );
    }

    #[test]
    fn test_clear_is_silent() {
        let (mut projector, seen) = recording_projector();
        projector.set(SessionStatus::Connected);
        projector.clear();

        assert_eq!(projector.current(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(projector.set(SessionStatus::Connected));
    }

    #[test]
    fn test_missing_callbacks_are_fine() {
        let mut projector = StatusProjector::new(SessionCallbacks::default());
        projector.set(SessionStatus::Setup);
        projector.fail("boom");
        projector.guest_left(&PeerId::new("guest"));
        assert_eq!(projector.current(), Some(SessionStatus::Error));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Waiting).unwrap(),
            "\"waiting\""
        );
        assert_eq!(SessionStatus::Setup.to_string(), "setup");
    }

    #[test]
    fn test_callbacks_debug_shows_presence() {
        let callbacks = SessionCallbacks::new().on_error(|_| {});
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("on_error: true"));
        assert!(debug.contains("on_guest_left: false"));
    }
}
