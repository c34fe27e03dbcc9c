//! Records every UI callback a session fires, in order.

use common::types::PeerId;
use screenshare_session::media::MediaStream;
use screenshare_session::{GuestEntry, SessionCallbacks, SessionStatus};
use std::sync::{Arc, Mutex};

/// One callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Status(SessionStatus),
    Stream(MediaStream),
    Error(String),
    GuestJoined(GuestEntry),
    GuestLeft(PeerId),
}

/// Shared log of callback invocations.
#[derive(Debug, Clone, Default)]
pub struct CallbackRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl CallbackRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks that append to this recorder.
    #[must_use]
    pub fn callbacks(&self) -> SessionCallbacks {
        let status = Arc::clone(&self.events);
        let stream = Arc::clone(&self.events);
        let error = Arc::clone(&self.events);
        let joined = Arc::clone(&self.events);
        let left = Arc::clone(&self.events);
        SessionCallbacks::new()
            .on_status_change(move |s| status.lock().unwrap().push(RecordedEvent::Status(s)))
            .on_stream_received(move |s| stream.lock().unwrap().push(RecordedEvent::Stream(s)))
            .on_error(move |m| error.lock().unwrap().push(RecordedEvent::Error(m)))
            .on_guest_joined(move |g| joined.lock().unwrap().push(RecordedEvent::GuestJoined(g)))
            .on_guest_left(move |id| left.lock().unwrap().push(RecordedEvent::GuestLeft(id)))
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.filter(|e| match e {
            RecordedEvent::Status(s) => Some(*s),
            _ => None,
        })
    }

    #[must_use]
    pub fn last_status(&self) -> Option<SessionStatus> {
        self.statuses().last().copied()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.filter(|e| match e {
            RecordedEvent::Error(m) => Some(m.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn streams(&self) -> Vec<MediaStream> {
        self.filter(|e| match e {
            RecordedEvent::Stream(s) => Some(s.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn joined(&self) -> Vec<GuestEntry> {
        self.filter(|e| match e {
            RecordedEvent::GuestJoined(g) => Some(g.clone()),
            _ => None,
        })
    }

    #[must_use]
    pub fn left(&self) -> Vec<PeerId> {
        self.filter(|e| match e {
            RecordedEvent::GuestLeft(id) => Some(id.clone()),
            _ => None,
        })
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn filter<T>(&self, f: impl FnMut(&RecordedEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().unwrap().iter().filter_map(f).collect()
    }
}
