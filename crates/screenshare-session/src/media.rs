//! Media session primitives and the screen-capture port.
//!
//! A [`MediaStream`] is a bundle of [`MediaTrack`]s. Tracks end either when
//! this crate stops them or when the platform does (the user pressed the
//! browser's "Stop sharing" control, a window closed). Both look the same
//! to observers of [`MediaTrack::ended`].
//!
//! Capture itself sits behind [`MediaCapture`] so the session can run
//! against a synthetic source in tests.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Upper bound on capture width.
pub const MAX_CAPTURE_WIDTH: u32 = 1920;

/// Upper bound on capture height.
pub const MAX_CAPTURE_HEIGHT: u32 = 1080;

/// Upper bound on capture frame rate.
pub const MAX_CAPTURE_FRAME_RATE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

/// Ready state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// One media track. Clones share the same underlying state.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    state: Arc<watch::Sender<TrackState>>,
}

impl MediaTrack {
    #[must_use]
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn state(&self) -> TrackState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// End the track. Returns false if it had already ended.
    pub fn stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == TrackState::Live {
                *state = TrackState::Ended;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the track has ended, however that happened.
    pub async fn ended(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on Ended.
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

/// A set of tracks delivered or captured together.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    #[must_use]
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// The track whose end means "sharing stopped".
    #[must_use]
    pub fn primary_video(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    /// True while any track is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    /// Stop every track, returning how many were still live.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaStream {}

/// Bounds requested from the platform capture API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_rate: u32,
    /// Capture system audio alongside the display.
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            max_width: MAX_CAPTURE_WIDTH,
            max_height: MAX_CAPTURE_HEIGHT,
            max_frame_rate: MAX_CAPTURE_FRAME_RATE,
            audio: true,
        }
    }
}

/// Screen capture failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// User or policy refused the capture prompt.
    #[error("Screen capture denied: {0}")]
    Denied(String),

    /// Capture was allowed but no source could be opened.
    #[error("Screen capture unavailable: {0}")]
    Unavailable(String),

    /// The platform has no display-capture capability.
    #[error("Screen capture is not supported on this platform")]
    Unsupported,

    /// Capture returned a stream without any video track.
    #[error("Captured stream has no video track")]
    NoVideoTrack,
}

/// Platform screen capture.
#[async_trait]
pub trait MediaCapture: Send + Sync + 'static {
    /// Whether display capture is available at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask the platform for a display (and optionally audio) stream.
    async fn capture(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn screen_stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Video, "screen:0"),
            MediaTrack::new(TrackKind::Audio, "system audio"),
        ])
    }

    #[test]
    fn test_default_constraints_are_bounded() {
        let c = CaptureConstraints::default();
        assert_eq!(c.max_width, 1920);
        assert_eq!(c.max_height, 1080);
        assert_eq!(c.max_frame_rate, 30);
        assert!(c.audio);
    }

    #[test]
    fn test_stream_track_accessors() {
        let stream = screen_stream();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.primary_video().unwrap().label(), "screen:0");
        assert!(stream.is_active());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = MediaTrack::new(TrackKind::Video, "screen:0");
        assert!(track.stop());
        assert!(!track.stop());
        assert_eq!(track.state(), TrackState::Ended);
    }

    #[test]
    fn test_stop_all_counts_live_tracks() {
        let stream = screen_stream();
        stream.audio_tracks().next().unwrap().stop();
        assert_eq!(stream.stop_all(), 1);
        assert!(!stream.is_active());
        assert_eq!(stream.stop_all(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let stream = screen_stream();
        let copy = stream.clone();
        stream.stop_all();
        assert!(!copy.is_active());
        assert_eq!(stream, copy);
    }

    #[tokio::test]
    async fn test_ended_resolves_after_stop() {
        let track = MediaTrack::new(TrackKind::Video, "screen:0");
        let watcher = track.clone();
        let task = tokio::spawn(async move { watcher.ended().await });

        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        track.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ended() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_ended_resolves_immediately_for_ended_track() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        track.stop();
        tokio::time::timeout(Duration::from_millis(100), track.ended())
            .await
            .expect("already ended");
    }
}
