//! Scriptable screen capture.
//!
//! Each successful capture yields a fresh stream with one video track
//! (`screen:N`) and, when audio is requested, one audio track. A held
//! capture keeps its prompt open until the test releases it.

use async_trait::async_trait;
use screenshare_session::media::{
    CaptureConstraints, CaptureError, MediaCapture, MediaStream, MediaTrack, TrackKind,
};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug)]
struct FakeCaptureInner {
    supported: bool,
    with_video: bool,
    fail_next: Option<CaptureError>,
    captures: Vec<MediaStream>,
    prompts_opened: usize,
    last_constraints: Option<CaptureConstraints>,
}

/// Fake [`MediaCapture`] with failure injection.
#[derive(Debug, Clone)]
pub struct FakeCapture {
    inner: Arc<Mutex<FakeCaptureInner>>,
    /// True while prompts stay open.
    held: Arc<watch::Sender<bool>>,
}

impl Default for FakeCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCapture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeCaptureInner {
                supported: true,
                with_video: true,
                fail_next: None,
                captures: Vec::new(),
                prompts_opened: 0,
                last_constraints: None,
            })),
            held: Arc::new(watch::Sender::new(false)),
        }
    }

    /// A platform with no screen capture at all.
    #[must_use]
    pub fn unsupported() -> Self {
        let capture = Self::new();
        capture.inner.lock().unwrap().supported = false;
        capture
    }

    /// Produce audio-only streams from now on.
    #[must_use]
    pub fn without_video(self) -> Self {
        self.inner.lock().unwrap().with_video = false;
        self
    }

    /// Fail the next capture with `error` (e.g. the user dismissed the prompt).
    pub fn fail_next(&self, error: CaptureError) {
        self.inner.lock().unwrap().fail_next = Some(error);
    }

    /// Keep every capture prompt open until [`FakeCapture::release`].
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    /// Answer every held prompt (and later ones immediately).
    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Prompts opened so far, answered or not.
    #[must_use]
    pub fn prompts_opened(&self) -> usize {
        self.inner.lock().unwrap().prompts_opened
    }

    /// Simulate the platform's own "stop sharing" control on the most
    /// recent capture. Returns false if nothing was captured yet.
    pub fn end_last_share(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.captures.last() {
            Some(stream) => {
                for track in stream.video_tracks() {
                    track.stop();
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.inner.lock().unwrap().captures.len()
    }

    #[must_use]
    pub fn last_stream(&self) -> Option<MediaStream> {
        self.inner.lock().unwrap().captures.last().cloned()
    }

    #[must_use]
    pub fn streams(&self) -> Vec<MediaStream> {
        self.inner.lock().unwrap().captures.clone()
    }

    #[must_use]
    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.inner.lock().unwrap().last_constraints
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    fn is_supported(&self) -> bool {
        self.inner.lock().unwrap().supported
    }

    async fn capture(&self, constraints: &CaptureConstraints) -> Result<MediaStream, CaptureError> {
        self.inner.lock().unwrap().prompts_opened += 1;
        let mut held = self.held.subscribe();
        // The sender lives in `self`, so the wait only ends on release.
        let _ = held.wait_for(|held| !held).await;

        let mut inner = self.inner.lock().unwrap();
        inner.last_constraints = Some(*constraints);
        if let Some(error) = inner.fail_next.take() {
            return Err(error);
        }

        let mut tracks = Vec::new();
        if inner.with_video {
            let label = format!("screen:{}", inner.captures.len());
            tracks.push(MediaTrack::new(TrackKind::Video, label));
        }
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "system audio"));
        }
        let stream = MediaStream::new(tracks);
        inner.captures.push(stream.clone());
        Ok(stream)
    }
}
