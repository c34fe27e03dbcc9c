//! Session fixtures wired to the loopback relay.

use crate::eventual::{wait_for, Settle};
use crate::fake_capture::FakeCapture;
use crate::loopback::LoopbackRelay;
use crate::recorder::CallbackRecorder;
use common::types::RoomCode;
use screenshare_session::{Config, SessionActor, SessionHandle, SessionSnapshot, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Room code used by most tests.
pub const TEST_ROOM: &str = "ABCD1234";

#[must_use]
pub fn test_room() -> RoomCode {
    RoomCode::parse(TEST_ROOM).unwrap()
}

/// A running session plus everything a test needs to observe it.
#[derive(Debug)]
pub struct TestSession {
    pub handle: SessionHandle,
    pub recorder: CallbackRecorder,
    pub capture: FakeCapture,
    pub task: JoinHandle<()>,
}

impl TestSession {
    /// Spawn a session on `relay` with a fresh fake capture.
    #[must_use]
    pub fn spawn(relay: &LoopbackRelay) -> Self {
        Self::spawn_with(relay, FakeCapture::new(), Config::default())
    }

    #[must_use]
    pub fn spawn_with(relay: &LoopbackRelay, capture: FakeCapture, config: Config) -> Self {
        let recorder = CallbackRecorder::new();
        let (handle, task) = SessionActor::spawn(
            config,
            Arc::new(relay.clone()),
            Arc::new(capture.clone()),
            recorder.callbacks(),
            CancellationToken::new(),
        );
        Self {
            handle,
            recorder,
            capture,
            task,
        }
    }

    /// Spawn a host that has set `nickname` and started sharing `TEST_ROOM`.
    pub async fn sharing_host(relay: &LoopbackRelay, nickname: &str) -> Self {
        let host = Self::spawn(relay);
        host.handle.set_nickname(nickname).await.unwrap();
        host.handle.start_screen_share(test_room()).await.unwrap();
        host
    }

    /// Spawn a guest that has set `nickname` and joined `TEST_ROOM`.
    pub async fn joined_guest(relay: &LoopbackRelay, nickname: &str) -> Self {
        let guest = Self::spawn(relay);
        guest.handle.set_nickname(nickname).await.unwrap();
        guest.handle.join_screen_share(test_room()).await.unwrap();
        guest
    }

    /// Wait until the published snapshot satisfies `condition`.
    ///
    /// # Panics
    ///
    /// Panics if it does not within the room settle time.
    pub async fn wait_until(
        &self,
        what: &str,
        condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        match tokio::time::timeout(Settle::Room.timeout(), self.handle.wait_until(condition))
            .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => panic!("{what}: {e}"),
            Err(_) => panic!("{what}: timed out, last snapshot {:?}", self.handle.snapshot()),
        }
    }

    pub async fn wait_for_status(&self, status: SessionStatus) -> SessionSnapshot {
        self.wait_until(&format!("status {status}"), |s| s.status == Some(status))
            .await
    }

    pub async fn wait_for_guests(&self, count: usize) -> SessionSnapshot {
        self.wait_until(&format!("{count} guests"), |s| s.guests.count() == count)
            .await
    }

    /// Wait until the recorder has seen at least `count` callbacks matching
    /// `predicate`.
    pub async fn wait_for_callbacks(
        &self,
        what: &str,
        count: usize,
        mut predicate: impl FnMut(&crate::recorder::RecordedEvent) -> bool,
    ) {
        let recorder = self.recorder.clone();
        wait_for(Settle::Room, what, || {
            recorder.events().iter().filter(|&e| predicate(e)).count() >= count
        })
        .await;
    }

    /// Round-trip the mailbox: every command sent before now has been
    /// handled. Peer events arrive on their own queue and are not ordered
    /// by this; use [`TestSession::settle`] or a snapshot wait for those.
    pub async fn flush(&self) {
        self.handle.get_state().await.unwrap();
    }

    /// Give queued relay events time to be handled. Only needed to assert
    /// that something did not happen.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.flush().await;
    }

    /// Cancel the actor and wait for it to exit.
    pub async fn shutdown(self) {
        self.handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), self.task)
            .await
            .expect("session did not stop")
            .expect("session task panicked");
    }
}
