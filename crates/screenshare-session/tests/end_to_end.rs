//! Full rooms: one host, several guests, nickname exchange and the
//! join-before-share flow.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;

use common::types::{RoomCode, ROOM_CODE_LEN};
use screenshare_session::registry::GUEST_PLACEHOLDER_NICKNAME;
use screenshare_session::{AllUsers, SessionStatus};
use screenshare_test_utils::{test_room, LoopbackRelay, RecordedEvent, TestSession};

#[tokio::test]
async fn test_guest_joins_before_host_shares() {
    let relay = LoopbackRelay::new();
    let host = TestSession::spawn(&relay);
    host.handle.set_nickname("HostUser").await.unwrap();
    host.handle
        .initialize_host_room(RoomCode::parse("ABCD1234").unwrap())
        .await
        .unwrap();
    assert_eq!(host.handle.status(), Some(SessionStatus::Setup));

    let guest = TestSession::joined_guest(&relay, "GuestUser").await;
    let guest_peer = guest.handle.peer_id().unwrap();
    host.wait_until("guest nickname", |s| {
        s.guests.nicknames() == vec!["GuestUser".to_string()]
    })
    .await;
    guest.settle().await;

    // No stream yet: the guest is still dialing.
    assert_eq!(guest.handle.status(), Some(SessionStatus::Connecting));
    assert!(guest.recorder.streams().is_empty());

    host.handle
        .start_screen_share(RoomCode::parse("ABCD1234").unwrap())
        .await
        .unwrap();

    guest.wait_for_status(SessionStatus::Connected).await;
    assert_eq!(guest.recorder.streams().len(), 1);
    assert_eq!(guest.handle.host_nickname(), "HostUser");
    let joined = host.recorder.joined();
    assert!(joined
        .iter()
        .any(|g| g.id == guest_peer && g.nickname == "GuestUser"));
    assert_eq!(host.handle.status(), Some(SessionStatus::Connected));

    guest.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_nickname_exchange_is_symmetric() {
    let relay = LoopbackRelay::new();
    let host = TestSession::sharing_host(&relay, "Alice").await;
    let guest = TestSession::joined_guest(&relay, "Bob").await;
    let guest_peer = guest.handle.peer_id().unwrap();

    guest
        .wait_until("host nickname", |s| s.host_nickname == "Alice")
        .await;
    let snapshot = host
        .wait_until("guest nickname", |s| {
            s.guests.get(&guest_peer).is_some_and(|g| g.nickname == "Bob")
        })
        .await;

    // The placeholder comes first or not at all.
    let nicknames: Vec<String> = host
        .recorder
        .joined()
        .into_iter()
        .filter(|g| g.id == guest_peer)
        .map(|g| g.nickname)
        .collect();
    assert!(
        nicknames == vec![GUEST_PLACEHOLDER_NICKNAME.to_string(), "Bob".to_string()]
            || nicknames == vec!["Bob".to_string()],
        "unexpected nickname sequence {nicknames:?}"
    );

    // Renaming keeps the original join time.
    let entries: Vec<_> = host
        .recorder
        .joined()
        .into_iter()
        .filter(|g| g.id == guest_peer)
        .collect();
    assert!(entries
        .iter()
        .all(|g| Some(g.joined_at) == snapshot.guests.get(&guest_peer).map(|e| e.joined_at)));

    guest.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_all_users_from_both_sides() {
    let relay = LoopbackRelay::new();
    let host = TestSession::sharing_host(&relay, "HostUser").await;
    let first = TestSession::joined_guest(&relay, "Ann").await;
    let second = TestSession::joined_guest(&relay, "Ben").await;

    host.wait_until("both nicknames", |s| {
        let mut names = s.guests.nicknames();
        names.sort();
        names == vec!["Ann".to_string(), "Ben".to_string()]
    })
    .await;
    first
        .wait_until("host nickname", |s| !s.host_nickname.is_empty())
        .await;

    let mut host_view = host.handle.all_users();
    host_view.guests.sort();
    assert_eq!(
        host_view,
        AllUsers {
            host: "HostUser".to_string(),
            guests: vec!["Ann".to_string(), "Ben".to_string()],
        }
    );
    assert_eq!(
        first.handle.all_users(),
        AllUsers {
            host: "HostUser".to_string(),
            guests: vec!["Ann".to_string()],
        }
    );

    first.shutdown().await;
    second.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_every_guest_sees_pause_and_resume() {
    let relay = LoopbackRelay::new();
    let host = TestSession::sharing_host(&relay, "HostUser").await;
    let mut guests = Vec::new();
    for name in ["One", "Two", "Three"] {
        guests.push(TestSession::joined_guest(&relay, name).await);
    }
    for guest in &guests {
        guest.wait_for_status(SessionStatus::Connected).await;
    }

    host.handle.stop_screen_share().await.unwrap();
    for guest in &guests {
        guest.wait_for_status(SessionStatus::Waiting).await;
    }
    assert_eq!(relay.live_calls(), 0);
    assert_eq!(host.handle.guest_count(), 3);

    host.handle.start_screen_share(test_room()).await.unwrap();
    for guest in &guests {
        guest.wait_for_status(SessionStatus::Connected).await;
        assert_eq!(guest.recorder.streams().len(), 2);
        let ids: HashSet<String> = guest
            .recorder
            .streams()
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
    }
    assert_eq!(relay.live_calls(), 3);

    for guest in guests {
        guest.shutdown().await;
    }
    host.shutdown().await;
}

#[tokio::test]
async fn test_host_callbacks_track_joins_and_leaves() {
    let relay = LoopbackRelay::new();
    let host = TestSession::sharing_host(&relay, "HostUser").await;
    let guest = TestSession::joined_guest(&relay, "GuestUser").await;
    let guest_peer = guest.handle.peer_id().unwrap();
    host.wait_until("renamed", |s| {
        s.guests.nicknames() == vec!["GuestUser".to_string()]
    })
    .await;

    guest.handle.stop_screen_share().await.unwrap();
    host.wait_for_guests(0).await;

    let guest_events: Vec<RecordedEvent> = host
        .recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, RecordedEvent::GuestJoined(_) | RecordedEvent::GuestLeft(_)))
        .collect();
    assert_eq!(guest_events.len(), 3);
    assert_eq!(
        guest_events.last(),
        Some(&RecordedEvent::GuestLeft(guest_peer))
    );

    guest.shutdown().await;
    host.shutdown().await;
}

#[tokio::test]
async fn test_generated_room_codes() {
    let relay = LoopbackRelay::new();
    let host = TestSession::spawn(&relay);

    let codes: HashSet<String> = (0..1000)
        .map(|_| host.handle.generate_room_id().to_string())
        .collect();

    assert_eq!(codes.len(), 1000);
    for code in &codes {
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    host.shutdown().await;
}
