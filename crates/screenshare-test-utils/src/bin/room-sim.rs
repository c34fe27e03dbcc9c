//! Room simulator
//!
//! Runs one host and a configurable number of guests over the loopback
//! relay and logs every step. Useful for watching the session state machine
//! with `RUST_LOG=screenshare=debug`.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Host starts sharing a generated room code
//! 3. `ROOM_SIM_GUESTS` guests join and receive the stream
//! 4. Host pauses sharing, guests move to waiting
//! 5. Host resumes, then one guest leaves
//! 6. Everyone shuts down

use anyhow::{bail, Context, Result};
use screenshare_session::observability::init_tracing;
use screenshare_session::{Config, SessionStatus};
use screenshare_test_utils::{LoopbackRelay, TestSession};
use tracing::info;

const DEFAULT_GUESTS: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.logging).context("failed to initialize tracing")?;

    let guest_count = match std::env::var("ROOM_SIM_GUESTS") {
        Ok(value) => value
            .parse::<usize>()
            .with_context(|| format!("ROOM_SIM_GUESTS must be a number, got {value:?}"))?,
        Err(_) => DEFAULT_GUESTS,
    };

    info!(?config, guest_count, "Starting room simulation");

    let relay = LoopbackRelay::new();
    let host = TestSession::spawn_with(
        &relay,
        screenshare_test_utils::FakeCapture::new(),
        config.clone(),
    );
    host.handle.set_nickname("HostUser").await?;
    let room = host.handle.generate_room_id();
    host.handle.start_screen_share(room.clone()).await?;
    info!(room_id = %room, "Host is sharing");

    let mut guests = Vec::with_capacity(guest_count);
    for n in 0..guest_count {
        let guest = TestSession::spawn_with(
            &relay,
            screenshare_test_utils::FakeCapture::new(),
            config.clone(),
        );
        guest.handle.set_nickname(format!("Guest{}", n + 1)).await?;
        guest.handle.join_screen_share(room.clone()).await?;
        guests.push(guest);
    }

    for guest in &guests {
        guest.wait_for_status(SessionStatus::Connected).await;
    }
    host.wait_for_guests(guest_count).await;
    let users = host.handle.all_users();
    info!(host = %users.host, guests = ?users.guests, "Room is full");

    host.handle.stop_screen_share().await?;
    for guest in &guests {
        guest.wait_for_status(SessionStatus::Waiting).await;
    }
    info!("Host paused, guests waiting");

    host.handle.start_screen_share(room.clone()).await?;
    for guest in &guests {
        guest.wait_for_status(SessionStatus::Connected).await;
    }
    info!("Host resumed");

    if let Some(leaving) = guests.pop() {
        leaving.handle.stop_screen_share().await?;
        host.wait_for_guests(guest_count.saturating_sub(1)).await;
        info!(
            guest_count = host.handle.guest_count(),
            "Guest left"
        );
        leaving.shutdown().await;
    }

    let state = host.handle.get_state().await?;
    if state.snapshot.status != Some(SessionStatus::Connected) {
        bail!("host ended in {:?}", state.snapshot.status);
    }
    info!(
        live_calls = state.live_calls,
        messages_processed = state.messages_processed,
        "Host state"
    );

    for guest in guests {
        guest.shutdown().await;
    }
    host.shutdown().await;
    info!("Room simulation finished");
    Ok(())
}
