//! Observability for the screenshare session.
//!
//! Logging goes through `tracing` with per-component targets:
//!
//! | Target | Emitted by |
//! |--------|------------|
//! | `screenshare.actor.session` | session actor lifecycle and transport events |
//! | `screenshare.actor.mailbox` | mailbox depth warnings |
//! | `screenshare.registry` | guest registry changes |
//! | `screenshare.status` | status transitions and surfaced errors |
//!
//! Metrics go through the `metrics` facade (see [`metrics`]). Installing a
//! recorder is left to the embedding application.

pub mod metrics;

use common::config::LoggingConfig;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.filter` when set.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (plain, json) = if config.json_logs {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
}
