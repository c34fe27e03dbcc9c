//! Common configuration types for screenshare components.

use serde::{Deserialize, Serialize};

/// Default tracing directive when neither `RUST_LOG` nor an override is set.
pub const DEFAULT_LOG_FILTER: &str = "screenshare_session=info";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive (e.g. "screenshare_session=debug")
    pub filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}
