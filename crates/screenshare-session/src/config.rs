//! Session configuration.
//!
//! Loaded from `SCREENSHARE_*` environment variables. Every variable is
//! optional; an empty environment yields [`Config::default`].

use crate::media::{
    CaptureConstraints, MAX_CAPTURE_FRAME_RATE, MAX_CAPTURE_HEIGHT, MAX_CAPTURE_WIDTH,
};
use crate::transport::PeerOptions;
use common::config::{LoggingConfig, DEFAULT_LOG_FILTER};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Public STUN servers used when none are configured.
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Session manager configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// STUN/TURN URLs handed to every new peer handle.
    pub ice_servers: Vec<String>,

    /// Capture width ceiling (default: 1920).
    pub max_width: u32,

    /// Capture height ceiling (default: 1080).
    pub max_height: u32,

    /// Capture frame-rate ceiling (default: 30).
    pub max_frame_rate: u32,

    /// Capture system audio with the display (default: true).
    pub capture_audio: bool,

    pub logging: LoggingConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // TURN URLs can embed credentials.
        let ice: Vec<&str> = self
            .ice_servers
            .iter()
            .map(|url| {
                if url.starts_with("stun:") {
                    url.as_str()
                } else {
                    "[REDACTED]"
                }
            })
            .collect();
        f.debug_struct("Config")
            .field("ice_servers", &ice)
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .field("max_frame_rate", &self.max_frame_rate)
            .field("capture_audio", &self.capture_audio)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(ToString::to_string).collect(),
            max_width: MAX_CAPTURE_WIDTH,
            max_height: MAX_CAPTURE_HEIGHT,
            max_frame_rate: MAX_CAPTURE_FRAME_RATE,
            capture_audio: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ice_servers = match vars.get("SCREENSHARE_ICE_SERVERS") {
            Some(raw) => parse_ice_servers(raw)?,
            None => DEFAULT_ICE_SERVERS.iter().map(ToString::to_string).collect(),
        };

        let max_width = parse_bounded(vars, "SCREENSHARE_MAX_WIDTH", MAX_CAPTURE_WIDTH)?;
        let max_height = parse_bounded(vars, "SCREENSHARE_MAX_HEIGHT", MAX_CAPTURE_HEIGHT)?;
        let max_frame_rate =
            parse_bounded(vars, "SCREENSHARE_MAX_FRAME_RATE", MAX_CAPTURE_FRAME_RATE)?;

        let capture_audio = parse_bool(vars, "SCREENSHARE_CAPTURE_AUDIO", true)?;

        let filter = vars
            .get("SCREENSHARE_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let json_logs = parse_bool(vars, "SCREENSHARE_LOG_JSON", false)?;

        Ok(Config {
            ice_servers,
            max_width,
            max_height,
            max_frame_rate,
            capture_audio,
            logging: LoggingConfig { filter, json_logs },
        })
    }

    /// Bounds for the platform capture request.
    #[must_use]
    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            max_width: self.max_width,
            max_height: self.max_height,
            max_frame_rate: self.max_frame_rate,
            audio: self.capture_audio,
        }
    }

    /// Options for new peer handles.
    #[must_use]
    pub fn peer_options(&self) -> PeerOptions {
        PeerOptions {
            ice_servers: self.ice_servers.clone(),
        }
    }
}

fn parse_ice_servers(raw: &str) -> Result<Vec<String>, ConfigError> {
    let servers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();

    if servers.is_empty() {
        return Err(ConfigError::InvalidValue(
            "SCREENSHARE_ICE_SERVERS must list at least one server".to_string(),
        ));
    }
    if let Some(bad) = servers
        .iter()
        .find(|s| !(s.starts_with("stun:") || s.starts_with("turn:") || s.starts_with("turns:")))
    {
        return Err(ConfigError::InvalidValue(format!(
            "SCREENSHARE_ICE_SERVERS entry {bad:?} must use stun:, turn: or turns:"
        )));
    }
    Ok(servers)
}

fn parse_bounded(
    vars: &HashMap<String, String>,
    name: &str,
    max: u32,
) -> Result<u32, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(max);
    };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw:?}: {e}")))?;
    if value == 0 || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{name} must be true or false, got {v:?}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config, Config::default());
        assert_eq!(
            config.ice_servers,
            vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string()
            ]
        );
        assert_eq!(config.capture_constraints(), CaptureConstraints::default());
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
        assert!(!config.logging.json_logs);
    }

    #[test]
    fn test_from_vars_custom_values() {
        let config = Config::from_vars(&vars(&[
            (
                "SCREENSHARE_ICE_SERVERS",
                "stun:stun.example.org:3478, turn:turn.example.org",
            ),
            ("SCREENSHARE_MAX_WIDTH", "1280"),
            ("SCREENSHARE_MAX_HEIGHT", "720"),
            ("SCREENSHARE_MAX_FRAME_RATE", "15"),
            ("SCREENSHARE_CAPTURE_AUDIO", "false"),
            ("SCREENSHARE_LOG_FILTER", "screenshare_session=debug"),
            ("SCREENSHARE_LOG_JSON", "1"),
        ]))
        .expect("Config should load");

        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(
            config.peer_options().ice_servers,
            vec!["stun:stun.example.org:3478", "turn:turn.example.org"]
        );
        let constraints = config.capture_constraints();
        assert_eq!(constraints.max_width, 1280);
        assert_eq!(constraints.max_height, 720);
        assert_eq!(constraints.max_frame_rate, 15);
        assert!(!constraints.audio);
        assert_eq!(config.logging.filter, "screenshare_session=debug");
        assert!(config.logging.json_logs);
    }

    #[test]
    fn test_capture_bounds_enforced() {
        for (name, value) in [
            ("SCREENSHARE_MAX_WIDTH", "3840"),
            ("SCREENSHARE_MAX_HEIGHT", "2160"),
            ("SCREENSHARE_MAX_FRAME_RATE", "60"),
            ("SCREENSHARE_MAX_FRAME_RATE", "0"),
            ("SCREENSHARE_MAX_WIDTH", "wide"),
        ] {
            let result = Config::from_vars(&vars(&[(name, value)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_ice_servers_validated() {
        assert!(Config::from_vars(&vars(&[("SCREENSHARE_ICE_SERVERS", " , ")])).is_err());
        assert!(
            Config::from_vars(&vars(&[("SCREENSHARE_ICE_SERVERS", "http://stun.example")]))
                .is_err()
        );
    }

    #[test]
    fn test_bool_parsing() {
        assert!(Config::from_vars(&vars(&[("SCREENSHARE_CAPTURE_AUDIO", "TRUE")]))
            .unwrap()
            .capture_audio);
        assert!(Config::from_vars(&vars(&[("SCREENSHARE_LOG_JSON", "yes")])).is_err());
    }

    #[test]
    fn test_debug_redacts_turn_urls() {
        let config = Config::from_vars(&vars(&[(
            "SCREENSHARE_ICE_SERVERS",
            "stun:stun.example.org,turn:user:secret@turn.example.org",
        )]))
        .unwrap();

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("stun:stun.example.org"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("secret"));
    }
}
