//! Common utilities and types shared across screenshare components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for the control-channel wire protocol
pub mod protocol;
