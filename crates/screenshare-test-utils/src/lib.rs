//! # Screen-Share Test Utilities
//!
//! Shared fakes and fixtures for exercising `SessionActor` without a real
//! signaling relay or capture device.
//!
//! ## Modules
//!
//! - `loopback` - In-process peer network with failure injection
//! - `fake_capture` - Scriptable screen capture
//! - `recorder` - Records UI callbacks in order
//! - `eventual` - Backoff polling for cross-session assertions
//! - `fixtures` - Spawned sessions (hosts and guests) on a shared relay
//!
//! ## Usage
//!
//! ```rust,ignore
//! use screenshare_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let relay = LoopbackRelay::new();
//!     let host = TestSession::sharing_host(&relay, "HostUser").await;
//!     let guest = TestSession::joined_guest(&relay, "GuestUser").await;
//!
//!     guest.wait_for_status(SessionStatus::Connected).await;
//!     host.wait_for_guests(1).await;
//! }
//! ```

pub mod eventual;
pub mod fake_capture;
pub mod fixtures;
pub mod loopback;
pub mod recorder;

pub use eventual::*;
pub use fake_capture::*;
pub use fixtures::*;
pub use loopback::*;
pub use recorder::*;
