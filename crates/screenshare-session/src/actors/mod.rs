//! Session actor and its handle.
//!
//! ```text
//! SessionHandle (cloneable, UI side)
//!   ├── mpsc mailbox ──────────────► SessionActor (one task, single writer)
//!   └── watch<SessionSnapshot> ◄───┘   ├── owns the one PeerHandle + its event stream
//!                                      ├── owns local capture (host) / remote stream (guest)
//!                                      ├── owns GuestRegistry (host)
//!                                      └── owns StatusProjector (UI callbacks)
//! ```

pub mod messages;
pub mod metrics;
pub mod session;

pub use messages::{AllUsers, Role, SessionMessage, SessionSnapshot, SessionState};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use session::{SessionActor, SessionHandle};
