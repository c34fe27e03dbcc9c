//! Mailbox monitoring for the session actor.
//!
//! | Level    | Depth    |
//! |----------|----------|
//! | Normal   | <= 16    |
//! | Warning  | 17-48    |
//! | Critical | > 48     |
//!
//! The mailbox holds UI commands only. Transport events use their own
//! per-handle stream and are not counted here.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox depth thresholds for the session actor.
pub const SESSION_MAILBOX_NORMAL: usize = 16;
pub const SESSION_MAILBOX_WARNING: usize = 48;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// At or below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth and emitting metrics.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Session identifier for log fields.
    actor_id: String,
    depth: AtomicUsize,
    /// Peak mailbox depth since creation.
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::set_mailbox_depth(new_depth);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "screenshare.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = SESSION_MAILBOX_WARNING,
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == SESSION_MAILBOX_NORMAL + 1 => debug!(
                target: "screenshare.actor.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or_default();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_mailbox_depth(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > SESSION_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > SESSION_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}
