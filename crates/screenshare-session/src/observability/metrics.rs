//! Metrics definitions for the screenshare session.
//!
//! All metrics follow Prometheus naming conventions:
//! - `screenshare_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `role`: host, guest, none
//! - `status`: the six session statuses
//! - `kind`: the error taxonomy (8 values)
//! - `event`: joined, renamed, left

use crate::errors::ErrorKind;
use metrics::{counter, gauge};

/// Count a status change.
///
/// Metric: `screenshare_status_transitions_total`
/// Labels: `role`, `status`
pub fn record_status_transition(role: &'static str, status: &'static str) {
    counter!("screenshare_status_transitions_total", "role" => role, "status" => status)
        .increment(1);
}

/// Set the number of guests in the host's registry.
///
/// Metric: `screenshare_guests_connected`
pub fn set_guests_connected(count: usize) {
    // usize to f64 conversion is safe for realistic guest counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("screenshare_guests_connected").set(count as f64);
}

/// Count an outbound call placed to a guest.
///
/// Metric: `screenshare_calls_placed_total`
pub fn record_call_placed() {
    counter!("screenshare_calls_placed_total").increment(1);
}

/// Count a call leg that failed (the guest is dropped).
///
/// Metric: `screenshare_call_failures_total`
pub fn record_call_failure() {
    counter!("screenshare_call_failures_total").increment(1);
}

/// Count an error surfaced to the UI.
///
/// Metric: `screenshare_errors_total`
/// Labels: `kind`
pub fn record_session_error(kind: ErrorKind) {
    counter!("screenshare_errors_total", "kind" => kind.as_str()).increment(1);
}

/// Count a guest registry change.
///
/// Metric: `screenshare_guest_events_total`
/// Labels: `event` (joined, renamed, left)
pub fn record_guest_event(event: &'static str) {
    counter!("screenshare_guest_events_total", "event" => event).increment(1);
}

/// Set the session actor's mailbox depth.
///
/// Metric: `screenshare_mailbox_depth`
pub fn set_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("screenshare_mailbox_depth").set(depth as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        record_status_transition("host", "setup");
        set_guests_connected(3);
        record_call_placed();
        record_call_failure();
        record_session_error(ErrorKind::Call);
        record_guest_event("joined");
        set_mailbox_depth(0);
    }

    #[test]
    fn test_metrics_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_status_transition("guest", "connected");
            record_status_transition("guest", "connected");
            set_guests_connected(2);
            record_session_error(ErrorKind::CaptureDenied);
        });

        let metrics = snapshotter.snapshot().into_vec();
        let find = |name: &str| {
            metrics
                .iter()
                .find(|(key, _, _, _)| key.key().name() == name)
                .map(|(key, _, _, value)| (key.key().labels().count(), value))
        };

        assert_eq!(
            find("screenshare_status_transitions_total"),
            Some((2, &DebugValue::Counter(2)))
        );
        assert!(matches!(
            find("screenshare_guests_connected"),
            Some((0, &DebugValue::Gauge(v))) if (v.into_inner() - 2.0).abs() < f64::EPSILON
        ));
        assert_eq!(
            find("screenshare_errors_total"),
            Some((1, &DebugValue::Counter(1)))
        );
    }
}
