//! Retry helpers for assertions that span several session actors.
//!
//! Events cross at least one mailbox per hop, so cross-session state
//! settles shortly after the triggering call returns.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How long a condition may take to settle.
#[derive(Debug, Clone, Copy)]
pub enum Settle {
    /// One session reacting to its own events.
    Local,
    /// Host and guests exchanging events through the relay.
    Room,
}

impl Settle {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        match self {
            Settle::Local => Duration::from_secs(1),
            Settle::Room => Duration::from_secs(3),
        }
    }

    fn initial_delay(self) -> Duration {
        Duration::from_millis(2)
    }
}

/// Poll `condition` with exponential backoff until it holds or the timeout
/// for `settle` passes.
pub async fn assert_eventually<F, Fut>(settle: Settle, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = settle.timeout();
    let mut delay = settle.initial_delay();
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Condition not met within {timeout:?} (settle: {settle:?})"
            ));
        }

        sleep(delay).await;

        delay = (delay * 2).min(Duration::from_millis(100));
        let remaining = timeout.saturating_sub(elapsed);
        if delay > remaining {
            delay = remaining;
        }
    }
}

/// Synchronous-condition shorthand for [`assert_eventually`].
///
/// # Panics
///
/// Panics with `what` if the condition never holds.
pub async fn wait_for(settle: Settle, what: &str, mut condition: impl FnMut() -> bool) {
    if let Err(e) = assert_eventually(settle, || {
        let ok = condition();
        async move { ok }
    })
    .await
    {
        panic!("{what}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_assert_eventually_succeeds_immediately() {
        let result = assert_eventually(Settle::Local, || async { true }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_assert_eventually_succeeds_after_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result = assert_eventually(Settle::Local, move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_assert_eventually_times_out() {
        let result = assert_eventually(Settle::Local, || async { false }).await;
        assert!(result.unwrap_err().contains("Condition not met"));
    }
}
