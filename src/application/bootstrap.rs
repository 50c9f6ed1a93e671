// Retry loop for bootstrap fetches
use std::future::Future;
use std::time::Duration;

use crate::domain::error::FeedError;

pub const DEFAULT_RETRY: Duration = Duration::from_millis(100);

/// Run `attempt` until it succeeds, sleeping `retry` between failures.
///
/// Gives up (returns `None`) only once `alive` reports that the owner is
/// gone. Failures are logged and never surfaced; the chart just keeps
/// showing its loading state.
pub async fn fetch_until_ok<T, F, Fut>(
    what: &str,
    retry: Duration,
    alive: impl Fn() -> bool,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
{
    let mut failures: u32 = 0;

    loop {
        if !alive() {
            tracing::debug!("Owner of {} is gone, abandoning bootstrap", what);
            return None;
        }

        match attempt().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!("Bootstrap of {} succeeded after {} failures", what, failures);
                }
                return Some(value);
            }
            Err(e) => {
                failures += 1;
                // the device is often just rebooting; only complain once in a while
                if failures == 1 || failures % 50 == 0 {
                    tracing::warn!("Could not get {} (attempt {}): {}", what, failures, e);
                } else {
                    tracing::debug!("Could not get {} (attempt {}): {}", what, failures, e);
                }
                tokio::time::sleep(retry).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let value = fetch_until_ok("soc/live", Duration::from_millis(1), || true, || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(FeedError::Transport("connection refused".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(value, Some(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stops_when_owner_is_gone() {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let value: Option<()> = fetch_until_ok(
            "soc/history",
            Duration::from_millis(1),
            || flag.load(Ordering::SeqCst),
            || {
                if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                    alive.store(false, Ordering::SeqCst);
                }
                async { Err(FeedError::Transport("timeout".to_string())) }
            },
        )
        .await;

        assert_eq!(value, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
