//! Bounded condition polling.
//!
//! Every wait in the harness is tied to an observable predicate and a timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{HarnessError, Result};

/// Default polling interval between predicate evaluations
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Poll `probe` until it yields `Some(value)` or `timeout` elapses.
///
/// The probe runs at least once, even with a zero timeout. Errors from the
/// probe abort the wait immediately.
pub async fn wait_until<T, F, Fut>(operation: &str, timeout: Duration, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    poll_until(operation, timeout, DEFAULT_POLL, &mut probe).await
}

/// Same as [`wait_until`] with an explicit poll interval
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    probe: &mut F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            log::debug!("wait for {} gave up after {:?}", operation, elapsed);
            return Err(HarnessError::Timeout {
                operation: operation.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Poll a boolean condition; `Ok(false)` on timeout instead of an error.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let outcome = wait_until("condition", timeout, || {
        let fut = condition();
        async move { Ok::<_, HarnessError>(fut.await?.then_some(())) }
    })
    .await;

    match outcome {
        Ok(()) => Ok(true),
        Err(HarnessError::Timeout { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_until_returns_first_ready_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = wait_until("counter", Duration::from_secs(2), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, HarnessError>((n >= 2).then_some(n)) }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out_with_operation_name() {
        let err = wait_until::<(), _, _>("dropdown options", Duration::from_millis(30), || async {
            Ok::<_, HarnessError>(None)
        })
        .await
        .unwrap_err();

        match err {
            HarnessError::Timeout {
                operation,
                waited_ms,
            } => {
                assert_eq!(operation, "dropdown options");
                assert_eq!(waited_ms, 30);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_still_probes_once() {
        let ready = wait_until("immediate", Duration::ZERO, || async { Ok::<_, HarnessError>(Some("ok")) })
            .await
            .unwrap();
        assert_eq!(ready, "ok");
    }

    #[tokio::test]
    async fn test_eventually_reports_false_on_timeout() {
        let held = eventually(Duration::from_millis(20), || async { Ok::<_, HarnessError>(false) })
            .await
            .unwrap();
        assert!(!held);
    }
}
