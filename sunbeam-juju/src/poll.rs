//! Condition polling with a timeout.
//!
//! Used by the single-purpose waits of the helper facade. "Not yet" is an
//! ordinary outcome of a check, never an error.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Result of one condition check that did not succeed.
#[derive(Debug)]
pub enum CondCheckError<E> {
    /// The condition is not true yet; check again after the interval.
    NotYet,
    /// The check failed and polling stops.
    Failed(E),
}

impl<E> From<E> for CondCheckError<E> {
    fn from(error: E) -> Self {
        Self::Failed(error)
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("permanent error")]
    PermanentError(E),
}

/// Poll `check` every `interval` until it returns `Ok`, fails, or `timeout`
/// elapses.
///
/// The first check runs immediately. The timeout is only evaluated between
/// checks, so a check in flight is never interrupted.
pub async fn wait_for_condition<T, E, F, Fut>(
    mut check: F,
    interval: Duration,
    timeout: Duration,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CondCheckError<E>>>,
{
    let start = Instant::now();
    loop {
        match check().await {
            Ok(value) => return Ok(value),
            Err(CondCheckError::Failed(error)) => return Err(PollError::PermanentError(error)),
            Err(CondCheckError::NotYet) => {}
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollError::TimedOut(elapsed));
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_condition_holds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = wait_for_condition(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CondCheckError::<()>::NotYet)
                    } else {
                        Ok("ready")
                    }
                }
            },
            Duration::from_secs(15),
            Duration::from_secs(600),
        )
        .await
        .unwrap();
        assert_eq!(value, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let start = Instant::now();
        let err = wait_for_condition(
            || async { Err::<(), _>(CondCheckError::<()>::NotYet) },
            Duration::from_secs(15),
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::TimedOut(d) if d >= Duration::from_secs(60)));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_polling() {
        let err = wait_for_condition(
            || async { Err::<(), _>(CondCheckError::Failed("gone")) },
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::PermanentError("gone")));
    }
}
