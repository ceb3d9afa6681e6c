//! Deadline-bound polling
//!
//! Every wait in the verifier goes through [`poll_until`]: the deadline is
//! fixed when the wait starts and checked after every unsuccessful attempt.
//! Sleeps are the only suspension points, so dropping the future (operator
//! interrupt) takes effect between polls.

use crate::error::{Result, VerifyError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Timeout and interval of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum time from the start of the wait
    pub timeout: Duration,
    /// Pause between unsuccessful checks
    pub interval: Duration,
}

impl PollPolicy {
    /// Create a policy
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Run `check` until it yields a value, an error, or the deadline passes
///
/// `check` returns `Ok(None)` to keep waiting. On deadline, fails with
/// `VerifyError::Timeout` naming `waiting_for`.
pub async fn poll_until<T, F, Fut>(waiting_for: &str, policy: PollPolicy, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts: u64 = 0;

    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(VerifyError::timeout(waiting_for, policy.timeout));
        }

        debug!(
            waiting_for,
            attempts,
            elapsed_secs = (now - started).as_secs_f64(),
            "Still waiting"
        );

        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_value() {
        let mut calls = 0;
        let value = poll_until(
            "thing",
            PollPolicy::new(Duration::from_secs(10), Duration::from_secs(1)),
            || {
                calls += 1;
                let seen = calls;
                async move { Ok((seen == 3).then_some(seen)) }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let started = Instant::now();
        let err = poll_until::<(), _, _>(
            "never",
            PollPolicy::new(Duration::from_secs(60), Duration::from_secs(15)),
            || async { Ok(None) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VerifyError::Timeout { ref waiting_for, .. } if waiting_for == "never"));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stops_polling() {
        let err = poll_until::<(), _, _>(
            "broken",
            PollPolicy::new(Duration::from_secs(60), Duration::from_secs(1)),
            || async { Err(VerifyError::unexpected("boom")) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VerifyError::UnexpectedResponse(_)));
    }
}
