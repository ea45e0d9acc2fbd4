//! Fixed-interval, fixed-budget retry helper.
//!
//! Used by launch-then-poll discovery and by the heartbeat-triggered
//! reconnect. Every attempt is preceded by one `interval` sleep, so a
//! policy of `(1s, 1)` means "try once, one second from now".

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{AppError, Result};

/// Interval and budget for a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Total number of attempts.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Construct a policy.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Run `attempt` until it succeeds or the policy's budget is exhausted.
///
/// Returns the first `Ok` value. When every attempt fails, the error from
/// the last attempt is returned.
///
/// # Errors
///
/// - The last attempt's error once the budget is spent.
/// - `AppError::NotFound` if the budget is zero or `cancel` fires before
///   any attempt has produced an error.
pub async fn retry_until<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;

    for n in 1..=policy.max_attempts {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(attempt = n, "retry cancelled");
                break;
            }
            () = tokio::time::sleep(policy.interval) => {}
        }

        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!(attempt = n, max = policy.max_attempts, %err, "retry attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AppError::NotFound("retry budget exhausted".into())))
}
