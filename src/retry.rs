// =============================================================================
// RETRY MODULE
// =============================================================================
// Bounded retry around a transport call.
//
// NOTES:
// - Only transient failures are retried (HTTP >= 500, network errors)
// - Validation failures and 4xx responses fail on the first attempt
// - Backoff is flat: every retry waits the same `backoff`
// - When attempts run out the caller gets SyncError::RetryExhausted with
//   the last error's message
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::metrics;

/// How many times to try, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,

    /// Wait between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `label` names the call in logs and metrics (usually the backend path).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                warn!(call = label, attempts = attempt, error = %err, "Giving up after retries");
                return Err(SyncError::RetryExhausted {
                    attempts: attempt,
                    message: err.message(),
                });
            }
            Err(err) => {
                warn!(
                    call = label,
                    attempt,
                    error = %err,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    "Transient failure, retrying"
                );
                metrics::record_retry(label);
                sleep(policy.backoff).await;
            }
        }
    }
}
