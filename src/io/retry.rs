//! Bounded timeout and retry for external fetches.
//!
//! Every attempt runs under its own timeout. Retryable failures back off
//! exponentially (`base * 2^(attempt-1)`) up to `max_attempts`. A timeout
//! ends the loop immediately, which bounds worst-case latency to roughly
//! `max_attempts * timeout` plus backoff.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Timeout and retry settings shared by catalog and asset requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Transient failure (connection reset, 5xx, 429)
    Retryable(E),
    /// Failure that another attempt cannot fix (4xx, bad payload)
    Permanent(E),
}

/// Final failure after the retry loop gives up.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// An attempt exceeded the per-attempt timeout
    Timeout(Duration),
    /// The last attempt failed
    Failed { attempts: u32, error: E },
}

/// Run `op` under `policy`.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(Attempt::Permanent(error))) => {
                return Err(RetryError::Failed {
                    attempts: attempt,
                    error,
                })
            }
            Ok(Err(Attempt::Retryable(error))) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        error,
                    });
                }
                let delay = policy.backoff(attempt);
                debug!(
                    what,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(_) => {
                debug!(what, attempt, timeout = ?policy.timeout, "Attempt timed out, not retrying");
                return Err(RetryError::Timeout(policy.timeout));
            }
        }
    }
}

/// Classify an HTTP status: 5xx and 429 are worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
