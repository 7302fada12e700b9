//! Bounded retry of operations that hit transient connection loss.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use keeper_types::KeeperError;
use keeper_types::constants::DEFAULT_RETRY_ATTEMPTS;
use keeper_types::constants::DEFAULT_RETRY_DELAY_MS;
use tracing::debug;
use tracing::error;

use crate::config::RetryConfig;

/// How the retry policy treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Connection hiccup; worth another attempt.
    Transient,
    /// The session is gone; retrying cannot help.
    SessionExpired,
    /// Anything else; returned untouched.
    Permanent,
}

/// Errors that can be classified by [`RetryPolicy`].
pub trait Retryable {
    /// Classify this error.
    fn retry_class(&self) -> RetryClass;
}

impl Retryable for KeeperError {
    fn retry_class(&self) -> RetryClass {
        match self {
            KeeperError::ConnectionLoss { .. } => RetryClass::Transient,
            KeeperError::SessionExpired => RetryClass::SessionExpired,
            _ => RetryClass::Permanent,
        }
    }
}

/// Retries an operation on transient connection loss with a fixed delay.
///
/// Only wrap operations whose re-execution is idempotent or self-correcting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The last transient error is returned once attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.retry_class() {
                RetryClass::Permanent => return Err(err),
                RetryClass::SessionExpired => {
                    error!(operation, "session expired; clean up state and start a new session");
                    return Err(err);
                }
                RetryClass::Transient if attempt >= self.max_attempts => {
                    error!(operation, attempts = attempt, error = %err, "giving up after repeated connection loss");
                    return Err(err);
                }
                RetryClass::Transient => {
                    debug!(
                        operation,
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "connection lost, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    fn loss() -> KeeperError {
        KeeperError::ConnectionLoss {
            operation: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = policy
            .run("flaky", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(loss())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_the_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = policy
            .run("down", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(loss())
            })
            .await;

        assert!(result.unwrap_err().is_connection_loss());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn session_expiry_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = policy
            .run("expired", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KeeperError::SessionExpired)
            })
            .await;

        assert_eq!(result.unwrap_err(), KeeperError::SessionExpired);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_errors_propagate_untouched() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = policy
            .run("missing", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KeeperError::NoNode { path: "/x".into() })
            })
            .await;

        assert_eq!(result.unwrap_err(), KeeperError::NoNode { path: "/x".into() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
