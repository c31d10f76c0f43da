//! Fixed-interval retry loop used while provisioning the index

use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::error;

/// Delay between two attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Something able to wait, so tests can observe delays instead of sleeping
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How often, and how many times, to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between two attempts
    pub interval: Duration,

    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever every `interval`
    pub fn forever(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(DEFAULT_RETRY_INTERVAL)
    }
}

/// Run `operation` until it succeeds or the policy gives up
///
/// Returns the value and the number of attempts it took. Every failure is
/// logged; no delay follows the last allowed attempt. Errors that are not
/// transport failures (see [`StorageError::is_transport`]) end the loop at once.
pub async fn retry_with_policy<T, F, Fut>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> StorageResult<(T, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation(attempts).await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if !e.is_transport() {
                    error!(attempt = attempts, error = %e, "Giving up on Elasticsearch");
                    return Err(e);
                }

                error!(attempt = attempts, error = %e, "Unable to get connected to Elasticsearch");

                if policy.exhausted(attempts) {
                    return Err(StorageError::RetriesExhausted {
                        attempts,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        sleeper.sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let sleeper = RecordingSleeper::default();
        let (value, attempts) = retry_with_policy(RetryPolicy::default(), &sleeper, |attempt| async move {
            if attempt < 3 {
                Err(StorageError::ConnectionFailed("refused".to_string()))
            } else {
                Ok(attempt * 10)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 30);
        assert_eq!(attempts, 3);
        assert_eq!(*sleeper.slept.lock(), vec![Duration::from_secs(1); 2]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::forever(Duration::from_millis(5)).with_max_attempts(2);

        let result: StorageResult<((), u32)> = retry_with_policy(policy, &sleeper, |_| async {
            Err(StorageError::ConnectionFailed("refused".to_string()))
        })
        .await;

        match result {
            Err(StorageError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("refused"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sleeper.slept.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_local_error_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result: StorageResult<((), u32)> = retry_with_policy(RetryPolicy::default(), &sleeper, |_| {
            calls += 1;
            async { Err(StorageError::Stopped) }
        })
        .await;

        assert!(matches!(result, Err(StorageError::Stopped)));
        assert_eq!(calls, 1);
        assert!(sleeper.slept.lock().is_empty());
    }
}
