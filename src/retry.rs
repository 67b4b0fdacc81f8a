//! Retry policy for the alert dispatcher's webhook delivery.
//!
//! Only transport-shaped failures are retried (spec §4.7: 3 attempts,
//! exponential backoff clamped to [2s, 10s]); signature/validation failures
//! fail fast. Mirrors the teacher's `retry.rs` shape, closed over
//! `MonitorError` instead of a generic inner error.

use crate::error::MonitorError;
use crate::jitter::Jitter;
use crate::{Backoff, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&MonitorError) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// 3 attempts, exponential backoff with multiplier 1, floored and
    /// capped at [2s, 10s] (spec §4.7), retrying only transport failures.
    pub fn webhook_default() -> Self {
        RetryPolicyBuilder::new()
            .max_attempts(3)
            .expect("3 > 0")
            .backoff(
                Backoff::exponential(Duration::from_secs(2)).with_max(Duration::from_secs(10)),
            )
            .should_retry(MonitorError::is_retryable_transport)
            .build()
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, MonitorError>
    where
        T: Send,
        Fut: Future<Output = Result<T, MonitorError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !(self.should_retry)(&err) || attempts >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.jitter.apply(self.backoff.delay(attempts));
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&MonitorError) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(2)).with_max(Duration::from_secs(10)),
            jitter: Jitter::None,
            should_retry: Arc::new(MonitorError::is_retryable_transport),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Randomize each computed delay to avoid many callers retrying in lockstep
    /// (spec §9 is silent on this; defaults to `Jitter::None` so `webhook_default`
    /// keeps the exact `[2s, 10s]` schedule spec §4.7 specifies).
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MonitorError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_first_attempt_without_sleeping() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .expect("valid")
            .with_sleeper(sleeper.clone())
            .build();

        let result = policy.execute(|| async { Ok::<_, MonitorError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(sleeper.calls(), 0);
    }

    #[tokio::test]
    async fn retries_transport_failures_up_to_max_attempts() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .expect("valid")
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .with_sleeper(InstantSleeper)
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MonitorError::AlertTransport { attempts: 1, detail: "503".into() })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transport_errors() {
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .expect("valid")
            .with_sleeper(InstantSleeper)
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MonitorError::SignatureInvalid)
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn webhook_default_clamps_backoff_to_two_and_ten_seconds() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .expect("valid")
            .backoff(Backoff::exponential(Duration::from_secs(2)).with_max(Duration::from_secs(10)))
            .should_retry(MonitorError::is_retryable_transport)
            .with_sleeper(sleeper.clone())
            .build();

        let _ = policy
            .execute(|| async {
                Err::<(), _>(MonitorError::EngineUnavailable { detail: "down".into() })
            })
            .await;

        let calls = sleeper.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Duration::from_secs(2));
        assert_eq!(calls[1], Duration::from_secs(4));
    }

    #[tokio::test]
    async fn full_jitter_keeps_delay_within_backoff_bound() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .expect("valid")
            .backoff(Backoff::constant(Duration::from_secs(4)))
            .jitter(crate::jitter::Jitter::full())
            .with_sleeper(sleeper.clone())
            .build();

        let _ = policy
            .execute(|| async {
                Err::<(), _>(MonitorError::EngineUnavailable { detail: "down".into() })
            })
            .await;

        for call in sleeper.calls() {
            assert!(call <= Duration::from_secs(4));
        }
    }
}
