//! Semaphore + rate-limited fan-out for parallel work (spec §4.4).

use crate::error::MonitorError;
use crate::rate_limit::AdaptiveRateLimiter;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorStats {
    pub total_executed: u64,
    pub total_failed: u64,
    pub avg_execution_time: Duration,
    pub current_rate_limit: f64,
    pub semaphore_available: usize,
}

pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    total_executed: AtomicU64,
    total_failed: AtomicU64,
    total_exec_millis: AtomicU64,
}

impl BoundedExecutor {
    pub fn new(concurrency_limit: usize, rate_limiter: Arc<AdaptiveRateLimiter>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            rate_limiter,
            total_executed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_exec_millis: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let total_executed = self.total_executed.load(Ordering::Relaxed);
        let total_failed = self.total_failed.load(Ordering::Relaxed);
        let total_millis = self.total_exec_millis.load(Ordering::Relaxed);
        let avg_execution_time = if total_executed == 0 {
            Duration::from_secs(0)
        } else {
            Duration::from_millis(total_millis / total_executed)
        };
        ExecutorStats {
            total_executed,
            total_failed,
            avg_execution_time,
            current_rate_limit: self.rate_limiter.current_rate(),
            semaphore_available: self.semaphore.available_permits(),
        }
    }

    /// Submit one unit of work: rate-limiter acquire, then semaphore acquire,
    /// then await. Always records into counters and releases the semaphore.
    pub async fn execute<T, Fut>(&self, future: Fut) -> Result<T, MonitorError>
    where
        T: Send,
        Fut: Future<Output = Result<T, MonitorError>> + Send,
    {
        self.rate_limiter.acquire().await;
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("BoundedExecutor semaphore is never closed");

        let start = Instant::now();
        let result = future.await;
        let elapsed = start.elapsed();
        drop(permit);

        self.total_executed.fetch_add(1, Ordering::Relaxed);
        self.total_exec_millis.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        match &result {
            Ok(_) => self.rate_limiter.record_success(elapsed),
            Err(_) => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                self.rate_limiter.record_failure();
            }
        }

        result
    }

    /// Parallel submission through the same gates. Individual failures do
    /// not abort siblings; failed items are filtered from the result.
    pub async fn execute_many<T, Fut, I>(&self, futures: I) -> Vec<T>
    where
        T: Send,
        Fut: Future<Output = Result<T, MonitorError>> + Send,
        I: IntoIterator<Item = Fut>,
    {
        let submitted = futures.into_iter().map(|fut| self.execute(fut));
        futures::future::join_all(submitted).await.into_iter().filter_map(Result::ok).collect()
    }

    /// Same concurrency discipline as [`Self::execute_many`]. With
    /// `preserve_order = true`, results align with input positions (failed
    /// slots hold `None`). Otherwise, results come back in completion order.
    pub async fn map_bounded<T, Fut, I>(&self, futures: I, preserve_order: bool) -> Vec<Option<T>>
    where
        T: Send,
        Fut: Future<Output = Result<T, MonitorError>> + Send,
        I: IntoIterator<Item = Fut>,
    {
        if preserve_order {
            let submitted = futures.into_iter().map(|fut| self.execute(fut));
            futures::future::join_all(submitted).await.into_iter().map(Result::ok).collect()
        } else {
            let mut unordered: FuturesUnordered<_> =
                futures.into_iter().map(|fut| self.execute(fut)).collect();
            let mut out = Vec::new();
            while let Some(result) = unordered.next().await {
                out.push(result.ok());
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::sleeper::InstantSleeper;
    use std::sync::atomic::AtomicUsize;

    fn executor(limit: usize) -> BoundedExecutor {
        let limiter = Arc::new(AdaptiveRateLimiter::with_clock_and_sleeper(
            Arc::new(MonotonicClock::default()),
            Arc::new(InstantSleeper),
        ));
        BoundedExecutor::new(limit, limiter)
    }

    #[tokio::test]
    async fn execute_reports_success_and_failure_counters() {
        let exec = executor(4);
        let _ = exec.execute(async { Ok::<_, MonitorError>(1) }).await;
        let _ = exec
            .execute(async { Err::<i32, _>(MonitorError::EngineUnavailable { detail: "x".into() }) })
            .await;

        let stats = exec.stats();
        assert_eq!(stats.total_executed, 2);
        assert_eq!(stats.total_failed, 1);
    }

    #[tokio::test]
    async fn execute_many_filters_failures() {
        let exec = executor(4);
        let futures = (0..5).map(|i| async move {
            if i % 2 == 0 {
                Ok::<_, MonitorError>(i)
            } else {
                Err(MonitorError::EngineUnavailable { detail: "odd".into() })
            }
        });
        let results = exec.execute_many(futures).await;
        assert_eq!(results, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn map_bounded_preserves_order_with_none_for_failures() {
        let exec = executor(4);
        let futures = (0..5).map(|i| async move {
            if i == 2 {
                Err(MonitorError::EngineUnavailable { detail: "x".into() })
            } else {
                Ok::<_, MonitorError>(i)
            }
        });
        let results = exec.map_bounded(futures, true).await;
        assert_eq!(results, vec![Some(0), Some(1), None, Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_cap() {
        let exec = executor(8);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let futures = (0..1000).map(|_| {
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, MonitorError>(())
            }
        });

        let results = exec.execute_many(futures).await;
        assert_eq!(results.len(), 1000);
        assert!(max_observed.load(Ordering::SeqCst) <= 8);
    }
}
