//! Generic fixed-cap pool of reusable handles (spec §4.5), e.g. HTTP clients.
//!
//! Rust has no notion of Python's `id()` identity check, so release tracks
//! identity via a monotonic id assigned at creation rather than the value
//! itself (the Rust-native way to express "only push back a resource that
//! was acquired from this pool").

use crate::error::MonitorError;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A resource checked out of the pool. Must be returned via
/// [`ResourcePool::release`] or it is simply dropped (and the pool's
/// `created` count is not reclaimed).
pub struct PooledResource<T> {
    id: u64,
    value: Option<T>,
}

impl<T> PooledResource<T> {
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("PooledResource used after release")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("PooledResource used after release")
    }
}

struct PoolState<T> {
    idle: VecDeque<(u64, T)>,
    in_use: HashSet<u64>,
    created: usize,
}

pub struct ResourcePool<T> {
    factory: Arc<dyn Fn() -> Result<T, MonitorError> + Send + Sync>,
    validator: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    close: Arc<dyn Fn(T) + Send + Sync>,
    max_size: usize,
    next_id: AtomicU64,
    state: Mutex<PoolState<T>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T: Send + 'static> ResourcePool<T> {
    pub fn new<F>(max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Result<T, MonitorError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            validator: Arc::new(|_| true),
            close: Arc::new(|_| {}),
            max_size,
            next_id: AtomicU64::new(0),
            state: Mutex::new(PoolState { idle: VecDeque::new(), in_use: HashSet::new(), created: 0 }),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_close_hook<C>(mut self, close: C) -> Self
    where
        C: Fn(T) + Send + Sync + 'static,
    {
        self.close = Arc::new(close);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Acquire a resource, creating one lazily if below `max_size`, else
    /// polling for a release. Cooperative cancellation surfaces
    /// `MonitorError::Cancelled` at the next poll.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PooledResource<T>, MonitorError> {
        loop {
            if cancel.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            let action = {
                let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                match state.idle.pop_front() {
                    Some((id, value)) => {
                        if (self.validator)(&value) {
                            state.in_use.insert(id);
                            PollOutcome::Ready(id, value)
                        } else {
                            state.created = state.created.saturating_sub(1);
                            PollOutcome::Retry
                        }
                    }
                    None if state.created < self.max_size => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        state.created += 1;
                        state.in_use.insert(id);
                        PollOutcome::Create(id)
                    }
                    None => PollOutcome::Wait,
                }
            };

            match action {
                PollOutcome::Ready(id, value) => {
                    return Ok(PooledResource { id, value: Some(value) });
                }
                PollOutcome::Retry => continue,
                PollOutcome::Create(id) => match (self.factory)() {
                    Ok(value) => return Ok(PooledResource { id, value: Some(value) }),
                    Err(err) => {
                        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                        state.created = state.created.saturating_sub(1);
                        state.in_use.remove(&id);
                        return Err(err);
                    }
                },
                PollOutcome::Wait => {
                    tokio::select! {
                        _ = self.sleeper.sleep(POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
                    }
                }
            }
        }
    }

    /// Return a resource to the pool. Only accepted if it was acquired from
    /// this pool (tracked by id), per spec §4.5.
    pub fn release(&self, mut resource: PooledResource<T>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.in_use.remove(&resource.id) {
            if let Some(value) = resource.value.take() {
                state.idle.push_back((resource.id, value));
            }
        }
    }

    /// Close every idle (not-in-use) resource. In-use resources remain the
    /// caller's responsibility.
    pub fn close_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        while let Some((_, value)) = state.idle.pop_front() {
            (self.close)(value);
        }
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).created
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).idle.len()
    }
}

enum PollOutcome<T> {
    Ready(u64, T),
    Create(u64),
    Retry,
    Wait,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn lazily_creates_up_to_max_size() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = created.clone();
        let pool = ResourcePool::new(2, move || {
            created_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MonitorError>(created_clone.load(Ordering::SeqCst))
        });
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        pool.release(a);
        pool.release(b);
    }

    #[tokio::test]
    async fn release_allows_reuse_without_recreating() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = created.clone();
        let pool = ResourcePool::new(1, move || {
            created_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, MonitorError>(())
        });
        let cancel = CancellationToken::new();

        let r = pool.acquire(&cancel).await.unwrap();
        pool.release(r);
        let _ = pool.acquire(&cancel).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_resources_are_discarded_and_replaced() {
        let pool = ResourcePool::new(1, || Ok::<_, MonitorError>(()))
            .with_validator(|_: &()| false);
        let cancel = CancellationToken::new();

        let r = pool.acquire(&cancel).await.unwrap();
        pool.release(r);
        let _ = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.created_count(), 1);
    }

    #[tokio::test]
    async fn close_all_invokes_hook_on_idle_resources_only() {
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_clone = closed.clone();
        let pool = ResourcePool::new(2, || Ok::<_, MonitorError>(()))
            .with_close_hook(move |_| {
                closed_clone.fetch_add(1, Ordering::SeqCst);
            });
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        pool.release(b);
        pool.close_all();

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        pool.release(a);
    }

    #[tokio::test]
    async fn release_of_foreign_resource_is_ignored() {
        let pool_a: ResourcePool<u32> = ResourcePool::new(1, || Ok(1));
        let pool_b: ResourcePool<u32> = ResourcePool::new(1, || Ok(2));
        let cancel = CancellationToken::new();

        let from_a = pool_a.acquire(&cancel).await.unwrap();
        pool_b.release(from_a);
        assert_eq!(pool_b.idle_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_a_waiting_acquire() {
        let pool: ResourcePool<()> = ResourcePool::new(1, || Ok(()));
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        cancel.cancel();
        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
