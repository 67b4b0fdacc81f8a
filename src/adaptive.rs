//! Lock-free handle for hot-reloadable shared state.
//!
//! `Config` is immutable after load (spec: §5 Shared-resource policy), but
//! the enclosing monitor may want to reload it without restarting every
//! subcomponent. `Adaptive<T>` gives cheap lock-free reads (`ArcSwap`) and
//! atomic whole-value replacement, so components read the current `Config`
//! on every operation entry rather than holding a stale reference.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Cheap-to-read, atomically-swappable holder for shared, hot-reloadable state.
#[derive(Debug)]
pub struct Adaptive<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for Adaptive<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Adaptive<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of an `Arc`).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely, atomically.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Replace the value via a closure over the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
        T: Clone,
    {
        let cur = self.inner.load_full();
        let new_val = f(&cur);
        self.inner.store(Arc::new(new_val));
    }
}
