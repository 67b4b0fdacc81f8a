//! Adaptive token-rate governor for outbound calls (spec §4.3).
//!
//! Ported from `original_source/core/concurrency.py`'s `AdaptiveRateLimiter`:
//! success/failure counters never decay (spec §9 Design Note #2: this is a
//! deliberate preservation of source semantics, not an oversight). The
//! `SUCCESS_DECAY` hook below documents where windowing would plug in if a
//! future change asked for it; it is intentionally unused today.

use crate::clock::{Clock, MonotonicClock};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_MIN_RATE: f64 = 1.0;
const DEFAULT_MAX_RATE: f64 = 100.0;
const DEFAULT_INITIAL_RATE: f64 = 10.0;
const WINDOW_SIZE: usize = 100;

/// Documented no-op hook for future exponential decay of the success/failure
/// counters (spec §9 Design Note #2). `None` preserves the source's
/// non-decaying behavior.
#[allow(dead_code)]
const SUCCESS_DECAY: Option<f64> = None;

struct LimiterState {
    current_rate: f64,
    success_count: u64,
    failure_count: u64,
    exec_times: VecDeque<Duration>,
    last_acquire_millis: Option<u64>,
}

pub struct AdaptiveRateLimiter {
    state: Mutex<LimiterState>,
    min_rate: f64,
    max_rate: f64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl AdaptiveRateLimiter {
    pub fn new() -> Self {
        Self::with_clock_and_sleeper(Arc::new(MonotonicClock::default()), Arc::new(TokioSleeper))
    }

    pub fn with_clock_and_sleeper(clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                current_rate: DEFAULT_INITIAL_RATE,
                success_count: 0,
                failure_count: 0,
                exec_times: VecDeque::with_capacity(WINDOW_SIZE),
                last_acquire_millis: None,
            }),
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            clock,
            sleeper,
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).current_rate
    }

    /// Delay until at least `1/current_rate` seconds have elapsed since the
    /// previous acquire.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let now = self.clock.now_millis();
            let min_interval_millis = (1000.0 / state.current_rate) as u64;
            let wait = match state.last_acquire_millis {
                Some(last) => {
                    let elapsed = now.saturating_sub(last);
                    min_interval_millis.saturating_sub(elapsed)
                }
                None => 0,
            };
            state.last_acquire_millis = Some(now + wait);
            wait
        };
        if wait > 0 {
            self.sleeper.sleep(Duration::from_millis(wait)).await;
        }
    }

    /// Record a successful call and its execution time, adjusting the rate
    /// upward every 10th success when healthy (spec §4.3).
    pub fn record_success(&self, exec_time: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.success_count += 1;
        push_bounded(&mut state.exec_times, exec_time);

        if state.success_count % 10 == 0 {
            let ratio = success_ratio(state.success_count, state.failure_count);
            let avg = average(&state.exec_times);
            if ratio > 0.95 && avg < Duration::from_millis(500) {
                state.current_rate = (state.current_rate * 1.1).min(self.max_rate);
            }
        }
    }

    /// Record a failed call, adjusting the rate downward every 3rd failure.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.failure_count += 1;
        if state.failure_count % 3 == 0 {
            state.current_rate = (state.current_rate * 0.8).max(self.min_rate);
        }
    }

    pub fn success_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).failure_count
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(window: &mut VecDeque<Duration>, value: Duration) {
    if window.len() == WINDOW_SIZE {
        window.pop_front();
    }
    window.push_back(value);
}

fn success_ratio(success: u64, failure: u64) -> f64 {
    let total = success + failure;
    if total == 0 {
        return 1.0;
    }
    success as f64 / total as f64
}

fn average(window: &VecDeque<Duration>) -> Duration {
    if window.is_empty() {
        return Duration::from_secs(0);
    }
    let total: Duration = window.iter().sum();
    total / window.len() as u32
}
