//! Jitter strategies applied on top of a [`Backoff`](crate::Backoff) delay.
//!
//! Reused from the teacher's `jitter.rs` (its `Jitter` enum and RNG-injected
//! `apply_with_rng` test seam), unchanged in shape. `RetryPolicy` defaults to
//! `Jitter::None` so the webhook retry schedule stays exactly the `[2s, 10s]`
//! clamp spec §4.7 specifies; a caller batching many alert deliveries at once
//! can opt into `Jitter::Full`/`Equal` to avoid a thundering herd of retries
//! hitting the same webhook endpoint at the same instant.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Jitter {
    /// No jitter - use the exact backoff delay.
    None,
    /// Full jitter: random between 0 and delay.
    Full,
    /// Equal jitter: random between delay/2 and delay.
    Equal,
    /// Decorrelated jitter: AWS-style, bounded by `[base, max]`.
    Decorrelated { base: Duration, max: Duration },
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn decorrelated(base: Duration, max: Duration) -> Self {
        Jitter::Decorrelated { base, max }
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::thread_rng())
    }

    /// Apply jitter with a caller-supplied RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                Duration::from_millis(rng.gen_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                Duration::from_millis(rng.gen_range(half..=millis))
            }
            Jitter::Decorrelated { base, max } => {
                let base_millis = base.as_millis() as u64;
                let delay_millis = delay.as_millis() as u64;
                let max_millis = max.as_millis() as u64;

                let upper = delay_millis.saturating_mul(3);
                let range_max = upper.min(max_millis);

                if base_millis >= range_max {
                    return Duration::from_millis(base_millis);
                }
                Duration::from_millis(rng.gen_range(base_millis..=range_max))
            }
        }
    }
}
