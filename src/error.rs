//! Crate-wide error type.
//!
//! The monitor's failure domain is fully enumerable (circuit state, engine
//! transport, event validation, webhook signing/replay, resource pool,
//! cooperative cancellation), so unlike a generic resilience library this
//! crate closes over a single `MonitorError` rather than parameterizing over
//! an inner error type.

use std::fmt;
use std::time::Duration;

/// Unified error type for every fallible operation in this crate.
#[derive(Debug, Clone)]
pub enum MonitorError {
    /// The circuit breaker guarding an engine call is open.
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// The container engine is unreachable or returned a transport failure.
    EngineUnavailable { detail: String },
    /// A lookup (container, resource) found nothing matching.
    NotFound { container_id: String },
    /// An `Event`, `Config`, or other input failed validation.
    Validation { detail: String },
    /// The alert dispatcher exhausted its retry budget sending a webhook.
    AlertTransport { attempts: usize, detail: String },
    /// An inbound webhook's HMAC signature didn't match primary or backup key.
    SignatureInvalid,
    /// An inbound webhook's timestamp fell outside the allowed skew window.
    TimestampStale { offset: Duration, max_skew: Duration },
    /// An inbound webhook reused a timestamp already seen (replay attempt).
    Replay,
    /// The operation observed cancellation before it could complete.
    Cancelled,
    /// A `ResourcePool` could not hand out a resource (factory failure or
    /// the pool is at capacity with nothing releasable).
    Pool { detail: String },
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => write!(
                f,
                "circuit breaker open ({} failures, open for {:?})",
                failure_count, open_duration
            ),
            Self::EngineUnavailable { detail } => write!(f, "engine unavailable: {}", detail),
            Self::NotFound { container_id } => write!(f, "container not found: {}", container_id),
            Self::Validation { detail } => write!(f, "validation failed: {}", detail),
            Self::AlertTransport { attempts, detail } => write!(
                f,
                "alert delivery failed after {} attempts: {}",
                attempts, detail
            ),
            Self::SignatureInvalid => write!(f, "webhook signature invalid"),
            Self::TimestampStale { offset, max_skew } => write!(
                f,
                "webhook timestamp stale (offset {:?}, max skew {:?})",
                offset, max_skew
            ),
            Self::Replay => write!(f, "webhook timestamp already seen (replay rejected)"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Pool { detail } => write!(f, "resource pool error: {}", detail),
        }
    }
}

impl std::error::Error for MonitorError {}

impl MonitorError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this failure is worth retrying (transport/engine hiccups),
    /// as opposed to a permanent rejection (bad signature, validation).
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, Self::EngineUnavailable { .. } | Self::AlertTransport { .. })
    }
}
