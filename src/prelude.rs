//! Convenient re-exports for common types.
pub use crate::{
    AdaptiveRateLimiter, AlertDispatcher, AlertStats, Backoff, BatchResult, BoundedExecutor,
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, Config, ConfigBuilder, ConfigError,
    DetailValue, Details, DispatcherConfig, EngineAdapter, EngineBackend, Event, EventType,
    Jitter, MonitorError, MonotonicClock, Now, ResourcePool, RetryPolicy, Severity, Sleeper,
    TokioSleeper,
};
