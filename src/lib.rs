#![forbid(unsafe_code)]

//! # container-monitor-core
//!
//! Concurrency core for a runtime security monitor watching containerized
//! workloads: a circuit-broken engine adapter, a bounded executor with
//! adaptive rate limiting, a filesystem watcher/event classifier, and an
//! authenticated webhook alert dispatcher.
//!
//! This crate does not parse configuration files or environment variables,
//! install a `tracing` subscriber, or provide a CLI: it is the library a
//! monitor binary is built on top of.
//!
//! ## Quick start
//!
//! ```rust
//! use container_monitor_core::{CircuitBreaker, MonitorError};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), MonitorError> {
//! let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
//! let containers = breaker.execute(|| async { Ok::<_, MonitorError>(Vec::<String>::new()) }).await?;
//! assert!(containers.is_empty());
//! # Ok(())
//! # }
//! ```

mod adaptive;
mod alert_dispatcher;
mod backoff;
mod circuit_breaker;
mod clock;
mod config;
mod engine_adapter;
mod error;
mod event;
mod executor;
mod file_watcher;
mod jitter;
mod rate_limit;
mod resource_pool;
mod retry;
mod sleeper;

pub use adaptive::Adaptive;
pub use alert_dispatcher::{AlertDispatcher, AlertStats, BatchResult, DispatcherConfig, Now};
pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use engine_adapter::{ClientInfo, EngineAdapter, EngineBackend, EngineMode};
pub use error::MonitorError;
pub use event::{DetailValue, Details, Event, EventType, Severity};
pub use executor::{BoundedExecutor, ExecutorStats};
pub use file_watcher::FileWatcher;
pub use jitter::Jitter;
pub use rate_limit::AdaptiveRateLimiter;
pub use resource_pool::ResourcePool;
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

pub mod prelude;
