//! Immutable, validated configuration shared read-only by every component.
//!
//! This crate does not parse files or environment variables (external, per
//! the out-of-scope CLI/config-loader collaborators): it only validates and
//! freezes whatever an external loader assembled, via a fallible builder in
//! the teacher's `RetryPolicyBuilder` idiom.

use glob::Pattern;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

fn default_cpu_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("MonitorInterval must be in 1..=300 seconds (got {0})")]
    MonitorInterval(u64),
    #[error("ReportInterval must be in 60..=3600 seconds (got {0})")]
    ReportInterval(u64),
    #[error("ContainerPatterns must not be empty")]
    EmptyContainerPatterns,
    #[error("invalid glob pattern '{0}'")]
    InvalidPattern(String),
    #[error("AlertWebhook must use https:// unless the host is loopback (got '{0}')")]
    InsecureWebhook(String),
    #[error("AlertWebhook is not a valid URL: '{0}'")]
    InvalidWebhookUrl(String),
    #[error("AlertTimeout must be in 1..=30 seconds (got {0})")]
    AlertTimeout(u64),
    #[error("AlertSecretKey must be at least 16 characters (got {0})")]
    SecretKeyTooShort(usize),
    #[error("CPUThreshold/MemoryThreshold must be in 0..=100 (got {0})")]
    ThresholdOutOfRange(f64),
    #[error("MaxConcurrentContainers must be in 1..=100 (got {0})")]
    ConcurrencyLimitOutOfRange(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    Auto,
    Fixed(usize),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub monitor_interval: Duration,
    pub report_interval: Duration,
    pub container_patterns: Vec<String>,
    pub network_monitoring: bool,
    pub file_monitoring: bool,
    pub process_monitoring: bool,
    pub behavioral_analysis: bool,
    pub alert_webhook: Option<Url>,
    pub alert_timeout: Duration,
    pub alert_secret_key: Option<String>,
    pub backup_secret_key: Option<String>,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub network_threshold_mbps: f64,
    pub allowed_ports: Vec<u16>,
    pub blocked_processes: Vec<String>,
    pub monitored_directories: Vec<PathBuf>,
    pub max_concurrent_containers: ConcurrencyLimit,
    pub max_timestamp_skew: Duration,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Resolved concurrency limit: `auto` becomes `cpu_count * 4` (spec §3).
    pub fn concurrency_limit(&self) -> usize {
        match self.max_concurrent_containers {
            ConcurrencyLimit::Fixed(n) => n,
            ConcurrencyLimit::Auto => default_cpu_count() * 4,
        }
    }

    /// Glob-match a container name against `ContainerPatterns` (spec property #12).
    pub fn matches_container(&self, name: &str) -> bool {
        self.container_patterns.iter().any(|p| {
            Pattern::new(p).map(|pat| pat.matches(name)).unwrap_or(false)
        })
    }
}

pub struct ConfigBuilder {
    monitor_interval: u64,
    report_interval: u64,
    container_patterns: Vec<String>,
    network_monitoring: bool,
    file_monitoring: bool,
    process_monitoring: bool,
    behavioral_analysis: bool,
    alert_webhook: Option<String>,
    alert_timeout: u64,
    alert_secret_key: Option<String>,
    backup_secret_key: Option<String>,
    cpu_threshold: f64,
    memory_threshold: f64,
    network_threshold_mbps: f64,
    allowed_ports: Vec<u16>,
    blocked_processes: Vec<String>,
    monitored_directories: Vec<PathBuf>,
    max_concurrent_containers: ConcurrencyLimit,
    max_timestamp_skew: u64,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            monitor_interval: 30,
            report_interval: 300,
            container_patterns: vec!["dce-*".to_string()],
            network_monitoring: true,
            file_monitoring: true,
            process_monitoring: true,
            behavioral_analysis: true,
            alert_webhook: None,
            alert_timeout: 10,
            alert_secret_key: None,
            backup_secret_key: None,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            network_threshold_mbps: 100.0,
            allowed_ports: Vec::new(),
            blocked_processes: Vec::new(),
            monitored_directories: Vec::new(),
            max_concurrent_containers: ConcurrencyLimit::Auto,
            max_timestamp_skew: 300,
        }
    }

    pub fn monitor_interval_secs(mut self, secs: u64) -> Self {
        self.monitor_interval = secs;
        self
    }

    pub fn report_interval_secs(mut self, secs: u64) -> Self {
        self.report_interval = secs;
        self
    }

    pub fn container_patterns(mut self, patterns: Vec<String>) -> Self {
        self.container_patterns = patterns;
        self
    }

    pub fn network_monitoring(mut self, enabled: bool) -> Self {
        self.network_monitoring = enabled;
        self
    }

    pub fn file_monitoring(mut self, enabled: bool) -> Self {
        self.file_monitoring = enabled;
        self
    }

    pub fn process_monitoring(mut self, enabled: bool) -> Self {
        self.process_monitoring = enabled;
        self
    }

    pub fn behavioral_analysis(mut self, enabled: bool) -> Self {
        self.behavioral_analysis = enabled;
        self
    }

    pub fn alert_webhook(mut self, url: impl Into<String>) -> Self {
        self.alert_webhook = Some(url.into());
        self
    }

    pub fn alert_timeout_secs(mut self, secs: u64) -> Self {
        self.alert_timeout = secs;
        self
    }

    pub fn alert_secret_key(mut self, key: impl Into<String>) -> Self {
        self.alert_secret_key = Some(key.into());
        self
    }

    pub fn backup_secret_key(mut self, key: impl Into<String>) -> Self {
        self.backup_secret_key = Some(key.into());
        self
    }

    pub fn cpu_threshold(mut self, pct: f64) -> Self {
        self.cpu_threshold = pct;
        self
    }

    pub fn memory_threshold(mut self, pct: f64) -> Self {
        self.memory_threshold = pct;
        self
    }

    pub fn network_threshold_mbps(mut self, mbps: f64) -> Self {
        self.network_threshold_mbps = mbps;
        self
    }

    pub fn allowed_ports(mut self, ports: Vec<u16>) -> Self {
        self.allowed_ports = ports;
        self
    }

    pub fn blocked_processes(mut self, processes: Vec<String>) -> Self {
        self.blocked_processes = processes;
        self
    }

    pub fn monitored_directories(mut self, dirs: Vec<PathBuf>) -> Self {
        self.monitored_directories = dirs;
        self
    }

    pub fn max_concurrent_containers(mut self, limit: ConcurrencyLimit) -> Self {
        self.max_concurrent_containers = limit;
        self
    }

    pub fn max_timestamp_skew_secs(mut self, secs: u64) -> Self {
        self.max_timestamp_skew = secs;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !(1..=300).contains(&self.monitor_interval) {
            return Err(ConfigError::MonitorInterval(self.monitor_interval));
        }
        if !(60..=3600).contains(&self.report_interval) {
            return Err(ConfigError::ReportInterval(self.report_interval));
        }
        if self.container_patterns.is_empty() {
            return Err(ConfigError::EmptyContainerPatterns);
        }
        for pattern in &self.container_patterns {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidPattern(pattern.clone()))?;
        }
        if !(1..=30).contains(&self.alert_timeout) {
            return Err(ConfigError::AlertTimeout(self.alert_timeout));
        }
        if let Some(key) = &self.alert_secret_key {
            if key.len() < 16 {
                return Err(ConfigError::SecretKeyTooShort(key.len()));
            }
        }
        if !(0.0..=100.0).contains(&self.cpu_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.cpu_threshold));
        }
        if !(0.0..=100.0).contains(&self.memory_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.memory_threshold));
        }
        if let ConcurrencyLimit::Fixed(n) = self.max_concurrent_containers {
            if !(1..=100).contains(&n) {
                return Err(ConfigError::ConcurrencyLimitOutOfRange(n));
            }
        }

        let alert_webhook = match self.alert_webhook {
            Some(raw) => {
                let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidWebhookUrl(raw.clone()))?;
                let is_loopback = url
                    .host_str()
                    .map(|h| h == "localhost" || h == "127.0.0.1" || h == "::1")
                    .unwrap_or(false);
                if url.scheme() != "https" && !is_loopback {
                    return Err(ConfigError::InsecureWebhook(raw));
                }
                Some(url)
            }
            None => None,
        };

        Ok(Config {
            monitor_interval: Duration::from_secs(self.monitor_interval),
            report_interval: Duration::from_secs(self.report_interval),
            container_patterns: self.container_patterns,
            network_monitoring: self.network_monitoring,
            file_monitoring: self.file_monitoring,
            process_monitoring: self.process_monitoring,
            behavioral_analysis: self.behavioral_analysis,
            alert_webhook,
            alert_timeout: Duration::from_secs(self.alert_timeout),
            alert_secret_key: self.alert_secret_key,
            backup_secret_key: self.backup_secret_key,
            cpu_threshold: self.cpu_threshold,
            memory_threshold: self.memory_threshold,
            network_threshold_mbps: self.network_threshold_mbps,
            allowed_ports: self.allowed_ports,
            blocked_processes: self.blocked_processes,
            monitored_directories: self.monitored_directories,
            max_concurrent_containers: self.max_concurrent_containers,
            max_timestamp_skew: Duration::from_secs(self.max_timestamp_skew),
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
        assert_eq!(config.container_patterns, vec!["dce-*".to_string()]);
    }

    #[test]
    fn empty_container_patterns_rejected() {
        let err = Config::builder().container_patterns(vec![]).build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyContainerPatterns);
    }

    #[test]
    fn non_loopback_http_webhook_rejected() {
        let err = Config::builder().alert_webhook("http://example.com/hook").build().unwrap_err();
        assert!(matches!(err, ConfigError::InsecureWebhook(_)));
    }

    #[test]
    fn loopback_http_webhook_accepted() {
        let config = Config::builder().alert_webhook("http://127.0.0.1:8080/hook").build().unwrap();
        assert!(config.alert_webhook.is_some());
    }

    #[test]
    fn short_secret_key_rejected() {
        let err = Config::builder().alert_secret_key("short").build().unwrap_err();
        assert_eq!(err, ConfigError::SecretKeyTooShort(5));
    }

    #[test]
    fn auto_concurrency_limit_resolves_to_cpu_count_times_four() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.concurrency_limit(), default_cpu_count() * 4);
    }

    #[test]
    fn fixed_concurrency_limit_out_of_range_rejected() {
        let err = Config::builder()
            .max_concurrent_containers(ConcurrencyLimit::Fixed(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConcurrencyLimitOutOfRange(0)));
    }

    #[test]
    fn pattern_matching_examples_from_spec() {
        let config = Config::builder().container_patterns(vec!["dce-*".to_string()]).build().unwrap();
        assert!(config.matches_container("dce-api"));
        assert!(config.matches_container("dce-"));
        assert!(!config.matches_container("api-dce"));
    }
}
