//! Authenticated, replay-resistant, retrying webhook delivery (spec §4.7).
//!
//! Signing follows the HMAC-SHA256 pattern in the teacher's
//! `ferrex-core/src/domain/users/auth/crypto.rs` (`hash_token`), generalized
//! to sign `timestamp + "." + payload_bytes` with two keys for rotation.
//! Retries reuse [`crate::retry::RetryPolicy`]; batching reuses the
//! semaphore-gated fan-out pattern from [`crate::executor::BoundedExecutor`].

use crate::config::Config;
use crate::error::MonitorError;
use crate::event::Event;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// TLS cipher suites the dispatcher asks for (spec §4.7). `reqwest`'s
/// rustls backend does not expose per-suite selection through its public
/// builder, so this is carried as documentation/logging rather than an
/// enforced list; `min_tls_version` below is the part that is mechanically
/// enforced.
const CIPHER_ALLOWLIST: &str =
    "ECDHE+AESGCM:ECDHE+CHACHA20:DHE+AESGCM:DHE+CHACHA20:!aNULL:!MD5:!DSS";

const BATCH_CONCURRENCY: usize = 5;
const MAX_FUTURE_SKEW: Duration = Duration::from_secs(30);
const REPLAY_PRUNE_INTERVAL: Duration = Duration::from_secs(600);
const REPLAY_RETENTION_MARGIN: Duration = Duration::from_secs(300);

/// Wall-clock time source, abstracted so replay/staleness tests are
/// deterministic (mirrors the `Clock` abstraction used by the circuit
/// breaker and rate limiter, but over `DateTime<Utc>` rather than
/// monotonic millis since webhook timestamps are wall-clock ISO-8601).
pub trait Now: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
struct SystemNow;

impl Now for SystemNow {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Configuration for an [`AlertDispatcher`], derived from [`Config`] plus
/// the monitor identity fields the spec's payload format requires
/// (`monitor.version`, `monitor.instance`) and the optional cert-pin path
/// (spec §4.7 TLS section; not part of the `Config` table in spec §3).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub webhook_url: Option<Url>,
    pub timeout: Duration,
    pub primary_key: Option<String>,
    pub backup_key: Option<String>,
    pub max_timestamp_skew: Duration,
    pub cert_pin_path: Option<PathBuf>,
    pub monitor_version: String,
    pub instance_id: String,
}

impl DispatcherConfig {
    pub fn from_config(
        config: &Config,
        monitor_version: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: config.alert_webhook.clone(),
            timeout: config.alert_timeout,
            primary_key: config.alert_secret_key.clone(),
            backup_key: config.backup_secret_key.clone(),
            max_timestamp_skew: config.max_timestamp_skew,
            cert_pin_path: None,
            monitor_version: monitor_version.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn with_cert_pin_path(mut self, path: PathBuf) -> Self {
        self.cert_pin_path = Some(path);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlertStats {
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub signature_failures: u64,
    pub cert_pin_failures: u64,
}

impl AlertStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.alerts_sent + self.alerts_failed;
        if total == 0 {
            1.0
        } else {
            self.alerts_sent as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    seen: HashSet<DateTime<Utc>>,
    last_pruned: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ReplayGuard {
    state: Mutex<ReplayState>,
}

impl ReplayGuard {
    /// Accepts `ts` iff it is newly seen and its offset from `now` lies in
    /// `[-30s, +max_skew]` (spec §4.7). Periodically prunes entries older
    /// than `max_skew + 300s` (spec: every 600s).
    fn check_and_record(
        &self,
        now: DateTime<Utc>,
        ts: DateTime<Utc>,
        max_skew: Duration,
    ) -> Result<(), MonitorError> {
        let offset = now - ts;
        let min_offset = -chrono::Duration::from_std(MAX_FUTURE_SKEW)
            .expect("30s fits in chrono::Duration");
        let max_offset =
            chrono::Duration::from_std(max_skew).unwrap_or(chrono::Duration::MAX);

        if offset < min_offset || offset > max_offset {
            return Err(MonitorError::TimestampStale { offset: duration_abs(offset), max_skew });
        }

        let mut state = self.state.lock().expect("replay guard lock poisoned");
        if state.seen.contains(&ts) {
            return Err(MonitorError::Replay);
        }
        state.seen.insert(ts);

        let due_for_prune = match state.last_pruned {
            None => true,
            Some(last) => {
                now - last
                    >= chrono::Duration::from_std(REPLAY_PRUNE_INTERVAL)
                        .expect("600s fits in chrono::Duration")
            }
        };
        if due_for_prune {
            let retention = chrono::Duration::from_std(max_skew + REPLAY_RETENTION_MARGIN)
                .unwrap_or(chrono::Duration::MAX);
            state.seen.retain(|seen_ts| now - *seen_ts <= retention);
            state.last_pruned = Some(now);
        }

        Ok(())
    }
}

fn duration_abs(d: chrono::Duration) -> Duration {
    Duration::from_millis(d.num_milliseconds().unsigned_abs())
}

fn hmac_hex(key: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC-SHA-256 accepts keys of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_mac(key: &str, timestamp: &str, payload: &[u8], sig_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(sig_hex) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else { return false };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Authenticated webhook sender with retries, batching, key rotation, and
/// inbound-callback verification (spec §4.7).
pub struct AlertDispatcher {
    client: reqwest::Client,
    webhook_url: Option<Url>,
    primary_key: Option<String>,
    backup_key: Option<String>,
    max_timestamp_skew: Duration,
    monitor_version: String,
    instance_id: String,
    cert_pinned: bool,
    retry_policy: RetryPolicy,
    batch_semaphore: Arc<Semaphore>,
    replay_guard: ReplayGuard,
    now_fn: Arc<dyn Now>,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
    signature_failures: AtomicU64,
    cert_pin_failures: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, MonitorError> {
        let mut builder = reqwest::Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(config.timeout)
            .user_agent(format!("ContainerMonitor/{}", config.monitor_version));

        let mut cert_pinned = false;
        if let Some(pin_path) = &config.cert_pin_path {
            if pin_path.exists() {
                let pem = std::fs::read(pin_path).map_err(|e| MonitorError::Validation {
                    detail: format!("failed to read cert pin file {}: {e}", pin_path.display()),
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    MonitorError::Validation {
                        detail: format!("invalid cert pin file {}: {e}", pin_path.display()),
                    }
                })?;
                builder = builder.add_root_certificate(cert).tls_built_in_root_certs(false);
                cert_pinned = true;
            }
        }

        tracing::debug!(ciphers = CIPHER_ALLOWLIST, "alert dispatcher TLS policy");

        let client = builder
            .build()
            .map_err(|e| MonitorError::Validation { detail: format!("failed to build HTTP client: {e}") })?;

        Ok(Self {
            client,
            webhook_url: config.webhook_url,
            primary_key: config.primary_key,
            backup_key: config.backup_key,
            max_timestamp_skew: config.max_timestamp_skew,
            monitor_version: config.monitor_version,
            instance_id: config.instance_id,
            cert_pinned,
            retry_policy: RetryPolicy::webhook_default(),
            batch_semaphore: Arc::new(Semaphore::new(BATCH_CONCURRENCY)),
            replay_guard: ReplayGuard::default(),
            now_fn: Arc::new(SystemNow),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            cert_pin_failures: AtomicU64::new(0),
        })
    }

    /// Override the retry policy (deterministic tests; production callers
    /// can also use this to reuse [`RetryPolicy::webhook_default`] with a
    /// different sleeper).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the wall-clock time source (deterministic replay tests).
    pub fn with_now_fn<N: Now + 'static>(mut self, now_fn: N) -> Self {
        self.now_fn = Arc::new(now_fn);
        self
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            cert_pin_failures: self.cert_pin_failures.load(Ordering::Relaxed),
        }
    }

    /// The deterministic wire payload: `{timestamp, event, monitor}`. Uses
    /// `serde_json::json!`, whose `Value::Object` is backed by a `BTreeMap`
    /// (this crate does not enable serde_json's `preserve_order` feature),
    /// so keys are sorted lexicographically on every serialization: the
    /// bytes returned here are exactly the bytes signed and sent.
    fn build_payload(&self, event: &Event, timestamp: &DateTime<Utc>) -> Result<Vec<u8>, MonitorError> {
        let body = serde_json::json!({
            "timestamp": timestamp.to_rfc3339(),
            "event": event.to_alert_format(),
            "monitor": {
                "version": self.monitor_version,
                "instance": self.instance_id,
            },
        });
        serde_json::to_vec(&body)
            .map_err(|e| MonitorError::Validation { detail: format!("failed to serialize alert payload: {e}") })
    }

    /// Send one event to the configured webhook. Only events whose
    /// `should_alert()` is true should be routed here by the caller (the
    /// dispatcher itself does not re-check the predicate, matching the
    /// spec's framing of `AlertDispatcher` as a pure delivery mechanism).
    pub async fn send(&self, event: &Event) -> Result<(), MonitorError> {
        let result = self.send_inner(event).await;
        match &result {
            Ok(()) => {
                self.alerts_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.alerts_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn send_inner(&self, event: &Event) -> Result<(), MonitorError> {
        let url = self.webhook_url.clone().ok_or_else(|| MonitorError::Validation {
            detail: "no AlertWebhook configured".to_string(),
        })?;
        let primary_key = self.primary_key.clone().ok_or_else(|| MonitorError::Validation {
            detail: "no AlertSecretKey configured".to_string(),
        })?;
        let backup_key = self.backup_key.clone();

        let timestamp = Utc::now();
        let timestamp_header = timestamp.to_rfc3339();
        let payload = self.build_payload(event, &timestamp)?;

        let primary_sig = hmac_hex(&primary_key, &timestamp_header, &payload);
        let backup_sig = backup_key.as_deref().map(|k| hmac_hex(k, &timestamp_header, &payload));

        let attempt = Arc::new(AtomicU64::new(0));
        let client = self.client.clone();
        let monitor_version = self.monitor_version.clone();
        let cert_pinned = self.cert_pinned;

        let result = self
            .retry_policy
            .execute(|| {
                let client = client.clone();
                let url = url.clone();
                let payload = payload.clone();
                let timestamp_header = timestamp_header.clone();
                let primary_sig = primary_sig.clone();
                let backup_sig = backup_sig.clone();
                let monitor_version = monitor_version.clone();
                let attempt = attempt.clone();
                async move {
                    let this_attempt = attempt.fetch_add(1, Ordering::SeqCst) + 1;

                    let mut request = client
                        .post(url)
                        .header("Content-Type", "application/json")
                        .header("X-Webhook-Timestamp", &timestamp_header)
                        .header("X-Webhook-Signature", format!("sha256={primary_sig}"))
                        .header("User-Agent", format!("ContainerMonitor/{monitor_version}"));
                    if let Some(backup_sig) = &backup_sig {
                        request =
                            request.header("X-Webhook-Signature-Backup", format!("sha256={backup_sig}"));
                    }

                    let response = request.body(payload).send().await.map_err(|e| {
                        MonitorError::AlertTransport {
                            attempts: this_attempt as usize,
                            detail: e.to_string(),
                        }
                    })?;

                    let status = response.status();
                    if status.is_success() {
                        Ok(())
                    } else if status.is_server_error() {
                        Err(MonitorError::AlertTransport {
                            attempts: this_attempt as usize,
                            detail: format!("server error: {status}"),
                        })
                    } else {
                        // 4xx fails fast: not a transport error, so the
                        // retry policy's `is_retryable_transport` predicate
                        // will not retry it (spec §4.7: "4xx responses fail
                        // fast").
                        Err(MonitorError::Validation {
                            detail: format!("webhook rejected alert: {status}"),
                        })
                    }
                }
            })
            .await;

        if let Err(err) = &result {
            if cert_pinned && err.to_string().to_ascii_lowercase().contains("certificate") {
                self.cert_pin_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        result
    }

    /// Fan out `SendBatch` through a semaphore of 5 (spec §4.7). Delivery
    /// order across events is not guaranteed. Only events whose
    /// `should_alert()` is true are sent; the rest are skipped silently
    /// (mirrors the enclosing monitor only routing alertable events here).
    pub async fn send_batch(&self, events: &[Event]) -> BatchResult {
        let sendable: Vec<&Event> = events.iter().filter(|e| e.should_alert()).collect();
        let tasks = sendable.into_iter().map(|event| {
            let semaphore = self.batch_semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("batch semaphore never closed");
                self.send(event).await
            }
        });

        let results = futures::future::join_all(tasks).await;
        let success = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - success;
        BatchResult { success, failed }
    }

    /// Verify an inbound webhook callback (spec §4.7 "Verification path").
    /// Matches `original_source/.../alerting.py`'s `verify_webhook_signature`
    /// ordering: freshness/replay is checked first (and the timestamp is
    /// recorded as seen regardless of what happens to the signature), then
    /// the primary signature, then the backup if configured. A primary-only
    /// rotation window where the sender still signs with the outgoing key
    /// is accepted via the backup signature and logged (spec scenario S5).
    pub fn verify(
        &self,
        timestamp_header: &str,
        payload: &[u8],
        primary_sig_header: &str,
        backup_sig_header: Option<&str>,
    ) -> Result<(), MonitorError> {
        let timestamp = DateTime::parse_from_rfc3339(timestamp_header)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| MonitorError::Validation {
                detail: format!("invalid webhook timestamp '{timestamp_header}'"),
            })?;

        let now = self.now_fn.now();
        self.replay_guard.check_and_record(now, timestamp, self.max_timestamp_skew)?;

        let primary_key = self
            .primary_key
            .as_deref()
            .ok_or_else(|| MonitorError::Validation { detail: "no AlertSecretKey configured".into() })?;
        let primary_sig = primary_sig_header.strip_prefix("sha256=").unwrap_or(primary_sig_header);

        if verify_mac(primary_key, timestamp_header, payload, primary_sig) {
            return Ok(());
        }

        let backup_ok = match (&self.backup_key, backup_sig_header) {
            (Some(backup_key), Some(backup_header)) => {
                let backup_sig = backup_header.strip_prefix("sha256=").unwrap_or(backup_header);
                verify_mac(backup_key, timestamp_header, payload, backup_sig)
            }
            _ => false,
        };

        if !backup_ok {
            self.signature_failures.fetch_add(1, Ordering::Relaxed);
            return Err(MonitorError::SignatureInvalid);
        }

        tracing::info!("webhook verified with backup key (key rotation window)");
        Ok(())
    }
}
