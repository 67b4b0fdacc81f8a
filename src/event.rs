//! The uniform security-event record, its validation, and severity escalation.

use crate::error::MonitorError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

const MAX_DESCRIPTION_LEN: usize = 1000;
const SENSITIVE_KEY_SUBSTRINGS: [&str; 4] = ["password", "api_key", "secret", "token"];
const SECURITY_MISCONFIGURATION: &str = "security_misconfiguration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SecurityMisconfiguration,
    NetworkAnomaly,
    ResourceAnomaly,
    SuspiciousProcess,
    FileSystemChange,
}

impl EventType {
    fn as_wire_str(self) -> &'static str {
        match self {
            Self::SecurityMisconfiguration => SECURITY_MISCONFIGURATION,
            Self::NetworkAnomaly => "network_anomaly",
            Self::ResourceAnomaly => "resource_anomaly",
            Self::SuspiciousProcess => "suspicious_process",
            Self::FileSystemChange => "file_system_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Ordered severity. Derive order matches declaration order: LOW < MEDIUM < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// A single tagged-variant detail value (spec §9: dynamically-typed event details).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    String(String),
    Number(f64),
    Bool(bool),
    Nested(BTreeMap<String, DetailValue>),
}

impl DetailValue {
    /// Stringified form used for substring checks (mirrors `str(details)` in the
    /// source's escalation check, generalized across our typed variants).
    fn stringified(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Nested(map) => {
                let mut out = String::from("{");
                for (k, v) in map {
                    out.push_str(k);
                    out.push(':');
                    out.push_str(&v.stringified());
                    out.push(',');
                }
                out.push('}');
                out
            }
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Validated, sensitive-key-filtered detail map.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Details(BTreeMap<String, DetailValue>);

impl Details {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, rejecting sensitive keys (spec §3, Open Question #1:
    /// the filter runs on keys only).
    pub fn insert(&mut self, key: impl Into<String>, value: DetailValue) -> Result<(), MonitorError> {
        let key = key.into();
        let lower = key.to_ascii_lowercase();
        if SENSITIVE_KEY_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
            return Err(MonitorError::Validation {
                detail: format!("details key '{}' matches a sensitive-data pattern", key),
            });
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&DetailValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn has_flag_true(&self, key: &str) -> bool {
        self.0.get(key).and_then(DetailValue::as_bool).unwrap_or(false)
    }

    fn any_value_contains(&self, needle: &str) -> bool {
        self.0.values().any(|v| v.stringified().contains(needle))
    }
}

impl fmt::Display for Details {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DetailValue::Nested(self.0.clone()).stringified())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub source: String,
    pub description: String,
    pub details: Details,
    pub remediation: Option<String>,
}

impl Event {
    /// Construct and validate an event, auto-escalating severity per spec §3.
    pub fn new(
        event_type: EventType,
        severity: Severity,
        source: impl Into<String>,
        description: impl Into<String>,
        details: Details,
    ) -> Result<Self, MonitorError> {
        Self::builder(event_type, severity, source, description, details).build()
    }

    pub fn builder(
        event_type: EventType,
        severity: Severity,
        source: impl Into<String>,
        description: impl Into<String>,
        details: Details,
    ) -> EventBuilder {
        EventBuilder {
            event_type,
            severity,
            source: source.into(),
            description: description.into(),
            details,
            container_id: None,
            container_name: None,
            remediation: None,
            timestamp: None,
        }
    }

    pub fn should_alert(&self) -> bool {
        matches!(self.severity, Severity::High | Severity::Critical)
    }

    /// The `ToAlertFormat` wire projection (spec §6).
    pub fn to_alert_format(&self) -> serde_json::Value {
        serde_json::json!({
            "severity": self.severity.to_string(),
            "event_type": self.event_type.to_string(),
            "container": self.container_name.clone().unwrap_or_else(|| "host".to_string()),
            "source": self.source,
            "description": self.description,
            "timestamp": self.timestamp.to_rfc3339(),
            "remediation": self.remediation,
        })
    }

    fn escalates_to_critical(event_type: EventType, details: &Details) -> bool {
        event_type == EventType::SecurityMisconfiguration
            && (details.has_flag_true("privileged")
                || details.has_flag_true("host_network")
                || details.any_value_contains("docker.sock"))
    }
}

pub struct EventBuilder {
    event_type: EventType,
    severity: Severity,
    source: String,
    description: String,
    details: Details,
    container_id: Option<String>,
    container_name: Option<String>,
    remediation: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl EventBuilder {
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<Event, MonitorError> {
        if let Some(id) = &self.container_id {
            if id.len() < 12 {
                return Err(MonitorError::Validation {
                    detail: format!("container_id '{}' shorter than 12 characters", id),
                });
            }
        }
        if let Some(name) = &self.container_name {
            if name.contains("..")
                || name.contains('/')
                || name.contains('\\')
                || name.bytes().any(|b| b < 0x20 || b == 0x7f)
            {
                return Err(MonitorError::Validation {
                    detail: format!("container_name '{}' contains disallowed characters", name),
                });
            }
        }

        let mut description = self.description;
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            description = description.chars().take(MAX_DESCRIPTION_LEN).collect();
        }

        let severity = if Event::escalates_to_critical(self.event_type, &self.details) {
            Severity::Critical
        } else {
            self.severity
        };

        Ok(Event {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            event_type: self.event_type,
            severity,
            container_id: self.container_id,
            container_name: self.container_name,
            source: self.source,
            description,
            details: self.details,
            remediation: self.remediation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details_with(key: &str, value: DetailValue) -> Details {
        let mut d = Details::new();
        d.insert(key, value).unwrap();
        d
    }

    #[test]
    fn severity_ordering_matches_spec() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn sensitive_key_rejected_on_insert() {
        let mut details = Details::new();
        let err = details.insert("api_key", DetailValue::String("x".into())).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn privileged_flag_escalates_to_critical() {
        let details = details_with("privileged", DetailValue::Bool(true));
        let event = Event::new(
            EventType::SecurityMisconfiguration,
            Severity::Medium,
            "scanner",
            "privileged container detected",
            details,
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.should_alert());
    }

    #[test]
    fn docker_sock_mount_escalates_to_critical() {
        let details = details_with("mounts", DetailValue::String("/var/run/docker.sock".into()));
        let event = Event::new(
            EventType::SecurityMisconfiguration,
            Severity::Low,
            "scanner",
            "docker socket mounted",
            details,
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn escalation_never_demotes_an_already_critical_event() {
        let details = details_with("privileged", DetailValue::Bool(true));
        let event = Event::new(
            EventType::SecurityMisconfiguration,
            Severity::Critical,
            "scanner",
            "already critical",
            details,
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn non_misconfiguration_events_are_never_escalated() {
        let details = details_with("privileged", DetailValue::Bool(true));
        let event = Event::new(
            EventType::NetworkAnomaly,
            Severity::Low,
            "scanner",
            "unrelated",
            details,
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Low);
    }

    #[test]
    fn should_alert_iff_high_or_critical() {
        for (severity, expect) in [
            (Severity::Low, false),
            (Severity::Medium, false),
            (Severity::High, true),
            (Severity::Critical, true),
        ] {
            let event =
                Event::new(EventType::ResourceAnomaly, severity, "s", "d", Details::new()).unwrap();
            assert_eq!(event.should_alert(), expect);
        }
    }

    #[test]
    fn container_id_must_be_at_least_12_chars() {
        let err = Event::builder(EventType::ResourceAnomaly, Severity::Low, "s", "d", Details::new())
            .container_id("short")
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn container_name_rejects_path_traversal() {
        let err = Event::builder(EventType::ResourceAnomaly, Severity::Low, "s", "d", Details::new())
            .container_name("../etc")
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn description_truncated_to_1000_chars() {
        let long = "x".repeat(2000);
        let event =
            Event::new(EventType::ResourceAnomaly, Severity::Low, "s", long, Details::new()).unwrap();
        assert_eq!(event.description.chars().count(), 1000);
    }

    #[test]
    fn scenario_s1_privileged_container_alert() {
        let details = details_with("privileged", DetailValue::Bool(true));
        let event = Event::builder(
            EventType::SecurityMisconfiguration,
            Severity::Medium,
            "scanner",
            "priv",
            details,
        )
        .container_name("web")
        .build()
        .unwrap();

        assert_eq!(event.severity, Severity::Critical);
        assert!(event.should_alert());
        let wire = event.to_alert_format();
        assert_eq!(wire["severity"], "CRITICAL");
        assert_eq!(wire["container"], "web");
    }

    #[test]
    fn to_alert_format_defaults_container_to_host() {
        let event =
            Event::new(EventType::ResourceAnomaly, Severity::Low, "s", "d", Details::new()).unwrap();
        let wire = event.to_alert_format();
        assert_eq!(wire["container"], "host");
    }
}
