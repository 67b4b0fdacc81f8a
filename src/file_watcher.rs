//! Recursive filesystem change stream → security `Event` stream (spec §4.6).
//!
//! Grounded in `examples/Lowband21-ferrex/ferrex-core/src/scanner/file_watcher.rs`'s
//! use of the `notify` crate: one recommended watcher per configured root,
//! forwarding raw events through an mpsc channel for classification.

use crate::error::MonitorError;
use crate::event::{DetailValue, Details, Event, EventType, Severity};
use notify::{Config as NotifyConfig, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const NOISE_SUBSTRINGS: [&str; 8] =
    [".tmp", ".log", ".cache", ".swp", ".pid", "proc/", "sys/", ".git/"];

const SECURITY_FILES: [&str; 6] = [
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/etc/hosts",
    "/etc/ssh/sshd_config",
    "/root/.ssh/authorized_keys",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl ChangeType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// Drop paths whose string form contains any noise substring (spec §4.6).
/// Idempotent: filtering an already-filtered set yields the same set
/// (testable property #10).
pub fn is_noise(path: &Path) -> bool {
    let as_str = path.to_string_lossy();
    NOISE_SUBSTRINGS.iter().any(|s| as_str.contains(s))
}

pub fn is_security_file(path: &Path) -> bool {
    let as_str = path.to_string_lossy();
    SECURITY_FILES.iter().any(|f| as_str == *f)
}

fn classify_change(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Modify(_) => Some(ChangeType::Modified),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        _ => None,
    }
}

/// Severity classification per spec §4.6.
pub fn classify_severity(change: ChangeType, path: &Path) -> Severity {
    if is_security_file(path) {
        return Severity::High;
    }

    let as_str = path.to_string_lossy();
    let suffix = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    let critical = match change {
        ChangeType::Created => {
            (as_str.starts_with("/usr/bin/") && suffix == ".sh")
                || as_str.starts_with("/usr/sbin/")
                || (as_str.starts_with("/tmp/") && suffix == ".sh")
                || ((as_str.starts_with("/etc/") || as_str.starts_with("/root/"))
                    && file_name.starts_with('.'))
        }
        ChangeType::Modified => {
            matches!(as_str.as_ref(), "/etc/passwd" | "/etc/shadow" | "/etc/sudoers")
        }
        ChangeType::Deleted => as_str.starts_with("/var/log/") && suffix == ".log",
    };

    if critical {
        Severity::Critical
    } else {
        Severity::Medium
    }
}

fn remediation_for(is_security: bool, change: ChangeType) -> &'static str {
    if is_security {
        "Review this security-relevant file change immediately and confirm it was authorized."
    } else {
        match change {
            ChangeType::Created => "Verify the newly created file was expected.",
            ChangeType::Modified => "Verify this modification was authorized.",
            ChangeType::Deleted => "Verify this deletion was intentional.",
        }
    }
}

fn build_event(change: ChangeType, path: &Path) -> Result<Event, MonitorError> {
    let is_security = is_security_file(path);
    let severity = classify_severity(change, path);
    let path_str = path.to_string_lossy().to_string();

    let mut details = Details::new();
    details.insert("change_type", DetailValue::String(change.as_str().to_string()))?;
    details.insert("file_path", DetailValue::String(path_str.clone()))?;
    details.insert("is_security_file", DetailValue::Bool(is_security))?;
    details.insert("timestamp", DetailValue::String(chrono::Utc::now().to_rfc3339()))?;

    Event::builder(
        EventType::FileSystemChange,
        severity,
        "file_watcher",
        format!("{} at {}", change.as_str(), path_str),
        details,
    )
    .remediation(remediation_for(is_security, change))
    .build()
}

/// Watches every configured directory that exists at start time, emitting a
/// classified `Event` per surviving change. Per-root failures are logged and
/// do not stop the others; cancellation is consulted between batches.
pub struct FileWatcher {
    directories: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }

    pub async fn run(&self, sink: mpsc::Sender<Event>, cancel: CancellationToken) {
        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<NotifyEvent>>(1024);
        let mut watchers: Vec<RecommendedWatcher> = Vec::new();

        for dir in &self.directories {
            if !dir.exists() {
                tracing::warn!(dir = %dir.display(), "monitored directory does not exist, skipping");
                continue;
            }
            let tx = raw_tx.clone();
            let watcher = RecommendedWatcher::new(
                move |res| {
                    let _ = tx.blocking_send(res);
                },
                NotifyConfig::default(),
            );
            match watcher {
                Ok(mut watcher) => {
                    if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
                        tracing::warn!(error = %e, dir = %dir.display(), "failed to watch root");
                        continue;
                    }
                    watchers.push(watcher);
                }
                Err(e) => {
                    tracing::warn!(error = %e, dir = %dir.display(), "failed to create watcher");
                }
            }
        }
        drop(raw_tx);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("file watcher cancelled, exiting after current batch");
                    break;
                }
                maybe_event = raw_rx.recv() => {
                    match maybe_event {
                        Some(Ok(event)) => {
                            for path in &event.paths {
                                if is_noise(path) {
                                    continue;
                                }
                                let Some(change) = classify_change(&event.kind) else { continue };
                                match build_event(change, path) {
                                    Ok(security_event) => {
                                        if sink.send(security_event).await.is_err() {
                                            return;
                                        }
                                    }
                                    Err(e) => tracing::warn!(error = %e, "failed to build event from fs change"),
                                }
                            }
                        }
                        Some(Err(e)) => tracing::warn!(error = %e, "file watcher notify error"),
                        None => break,
                    }
                }
            }
        }

        // keep watchers alive for the duration of the loop
        drop(watchers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_filter_drops_known_patterns() {
        assert!(is_noise(Path::new("/var/log/app.log")));
        assert!(is_noise(Path::new("/tmp/file.tmp")));
        assert!(is_noise(Path::new("/proc/1/status")));
        assert!(!is_noise(Path::new("/etc/passwd")));
    }

    #[test]
    fn noise_filter_is_idempotent() {
        let paths = vec![
            PathBuf::from("/var/log/app.log"),
            PathBuf::from("/etc/passwd"),
            PathBuf::from("/home/user/.git/config"),
        ];
        let once: Vec<_> = paths.iter().filter(|p| !is_noise(p)).cloned().collect();
        let twice: Vec<_> = once.iter().filter(|p| !is_noise(p)).cloned().collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn security_file_classified_high() {
        let severity = classify_severity(ChangeType::Modified, Path::new("/etc/hosts"));
        assert_eq!(severity, Severity::High);
    }

    #[test]
    fn scenario_s4_critical_script_creation_under_usr_bin() {
        let severity = classify_severity(ChangeType::Created, Path::new("/usr/bin/evil.sh"));
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn modifying_passwd_is_critical() {
        let severity = classify_severity(ChangeType::Modified, Path::new("/etc/passwd"));
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn deleting_log_under_var_log_is_critical() {
        let severity = classify_severity(ChangeType::Deleted, Path::new("/var/log/auth.log"));
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn hidden_file_created_under_etc_is_critical() {
        let severity = classify_severity(ChangeType::Created, Path::new("/etc/.hidden"));
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn ordinary_change_is_medium() {
        let severity = classify_severity(ChangeType::Modified, Path::new("/home/user/notes.txt"));
        assert_eq!(severity, Severity::Medium);
    }

    #[test]
    fn build_event_for_critical_path_matches_scenario_s4() {
        let event = build_event(ChangeType::Created, Path::new("/usr/bin/evil.sh")).unwrap();
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.event_type, EventType::FileSystemChange);
        assert_eq!(
            event.details.get("change_type"),
            Some(&DetailValue::String("created".to_string()))
        );
    }
}
