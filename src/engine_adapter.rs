//! Abstracted client over the container engine, guarded by a [`CircuitBreaker`]
//! (spec §4.1). Two interchangeable backings share one contract: a native
//! async client over `bollard` (grounded in `other_examples`' Docker Engine
//! API usage) and a blocking client wrapped in `spawn_blocking` for
//! environments without an async-friendly engine SDK.

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::MonitorError;
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::Docker;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTable {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub image: String,
    pub user: String,
    pub exposed_ports: Vec<u16>,
    pub privileged: bool,
    pub readonly_rootfs: bool,
    pub mounts: Vec<String>,
}

/// Capability set exposed by the container engine (spec §4.1, §9 "Dual
/// client implementations"). Callers must not depend on which concrete
/// backing is in use.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, MonitorError>;
    async fn get_stats(&self, id: &str) -> Result<StatsSnapshot, MonitorError>;
    async fn get_processes(&self, id: &str) -> Result<ProcessTable, MonitorError>;
    async fn inspect(&self, id: &str) -> Result<ContainerDetails, MonitorError>;
    async fn exec(&self, id: &str, argv: &[String]) -> Result<String, MonitorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Native,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub mode: EngineMode,
    pub circuit_state: CircuitState,
    pub failure_count: usize,
}

/// Native async backing over `bollard`'s Docker Engine API client.
pub struct BollardBackend {
    docker: Docker,
}

impl BollardBackend {
    pub fn connect() -> Result<Self, MonitorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl EngineBackend for BollardBackend {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, MonitorError> {
        let options = ListContainersOptions::<String> { all, ..Default::default() };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                name: c.names.unwrap_or_default().into_iter().next().unwrap_or_default(),
                image: c.image.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_stats(&self, id: &str) -> Result<StatsSnapshot, MonitorError> {
        use bollard::container::StatsOptions;
        use futures::StreamExt;

        let mut stream =
            self.docker.stats(id, Some(StatsOptions { stream: false, one_shot: true }));
        let snapshot = stream
            .next()
            .await
            .ok_or_else(|| MonitorError::NotFound { container_id: id.to_string() })?
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;

        let cpu_percent = cpu_percent_from(&snapshot);
        let memory_percent = memory_percent_from(&snapshot);
        let (rx, tx) = network_bytes_from(&snapshot);

        Ok(StatsSnapshot {
            cpu_percent,
            memory_percent,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
        })
    }

    async fn get_processes(&self, id: &str) -> Result<ProcessTable, MonitorError> {
        let top = self
            .docker
            .top_processes::<String>(id, None)
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;

        Ok(ProcessTable {
            titles: top.titles.unwrap_or_default(),
            processes: top.processes.unwrap_or_default(),
        })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, MonitorError> {
        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;

        let config = details.config.unwrap_or_default();
        let host_config = details.host_config.unwrap_or_default();

        Ok(ContainerDetails {
            image: config.image.unwrap_or_default(),
            user: config.user.unwrap_or_default(),
            exposed_ports: config
                .exposed_ports
                .unwrap_or_default()
                .keys()
                .filter_map(|p| p.split('/').next().and_then(|n| n.parse().ok()))
                .collect(),
            privileged: host_config.privileged.unwrap_or(false),
            readonly_rootfs: host_config.readonly_rootfs.unwrap_or(false),
            mounts: details
                .mounts
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.source)
                .collect(),
        })
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<String, MonitorError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};
        use futures::StreamExt;

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;

        let mut output = Vec::new();
        if let StartExecResults::Attached { mut output: stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?;
                output.extend_from_slice(&chunk.into_bytes());
            }
        }

        // Exec output decoding assumes UTF-8 (spec §9 Design Note #3);
        // invalid bytes are surfaced as an explicit validation error rather
        // than lossily replaced.
        String::from_utf8(output)
            .map_err(|e| MonitorError::Validation { detail: format!("exec output not UTF-8: {}", e) })
    }
}

/// Docker's own CPU-percent formula: delta of cumulative usage over delta of
/// system usage, scaled by the online CPU count.
fn cpu_percent_from(stats: &bollard::container::Stats) -> f64 {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage) as f64;
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0)) as f64;
    let online_cpus = stats
        .cpu_stats
        .online_cpus
        .filter(|&n| n > 0)
        .or_else(|| stats.cpu_stats.cpu_usage.percpu_usage.as_ref().map(|v| v.len() as u64))
        .unwrap_or(1) as f64;

    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        0.0
    } else {
        (cpu_delta / system_delta) * online_cpus * 100.0
    }
}

fn memory_percent_from(stats: &bollard::container::Stats) -> f64 {
    let usage = stats.memory_stats.usage.unwrap_or(0) as f64;
    let limit = stats.memory_stats.limit.unwrap_or(1) as f64;
    if limit == 0.0 {
        0.0
    } else {
        (usage / limit) * 100.0
    }
}

fn network_bytes_from(stats: &bollard::container::Stats) -> (u64, u64) {
    let networks: &HashMap<String, bollard::container::NetworkStats> =
        match stats.networks.as_ref() {
            Some(n) => n,
            None => return (0, 0),
        };
    networks.values().fold((0, 0), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
}

/// Sync capability set a blocking SDK would expose; wrapped in
/// `spawn_blocking` by [`BlockingBackend`]. No blocking Docker SDK crate is
/// vendored in this workspace, so this trait is the tested seam rather than
/// a specific sync HTTP stack (spec §9 "Dual client implementations").
pub trait SyncEngineClient: Send + Sync + 'static {
    fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, MonitorError>;
    fn get_stats(&self, id: &str) -> Result<StatsSnapshot, MonitorError>;
    fn get_processes(&self, id: &str) -> Result<ProcessTable, MonitorError>;
    fn inspect(&self, id: &str) -> Result<ContainerDetails, MonitorError>;
    fn exec(&self, id: &str, argv: &[String]) -> Result<String, MonitorError>;
}

pub struct BlockingBackend<C: SyncEngineClient> {
    client: Arc<C>,
}

impl<C: SyncEngineClient> BlockingBackend<C> {
    pub fn new(client: C) -> Self {
        Self { client: Arc::new(client) }
    }
}

#[async_trait]
impl<C: SyncEngineClient> EngineBackend for BlockingBackend<C> {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, MonitorError> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.list_containers(all))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
    }

    async fn get_stats(&self, id: &str) -> Result<StatsSnapshot, MonitorError> {
        let client = self.client.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || client.get_stats(&id))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
    }

    async fn get_processes(&self, id: &str) -> Result<ProcessTable, MonitorError> {
        let client = self.client.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || client.get_processes(&id))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, MonitorError> {
        let client = self.client.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || client.inspect(&id))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<String, MonitorError> {
        let client = self.client.clone();
        let id = id.to_string();
        let argv = argv.to_vec();
        tokio::task::spawn_blocking(move || client.exec(&id, &argv))
            .await
            .map_err(|e| MonitorError::EngineUnavailable { detail: e.to_string() })?
    }
}

/// Client over the container engine, guarded by a `CircuitBreaker` that is
/// exclusively owned by this adapter.
pub struct EngineAdapter {
    backend: Arc<dyn EngineBackend>,
    breaker: CircuitBreaker,
    mode: EngineMode,
}

impl EngineAdapter {
    pub fn new(backend: Arc<dyn EngineBackend>, mode: EngineMode, breaker: CircuitBreaker) -> Self {
        Self { backend, breaker, mode }
    }

    /// Degrades to an empty list while the breaker is open and cooling down,
    /// rather than failing the caller (spec §4.1).
    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>, MonitorError> {
        if !self.breaker.can_execute() {
            tracing::debug!("engine circuit open, returning degraded empty container list");
            return Ok(Vec::new());
        }
        let backend = self.backend.clone();
        self.breaker.execute(|| async move { backend.list_containers(all).await }).await
    }

    pub async fn get_stats(&self, id: &str) -> Result<StatsSnapshot, MonitorError> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.breaker.execute(|| async move { backend.get_stats(&id).await }).await
    }

    pub async fn get_processes(&self, id: &str) -> Result<ProcessTable, MonitorError> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.breaker.execute(|| async move { backend.get_processes(&id).await }).await
    }

    pub async fn inspect(&self, id: &str) -> Result<ContainerDetails, MonitorError> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.breaker.execute(|| async move { backend.inspect(&id).await }).await
    }

    pub async fn exec(&self, id: &str, argv: &[String]) -> Result<String, MonitorError> {
        let backend = self.backend.clone();
        let id = id.to_string();
        let argv = argv.to_vec();
        self.breaker.execute(|| async move { backend.exec(&id, &argv).await }).await
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            mode: self.mode,
            circuit_state: self.breaker.state(),
            failure_count: self.breaker.failure_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyBackend {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EngineBackend for FlakyBackend {
        async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerInfo>, MonitorError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                Err(MonitorError::EngineUnavailable { detail: "down".into() })
            } else {
                Ok(vec![ContainerInfo {
                    id: "abc123456789".into(),
                    name: "web".into(),
                    image: "nginx".into(),
                }])
            }
        }

        async fn get_stats(&self, _id: &str) -> Result<StatsSnapshot, MonitorError> {
            unimplemented!()
        }
        async fn get_processes(&self, _id: &str) -> Result<ProcessTable, MonitorError> {
            unimplemented!()
        }
        async fn inspect(&self, _id: &str) -> Result<ContainerDetails, MonitorError> {
            unimplemented!()
        }
        async fn exec(&self, _id: &str, _argv: &[String]) -> Result<String, MonitorError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn scenario_s3_degrades_to_empty_list_once_breaker_opens() {
        let backend = Arc::new(FlakyBackend { failures_left: AtomicUsize::new(5) });
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let adapter = EngineAdapter::new(backend, EngineMode::Native, breaker);

        for _ in 0..5 {
            let _ = adapter.list_containers(false).await;
        }

        let result = adapter.list_containers(false).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(adapter.client_info().circuit_state, CircuitState::Open);
    }

    #[tokio::test]
    async fn client_info_reports_mode_and_failure_count() {
        let backend = Arc::new(FlakyBackend { failures_left: AtomicUsize::new(2) });
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let adapter = EngineAdapter::new(backend, EngineMode::Blocking, breaker);

        let _ = adapter.list_containers(false).await;
        let info = adapter.client_info();
        assert_eq!(info.mode, EngineMode::Blocking);
        assert_eq!(info.failure_count, 1);
    }
}
