// Runtime stats source: per-cycle Docker reads via bollard

mod stats;

use std::collections::{HashMap, HashSet};
use std::future::Future;

use anyhow::Context;
use bollard::Docker;
use bollard::query_parameters::{InspectContainerOptions, ListContainersOptions, StatsOptions};
use futures_util::StreamExt;

use crate::models::{DeploymentStatus, RawUsage};

/// Where raw per-container usage comes from. The daemon reads the
/// Docker socket; collector tests substitute a scripted source.
pub trait StatsSource: Send + Sync + 'static {
    /// One usage reading for the named container.
    fn fetch(&self, container_name: &str) -> impl Future<Output = anyhow::Result<RawUsage>> + Send;

    /// Names of containers currently running in the runtime.
    fn list_running(&self) -> impl Future<Output = anyhow::Result<HashSet<String>>> + Send;
}

pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    async fn one_stats_frame(
        &self,
        container_name: &str,
    ) -> anyhow::Result<bollard::models::ContainerStatsResponse> {
        // stream=false makes the daemon take the two samples itself,
        // so the precpu side of the delta is populated
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };
        let mut stream = self.docker.stats(container_name, Some(options));
        stream
            .next()
            .await
            .with_context(|| format!("no stats frame for container {container_name}"))?
            .with_context(|| format!("stats read failed for container {container_name}"))
    }
}

impl StatsSource for DockerRepo {
    async fn fetch(&self, container_name: &str) -> anyhow::Result<RawUsage> {
        let inspect = self
            .docker
            .inspect_container(container_name, None::<InspectContainerOptions>)
            .await
            .with_context(|| format!("inspect failed for container {container_name}"))?;

        let status = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|st| DeploymentStatus::from_docker(&st.to_string()))
            .unwrap_or(DeploymentStatus::Stopped);

        let reserved_limit = inspect
            .host_config
            .as_ref()
            .and_then(|h| h.memory)
            .filter(|m| *m > 0)
            .unwrap_or(0) as u64;

        if status == DeploymentStatus::Stopped {
            // nothing to sample; the reservation is still billable
            return Ok(stats::idle_usage(status, reserved_limit));
        }

        let frame = self.one_stats_frame(container_name).await?;
        stats::raw_usage_from_stats(&frame, status, reserved_limit)
            .with_context(|| format!("incomplete stats frame for container {container_name}"))
    }

    async fn list_running(&self) -> anyhow::Result<HashSet<String>> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let filter = ListContainersOptions {
            all: false,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(filter))
            .await
            .context("Docker list_containers failed")?;

        let mut names = HashSet::with_capacity(containers.len());
        for c in &containers {
            if let Some(name) = c.names.as_ref().and_then(|n| n.first()) {
                names.insert(name.trim_start_matches('/').to_string());
            }
        }
        Ok(names)
    }
}
