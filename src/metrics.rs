// Prometheus exposition: per-container resource gauges fed by the
// collector, fleet totals, and agent execution instruments.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::models::{Deployment, DeploymentStatus, ResourceSnapshot};

const CONTAINER_LABELS: &[&str] = &["container_name", "agent_id", "hiring_id", "deployment_type"];
const EXECUTION_LABELS: &[&str] = &["agent_id", "hiring_id", "deployment_type"];

pub struct ExpositionMetrics {
    registry: Registry,
    cpu_usage_percent: GaugeVec,
    memory_usage_bytes: IntGaugeVec,
    memory_limit_bytes: IntGaugeVec,
    network_rx_bytes: IntGaugeVec,
    network_tx_bytes: IntGaugeVec,
    block_read_bytes: IntGaugeVec,
    block_write_bytes: IntGaugeVec,
    container_status: GaugeVec,
    total_containers: IntGauge,
    running_containers: IntGauge,
    stopped_containers: IntGauge,
    execution_duration_seconds: HistogramVec,
    execution_success_total: IntCounterVec,
    execution_failure_total: IntCounterVec,
}

impl ExpositionMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cpu_usage_percent = GaugeVec::new(
            Opts::new("container_cpu_usage_percent", "CPU usage percent per container"),
            CONTAINER_LABELS,
        )?;
        let memory_usage_bytes = IntGaugeVec::new(
            Opts::new("container_memory_usage_bytes", "Memory usage in bytes per container"),
            CONTAINER_LABELS,
        )?;
        let memory_limit_bytes = IntGaugeVec::new(
            Opts::new("container_memory_limit_bytes", "Memory limit in bytes per container"),
            CONTAINER_LABELS,
        )?;
        let network_rx_bytes = IntGaugeVec::new(
            Opts::new(
                "container_network_rx_bytes",
                "Bytes received over the last sampling interval",
            ),
            CONTAINER_LABELS,
        )?;
        let network_tx_bytes = IntGaugeVec::new(
            Opts::new(
                "container_network_tx_bytes",
                "Bytes sent over the last sampling interval",
            ),
            CONTAINER_LABELS,
        )?;
        let block_read_bytes = IntGaugeVec::new(
            Opts::new(
                "container_block_read_bytes",
                "Bytes read from block devices over the last sampling interval",
            ),
            CONTAINER_LABELS,
        )?;
        let block_write_bytes = IntGaugeVec::new(
            Opts::new(
                "container_block_write_bytes",
                "Bytes written to block devices over the last sampling interval",
            ),
            CONTAINER_LABELS,
        )?;
        let container_status = GaugeVec::new(
            Opts::new("container_status", "1 when the container is running, 0 otherwise"),
            CONTAINER_LABELS,
        )?;
        let total_containers =
            IntGauge::new("total_containers", "Number of tracked containers")?;
        let running_containers =
            IntGauge::new("running_containers", "Number of tracked containers currently running")?;
        let stopped_containers =
            IntGauge::new("stopped_containers", "Number of tracked containers not running")?;
        let execution_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "agent_execution_duration_seconds",
                "Agent execution duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            EXECUTION_LABELS,
        )?;
        let execution_success_total = IntCounterVec::new(
            Opts::new("agent_execution_success_total", "Completed agent executions"),
            EXECUTION_LABELS,
        )?;
        let execution_failure_total = IntCounterVec::new(
            Opts::new("agent_execution_failure_total", "Failed agent executions"),
            EXECUTION_LABELS,
        )?;

        registry.register(Box::new(cpu_usage_percent.clone()))?;
        registry.register(Box::new(memory_usage_bytes.clone()))?;
        registry.register(Box::new(memory_limit_bytes.clone()))?;
        registry.register(Box::new(network_rx_bytes.clone()))?;
        registry.register(Box::new(network_tx_bytes.clone()))?;
        registry.register(Box::new(block_read_bytes.clone()))?;
        registry.register(Box::new(block_write_bytes.clone()))?;
        registry.register(Box::new(container_status.clone()))?;
        registry.register(Box::new(total_containers.clone()))?;
        registry.register(Box::new(running_containers.clone()))?;
        registry.register(Box::new(stopped_containers.clone()))?;
        registry.register(Box::new(execution_duration_seconds.clone()))?;
        registry.register(Box::new(execution_success_total.clone()))?;
        registry.register(Box::new(execution_failure_total.clone()))?;

        Ok(Self {
            registry,
            cpu_usage_percent,
            memory_usage_bytes,
            memory_limit_bytes,
            network_rx_bytes,
            network_tx_bytes,
            block_read_bytes,
            block_write_bytes,
            container_status,
            total_containers,
            running_containers,
            stopped_containers,
            execution_duration_seconds,
            execution_success_total,
            execution_failure_total,
        })
    }

    /// Update the per-container series from one sampling cycle.
    pub fn observe_container(&self, deployment: &Deployment, snapshot: &ResourceSnapshot) {
        let labels = container_labels(deployment);
        self.cpu_usage_percent
            .with_label_values(&labels)
            .set(snapshot.cpu_percent);
        self.memory_usage_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.memory_bytes));
        self.memory_limit_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.memory_limit_bytes));
        self.network_rx_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.network_rx_bytes));
        self.network_tx_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.network_tx_bytes));
        self.block_read_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.block_read_bytes));
        self.block_write_bytes
            .with_label_values(&labels)
            .set(clamp_i64(snapshot.block_write_bytes));
        let status = if snapshot.status == DeploymentStatus::Running {
            1.0
        } else {
            0.0
        };
        self.container_status.with_label_values(&labels).set(status);
    }

    /// Mark a container's status series stopped without touching the
    /// usage gauges (the last observed values stay until untrack).
    pub fn set_container_stopped(&self, deployment: &Deployment) {
        let labels = container_labels(deployment);
        self.container_status.with_label_values(&labels).set(0.0);
        self.cpu_usage_percent.with_label_values(&labels).set(0.0);
    }

    /// Drop every series for an untracked deployment.
    pub fn clear_container(&self, deployment: &Deployment) {
        let labels = container_labels(deployment);
        let _ = self.cpu_usage_percent.remove_label_values(&labels);
        let _ = self.memory_usage_bytes.remove_label_values(&labels);
        let _ = self.memory_limit_bytes.remove_label_values(&labels);
        let _ = self.network_rx_bytes.remove_label_values(&labels);
        let _ = self.network_tx_bytes.remove_label_values(&labels);
        let _ = self.block_read_bytes.remove_label_values(&labels);
        let _ = self.block_write_bytes.remove_label_values(&labels);
        let _ = self.container_status.remove_label_values(&labels);
    }

    pub fn set_totals(&self, total: usize, running: usize, stopped: usize) {
        self.total_containers.set(total as i64);
        self.running_containers.set(running as i64);
        self.stopped_containers.set(stopped as i64);
    }

    /// Hook for the embedding platform: called when an agent run
    /// completes.
    pub fn observe_execution(
        &self,
        agent_id: &str,
        hiring_id: &str,
        deployment_type: &str,
        duration_secs: f64,
        success: bool,
    ) {
        let labels = [agent_id, hiring_id, deployment_type];
        self.execution_duration_seconds
            .with_label_values(&labels)
            .observe(duration_secs);
        if success {
            self.execution_success_total.with_label_values(&labels).inc();
        } else {
            self.execution_failure_total.with_label_values(&labels).inc();
        }
    }

    /// Prometheus text format for GET /metrics.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn container_labels(deployment: &Deployment) -> [&str; 4] {
    [
        &deployment.container_name,
        &deployment.agent_id,
        &deployment.hiring_id,
        deployment.deployment_type.as_str(),
    ]
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
