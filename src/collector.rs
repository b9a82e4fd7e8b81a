// Sampling collector: one task per tracked deployment, per-cycle
// timeout equal to the interval, cumulative-counter deltas, a failure
// threshold that pauses sampling, and a dedicated batched writer task
// for snapshot persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::billing_store::BillingStore;
use crate::docker_repo::StatsSource;
use crate::error::MeterError;
use crate::metrics::ExpositionMetrics;
use crate::models::{Deployment, DeploymentStatus, ResourceSnapshot};

/// Channel capacity for the snapshot writer (backpressure if the
/// writer falls behind).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 2).max(32)
}

pub struct CollectorConfig {
    pub sample_interval_ms: u64,
    /// Consecutive failed cycles before a deployment is treated as
    /// stopped and sampling pauses.
    pub failure_threshold: u32,
}

/// Batching for the dedicated snapshot writer task.
pub struct SnapshotWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
}

/// Spawns the task that receives snapshots from the samplers and
/// flushes them to the store. Flushes when the buffer reaches
/// flush_rate, every flush_interval_secs, and drains the channel for a
/// final flush on shutdown.
pub fn spawn_snapshot_writer(
    mut write_rx: mpsc::Receiver<ResourceSnapshot>,
    store: Arc<BillingStore>,
    config: SnapshotWriterConfig,
    snapshots_saved_total: Arc<AtomicU64>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut buffer: Vec<ResourceSnapshot> = Vec::new();
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(snapshot) => {
                            buffer.push(snapshot);
                            if buffer.len() >= config.flush_rate as usize
                                && let Err(e) = flush_buffer(&store, &mut buffer, &snapshots_saved_total).await
                            {
                                warn!(error = %e, "snapshot writer: save_snapshots failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    if let Err(e) = flush_buffer(&store, &mut buffer, &snapshots_saved_total).await {
                        warn!(error = %e, "snapshot writer: save_snapshots failed");
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
        while let Ok(snapshot) = write_rx.try_recv() {
            buffer.push(snapshot);
        }
        if let Err(e) = flush_buffer(&store, &mut buffer, &snapshots_saved_total).await {
            warn!(error = %e, "snapshot writer: final flush failed");
        }
        debug!("snapshot writer shutting down");
    })
}

async fn flush_buffer(
    store: &BillingStore,
    buffer: &mut Vec<ResourceSnapshot>,
    snapshots_saved_total: &AtomicU64,
) -> anyhow::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    let n = buffer.len();
    store.save_snapshots(buffer).await?;
    snapshots_saved_total.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
    buffer.clear();
    debug!(operation = "save_snapshots", snapshots_count = n, "snapshots saved");
    Ok(())
}

#[derive(Default, Clone, Copy)]
struct Counters {
    rx: u64,
    tx: u64,
    block_read: u64,
    block_write: u64,
}

/// Delta of a cumulative counter. A counter that went backwards means
/// the container restarted; the current reading is the observed floor.
fn monotonic_delta(prev: u64, current: u64) -> u64 {
    if current >= prev { current - prev } else { current }
}

struct SamplerState {
    last_counters: Option<Counters>,
    consecutive_failures: u32,
    /// Set after the failure threshold: each tick only probes for the
    /// container until it is seen running again.
    paused: bool,
    last_status: Option<DeploymentStatus>,
}

impl SamplerState {
    fn new() -> Self {
        Self {
            last_counters: None,
            consecutive_failures: 0,
            paused: false,
            last_status: None,
        }
    }
}

struct TrackedDeployment {
    deployment: Deployment,
    state: Arc<Mutex<SamplerState>>,
    handle: JoinHandle<()>,
}

pub struct MetricsCollector<S: StatsSource> {
    source: Arc<S>,
    store: Arc<BillingStore>,
    aggregator: Arc<Aggregator>,
    metrics: Arc<ExpositionMetrics>,
    write_tx: mpsc::Sender<ResourceSnapshot>,
    config: CollectorConfig,
    tracked: RwLock<HashMap<String, TrackedDeployment>>,
}

impl<S: StatsSource> MetricsCollector<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<BillingStore>,
        aggregator: Arc<Aggregator>,
        metrics: Arc<ExpositionMetrics>,
        write_tx: mpsc::Sender<ResourceSnapshot>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
            store,
            aggregator,
            metrics,
            write_tx,
            config,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Start sampling a deployment. Idempotent per id.
    pub async fn track(&self, deployment: Deployment) -> anyhow::Result<()> {
        let mut tracked = self.tracked.write().await;
        if tracked.contains_key(&deployment.id) {
            return Ok(());
        }
        self.aggregator.prime(&deployment.id).await?;
        let state = Arc::new(Mutex::new(SamplerState::new()));
        let handle = self.spawn_sampler(deployment.clone(), state.clone());
        info!(
            deployment_id = %deployment.id,
            container = %deployment.container_name,
            "tracking deployment"
        );
        tracked.insert(
            deployment.id.clone(),
            TrackedDeployment {
                deployment,
                state,
                handle,
            },
        );
        Ok(())
    }

    /// Resume sampling for every non-terminated deployment on record.
    pub async fn resume_active(&self) -> anyhow::Result<usize> {
        let active = self.store.list_active_deployments().await?;
        let n = active.len();
        for deployment in active {
            self.track(deployment).await?;
        }
        Ok(n)
    }

    /// Stop sampling and synchronously finalize the deployment's open
    /// buckets before returning.
    pub async fn stop(&self, deployment_id: &str) -> anyhow::Result<usize> {
        let removed = self.tracked.write().await.remove(deployment_id);
        if let Some(t) = removed {
            t.handle.abort();
            // wait out an in-flight cycle so no sample folds after the
            // deployment's hours are finalized
            let _ = t.handle.await;
            self.metrics.clear_container(&t.deployment);
        }
        self.aggregator.finalize_deployment(deployment_id).await
    }

    /// One immediate sampling pass over every tracked deployment.
    /// Administrative; samples carry zero elapsed time so interval
    /// accounting is not double-billed, while transfer deltas and
    /// gauges stay fresh.
    pub async fn trigger_collection(&self) -> usize {
        let entries: Vec<(Deployment, Arc<Mutex<SamplerState>>)> = {
            let tracked = self.tracked.read().await;
            tracked
                .values()
                .map(|t| (t.deployment.clone(), t.state.clone()))
                .collect()
        };
        let mut sampled = 0usize;
        for (deployment, state) in entries {
            let mut state = state.lock().await;
            sample_once(
                self.source.as_ref(),
                &self.aggregator,
                &self.metrics,
                &self.write_tx,
                &deployment,
                &mut state,
                self.config.sample_interval_ms,
                self.config.failure_threshold,
                0,
            )
            .await;
            sampled += 1;
        }
        sampled
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.read().await.len()
    }

    pub async fn is_tracked(&self, deployment_id: &str) -> bool {
        self.tracked.read().await.contains_key(deployment_id)
    }

    /// (total, running, stopped) over tracked deployments, by each
    /// sampler's last observed status.
    pub async fn container_totals(&self) -> (usize, usize, usize) {
        let tracked = self.tracked.read().await;
        let total = tracked.len();
        let mut running = 0usize;
        for t in tracked.values() {
            let state = t.state.lock().await;
            if !state.paused && state.last_status == Some(DeploymentStatus::Running) {
                running += 1;
            }
        }
        (total, running, total - running)
    }

    fn spawn_sampler(
        &self,
        deployment: Deployment,
        state: Arc<Mutex<SamplerState>>,
    ) -> JoinHandle<()> {
        let source = self.source.clone();
        let aggregator = self.aggregator.clone();
        let metrics = self.metrics.clone();
        let write_tx = self.write_tx.clone();
        let interval_ms = self.config.sample_interval_ms;
        let failure_threshold = self.config.failure_threshold;
        let elapsed_seconds = (interval_ms / 1000) as u32;

        tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(interval_ms));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let mut state = state.lock().await;
                sample_once(
                    source.as_ref(),
                    &aggregator,
                    &metrics,
                    &write_tx,
                    &deployment,
                    &mut state,
                    interval_ms,
                    failure_threshold,
                    elapsed_seconds,
                )
                .await;
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn sample_once<S: StatsSource>(
    source: &S,
    aggregator: &Aggregator,
    metrics: &ExpositionMetrics,
    write_tx: &mpsc::Sender<ResourceSnapshot>,
    deployment: &Deployment,
    state: &mut SamplerState,
    timeout_ms: u64,
    failure_threshold: u32,
    elapsed_seconds: u32,
) {
    if state.paused {
        probe_for_return(source, deployment, state).await;
        return;
    }

    let fetched = timeout(
        Duration::from_millis(timeout_ms),
        source.fetch(&deployment.container_name),
    )
    .await;
    let raw = match fetched {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!(
                deployment_id = %deployment.id,
                error = %e,
                failures = state.consecutive_failures + 1,
                "stats fetch failed, skipping cycle"
            );
            register_failure(deployment, state, metrics, failure_threshold);
            return;
        }
        Err(_) => {
            warn!(
                deployment_id = %deployment.id,
                failures = state.consecutive_failures + 1,
                "stats fetch exceeded the sampling interval, counting cycle as failed"
            );
            register_failure(deployment, state, metrics, failure_threshold);
            return;
        }
    };
    state.consecutive_failures = 0;
    state.last_status = Some(raw.status);

    let current = Counters {
        rx: raw.network_rx_bytes,
        tx: raw.network_tx_bytes,
        block_read: raw.block_read_bytes,
        block_write: raw.block_write_bytes,
    };
    // first cycle after (re)start covers an unknown window: bill zero
    let deltas = match state.last_counters {
        Some(prev) => Counters {
            rx: monotonic_delta(prev.rx, current.rx),
            tx: monotonic_delta(prev.tx, current.tx),
            block_read: monotonic_delta(prev.block_read, current.block_read),
            block_write: monotonic_delta(prev.block_write, current.block_write),
        },
        None => Counters::default(),
    };
    state.last_counters = Some(current);

    let snapshot = ResourceSnapshot {
        timestamp: chrono::Utc::now().timestamp_millis(),
        deployment_id: deployment.id.clone(),
        user_id: deployment.user_id.clone(),
        deployment_type: deployment.deployment_type,
        cpu_percent: raw.cpu_percent,
        memory_bytes: raw.memory_bytes,
        memory_limit_bytes: raw.memory_limit_bytes,
        network_rx_bytes: deltas.rx,
        network_tx_bytes: deltas.tx,
        block_read_bytes: deltas.block_read,
        block_write_bytes: deltas.block_write,
        status: raw.status,
        elapsed_seconds,
    };

    metrics.observe_container(deployment, &snapshot);

    match aggregator.record(&snapshot).await {
        Ok(()) => {
            if write_tx.send(snapshot).await.is_err() {
                debug!("snapshot writer channel closed");
            }
        }
        Err(MeterError::LateSnapshot { hour_start, .. }) => {
            warn!(
                deployment_id = %deployment.id,
                hour_start,
                "snapshot arrived after its hour finalized, dropping"
            );
        }
        Err(e) => {
            warn!(deployment_id = %deployment.id, error = %e, "failed to record snapshot");
        }
    }
}

async fn probe_for_return<S: StatsSource>(
    source: &S,
    deployment: &Deployment,
    state: &mut SamplerState,
) {
    match source.list_running().await {
        Ok(names) if names.contains(&deployment.container_name) => {
            info!(
                deployment_id = %deployment.id,
                container = %deployment.container_name,
                "container observed running again, resuming sampling"
            );
            state.paused = false;
            state.consecutive_failures = 0;
            state.last_counters = None;
        }
        Ok(_) => {}
        Err(e) => {
            debug!(deployment_id = %deployment.id, error = %e, "runtime probe failed");
        }
    }
}

fn register_failure(
    deployment: &Deployment,
    state: &mut SamplerState,
    metrics: &ExpositionMetrics,
    failure_threshold: u32,
) {
    state.consecutive_failures += 1;
    if state.consecutive_failures >= failure_threshold && !state.paused {
        warn!(
            deployment_id = %deployment.id,
            failures = state.consecutive_failures,
            "failure threshold reached, marking deployment stopped and pausing sampling"
        );
        state.paused = true;
        state.last_status = Some(DeploymentStatus::Stopped);
        state.last_counters = None;
        metrics.set_container_stopped(deployment);
    }
}
