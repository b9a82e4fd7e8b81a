// Hourly aggregation: per-deployment open buckets keyed by hour, a
// finalized watermark that rejects late samples, grace-window
// finalization, and versioned recompute by replay.

mod bucket;
mod rollup;

pub use bucket::HourlyBucket;
pub use rollup::{rollup_day, rollup_month};

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::billing_store::BillingStore;
use crate::cost::snapshot_cost;
use crate::error::{MeterError, MeterResult};
use crate::models::{HOUR_MS, HourlyAggregate, ResourceSnapshot, SnapshotCost, hour_start_ms};
use crate::pricing::SharedPricing;

struct DeploymentBuckets {
    open: BTreeMap<i64, HourlyBucket>,
    /// Highest finalized hour boundary. Records at or below it are
    /// late; the hour can only change through recompute.
    watermark: i64,
}

impl DeploymentBuckets {
    fn new() -> Self {
        Self {
            open: BTreeMap::new(),
            watermark: i64::MIN,
        }
    }
}

/// The single-writer aggregation path. Each deployment's buckets live
/// behind one DashMap entry, so applies for one deployment are
/// serialized while different deployments aggregate in parallel.
pub struct Aggregator {
    store: Arc<BillingStore>,
    pricing: Arc<SharedPricing>,
    grace_ms: i64,
    deployments: DashMap<String, DeploymentBuckets>,
}

impl Aggregator {
    pub fn new(store: Arc<BillingStore>, pricing: Arc<SharedPricing>, grace_ms: i64) -> Self {
        Self {
            store,
            pricing,
            grace_ms,
            deployments: DashMap::new(),
        }
    }

    /// Load a deployment's finalized watermark from the store. Called
    /// before its first record after startup so pre-restart hours stay
    /// closed.
    pub async fn prime(&self, deployment_id: &str) -> anyhow::Result<()> {
        let latest = self.store.latest_finalized_hour(deployment_id).await?;
        let mut entry = self
            .deployments
            .entry(deployment_id.to_string())
            .or_insert_with(DeploymentBuckets::new);
        if let Some(hour) = latest {
            entry.watermark = entry.watermark.max(hour);
        }
        Ok(())
    }

    /// Price one snapshot and fold it into its hour's open bucket.
    pub async fn record(&self, s: &ResourceSnapshot) -> MeterResult<()> {
        let hour = hour_start_ms(s.timestamp);
        let table = self.pricing.current().await;
        let cost = snapshot_cost(s, &table);
        if matches!(cost, SnapshotCost::Unpriced) {
            debug!(
                deployment_id = %s.deployment_id,
                ts = s.timestamp,
                "no applicable rate, recording snapshot unpriced"
            );
        }

        let mut entry = self
            .deployments
            .entry(s.deployment_id.clone())
            .or_insert_with(DeploymentBuckets::new);
        if hour <= entry.watermark {
            return Err(MeterError::LateSnapshot {
                deployment_id: s.deployment_id.clone(),
                hour_start: hour,
            });
        }
        entry
            .open
            .entry(hour)
            .and_modify(|b| b.apply(s, &cost))
            .or_insert_with(|| HourlyBucket::open(hour, s, &cost));
        Ok(())
    }

    /// Finalize every open bucket whose grace window has passed. A
    /// bucket is claimed (watermark bumped) before persisting; if the
    /// write fails its snapshots stay unfolded and `recover_unfolded`
    /// replays them from the store.
    pub async fn finalize_due(&self, now_ms: i64) -> anyhow::Result<usize> {
        let deadline = now_ms - HOUR_MS - self.grace_ms;
        let keys: Vec<String> = self.deployments.iter().map(|e| e.key().clone()).collect();
        let mut finalized = 0usize;
        for key in keys {
            let due: Vec<HourlyBucket> = {
                let Some(mut entry) = self.deployments.get_mut(&key) else {
                    continue;
                };
                let mut due = Vec::new();
                loop {
                    let Some((&hour, _)) = entry.open.first_key_value() else {
                        break;
                    };
                    if hour > deadline {
                        break;
                    }
                    if let Some(b) = entry.open.remove(&hour) {
                        entry.watermark = entry.watermark.max(hour);
                        due.push(b);
                    }
                }
                due
            };
            for b in due {
                match self.persist(b).await {
                    Ok(_) => finalized += 1,
                    Err(e) => warn!(
                        deployment_id = %key,
                        error = %e,
                        "hourly finalize failed, snapshots stay unfolded for recovery"
                    ),
                }
            }
        }
        Ok(finalized)
    }

    /// Termination path: persist every open bucket for the deployment
    /// before returning, so a terminated deployment's last partial
    /// hour is billed immediately. The entry stays behind with its
    /// watermark so a straggling sample for a finalized hour is still
    /// rejected as late.
    #[instrument(skip(self), fields(operation = "finalize_deployment"))]
    pub async fn finalize_deployment(&self, deployment_id: &str) -> anyhow::Result<usize> {
        let due: Vec<HourlyBucket> = {
            let Some(mut entry) = self.deployments.get_mut(deployment_id) else {
                return Ok(0);
            };
            let drained: Vec<HourlyBucket> =
                std::mem::take(&mut entry.open).into_values().collect();
            for b in &drained {
                entry.watermark = entry.watermark.max(b.hour_start);
            }
            drained
        };
        let mut n = 0usize;
        for b in due {
            self.persist(b).await?;
            n += 1;
        }
        Ok(n)
    }

    /// Replay a stored hour into a fresh aggregate one version up: the
    /// only mutation path for a finalized hour, and the healing path
    /// after a rate backfill. The same snapshot set always folds to
    /// the same totals.
    #[instrument(skip(self), fields(operation = "recompute_hour"))]
    pub async fn recompute_hour(
        &self,
        deployment_id: &str,
        hour_start: i64,
        now_ms: i64,
    ) -> MeterResult<HourlyAggregate> {
        if hour_start % HOUR_MS != 0 {
            return Err(MeterError::InvalidRequest(format!(
                "hour_start {hour_start} is not an hour boundary"
            )));
        }
        if now_ms < hour_start + HOUR_MS + self.grace_ms {
            return Err(MeterError::InvalidRequest(
                "hour is still open for collection".to_string(),
            ));
        }

        let snapshots = self.store.snapshots_for_hour(deployment_id, hour_start).await?;
        let table = self.pricing.current().await;
        let mut iter = snapshots.iter();
        let first = iter.next().ok_or_else(|| {
            MeterError::InvalidRequest(format!(
                "no snapshots recorded for deployment {deployment_id} in hour {hour_start}"
            ))
        })?;
        let mut bucket = HourlyBucket::open(hour_start, first, &snapshot_cost(first, &table));
        for s in iter {
            bucket.apply(s, &snapshot_cost(s, &table));
        }

        let version = self
            .store
            .max_hourly_version(deployment_id, hour_start)
            .await?
            .unwrap_or(0)
            + 1;
        let agg = bucket.to_aggregate(version, now_ms);
        self.store.save_hourly(&agg).await?;
        self.store.mark_folded(deployment_id, hour_start).await?;

        // close the hour in memory as well
        let mut entry = self
            .deployments
            .entry(deployment_id.to_string())
            .or_insert_with(DeploymentBuckets::new);
        entry.watermark = entry.watermark.max(hour_start);
        let wm = entry.watermark;
        entry.open.retain(|&h, _| h > wm);
        drop(entry);

        info!(
            deployment_id,
            hour_start,
            version,
            snapshots = agg.snapshot_count,
            unpriced = agg.unpriced_snapshot_count,
            total = %agg.total_cost,
            "recomputed hourly aggregate"
        );
        Ok(agg)
    }

    /// Finalize stored hours that are past grace but still unfolded,
    /// with no open bucket covering them. Heals crashes and failed
    /// persists.
    pub async fn recover_unfolded(&self, now_ms: i64) -> anyhow::Result<usize> {
        let deadline = now_ms - HOUR_MS - self.grace_ms;
        let pairs = self.store.unfolded_hours(now_ms).await?;
        let mut recovered = 0usize;
        for (deployment_id, hour_start) in pairs {
            if hour_start > deadline {
                continue;
            }
            if let Some(entry) = self.deployments.get(&deployment_id) {
                // the memory sweep owns hours it still holds open
                if entry.open.contains_key(&hour_start) {
                    continue;
                }
            }
            match self.recompute_hour(&deployment_id, hour_start, now_ms).await {
                Ok(_) => recovered += 1,
                Err(MeterError::InvalidRequest(reason)) => {
                    debug!(deployment_id, hour_start, reason, "skipped unfolded hour");
                }
                Err(e) => warn!(
                    deployment_id,
                    hour_start,
                    error = %e,
                    "unfolded hour recovery failed"
                ),
            }
        }
        Ok(recovered)
    }

    async fn persist(&self, bucket: HourlyBucket) -> anyhow::Result<HourlyAggregate> {
        let version = self
            .store
            .max_hourly_version(&bucket.deployment_id, bucket.hour_start)
            .await?
            .unwrap_or(0)
            + 1;
        let now = chrono::Utc::now().timestamp_millis();
        let agg = bucket.to_aggregate(version, now);
        self.store.save_hourly(&agg).await?;
        self.store.mark_folded(&agg.deployment_id, agg.hour_start).await?;
        info!(
            deployment_id = %agg.deployment_id,
            hour_start = agg.hour_start,
            version,
            snapshots = agg.snapshot_count,
            unpriced = agg.unpriced_snapshot_count,
            total = %agg.total_cost,
            "finalized hourly aggregate"
        );
        Ok(agg)
    }

    /// Open bucket count across deployments, for worker stats logging.
    pub fn open_bucket_count(&self) -> usize {
        self.deployments.iter().map(|e| e.open.len()).sum()
    }
}
