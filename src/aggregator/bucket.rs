// One open hourly bucket: pure accumulation of costed snapshots.
// Recompute replays stored snapshots through this same fold, so a
// finalized hour and its recomputed versions can never disagree on
// arithmetic.

use rust_decimal::Decimal;

use crate::models::{DeploymentType, HourlyAggregate, ResourceSnapshot, SnapshotCost};

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

// hourly money is stored at 10 decimal places, usage units at 12
const COST_DP: u32 = 10;
const USAGE_DP: u32 = 12;

#[derive(Debug, Clone)]
pub struct HourlyBucket {
    pub deployment_id: String,
    pub user_id: String,
    pub deployment_type: DeploymentType,
    pub hour_start: i64,
    snapshot_count: u32,
    unpriced_snapshot_count: u32,
    cpu_cost: Decimal,
    memory_cost: Decimal,
    network_cost: Decimal,
    storage_cost: Decimal,
    cpu_percent_sum: f64,
    memory_gb_sum: f64,
    cpu_hours: Decimal,
    memory_gb_hours: Decimal,
    network_gb: Decimal,
}

impl HourlyBucket {
    /// Open a bucket with its first snapshot.
    pub fn open(hour_start: i64, s: &ResourceSnapshot, cost: &SnapshotCost) -> Self {
        let mut bucket = Self {
            deployment_id: s.deployment_id.clone(),
            user_id: s.user_id.clone(),
            deployment_type: s.deployment_type,
            hour_start,
            snapshot_count: 0,
            unpriced_snapshot_count: 0,
            cpu_cost: Decimal::ZERO,
            memory_cost: Decimal::ZERO,
            network_cost: Decimal::ZERO,
            storage_cost: Decimal::ZERO,
            cpu_percent_sum: 0.0,
            memory_gb_sum: 0.0,
            cpu_hours: Decimal::ZERO,
            memory_gb_hours: Decimal::ZERO,
            network_gb: Decimal::ZERO,
        };
        bucket.apply(s, cost);
        bucket
    }

    /// Fold one snapshot in. Usage is accumulated whether or not the
    /// snapshot priced; an unpriced one only bumps the unpriced count.
    pub fn apply(&mut self, s: &ResourceSnapshot, cost: &SnapshotCost) {
        self.snapshot_count += 1;

        let elapsed_hours = Decimal::from(s.elapsed_seconds) / Decimal::from(3600);
        let cpu_fraction = decimal_from_f64(s.cpu_percent.max(0.0)) / Decimal::from(100);
        let memory_gb = Decimal::from(s.memory_bytes) / Decimal::from(1u64 << 30);
        self.cpu_hours += cpu_fraction * elapsed_hours;
        self.memory_gb_hours += memory_gb * elapsed_hours;
        self.network_gb += Decimal::from(s.network_rx_bytes + s.network_tx_bytes)
            / Decimal::from(1u64 << 30);

        self.cpu_percent_sum += s.cpu_percent.max(0.0);
        self.memory_gb_sum += s.memory_bytes as f64 / BYTES_PER_GB;

        match cost {
            SnapshotCost::Priced(b) => {
                self.cpu_cost += b.cpu_cost;
                self.memory_cost += b.memory_cost;
                self.network_cost += b.network_cost;
                self.storage_cost += b.storage_cost;
            }
            SnapshotCost::Unpriced => {
                self.unpriced_snapshot_count += 1;
            }
        }
    }

    pub fn snapshot_count(&self) -> u32 {
        self.snapshot_count
    }

    /// Seal the bucket into a versioned aggregate row. Components are
    /// rounded first and the total is the sum of the rounded parts, so
    /// the stored sum invariant holds exactly.
    pub fn to_aggregate(&self, version: i64, finalized_at: i64) -> HourlyAggregate {
        let n = self.snapshot_count.max(1) as f64;
        let cpu_cost = self.cpu_cost.round_dp(COST_DP);
        let memory_cost = self.memory_cost.round_dp(COST_DP);
        let network_cost = self.network_cost.round_dp(COST_DP);
        let storage_cost = self.storage_cost.round_dp(COST_DP);
        HourlyAggregate {
            deployment_id: self.deployment_id.clone(),
            user_id: self.user_id.clone(),
            deployment_type: self.deployment_type,
            hour_start: self.hour_start,
            snapshot_count: self.snapshot_count,
            unpriced_snapshot_count: self.unpriced_snapshot_count,
            cpu_cost,
            memory_cost,
            network_cost,
            storage_cost,
            total_cost: cpu_cost + memory_cost + network_cost + storage_cost,
            avg_cpu_percent: self.cpu_percent_sum / n,
            avg_memory_gb: self.memory_gb_sum / n,
            cpu_hours: self.cpu_hours.round_dp(USAGE_DP),
            memory_gb_hours: self.memory_gb_hours.round_dp(USAGE_DP),
            network_gb: self.network_gb.round_dp(USAGE_DP),
            version,
            finalized_at,
        }
    }
}

fn decimal_from_f64(v: f64) -> Decimal {
    use rust_decimal::prelude::FromPrimitive;
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}
