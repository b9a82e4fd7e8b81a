// Pure cost arithmetic. One snapshot plus one pricing table in, one
// fixed-point breakdown out; no store access, no clock except the
// estimator's "now".

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::error::{MeterError, MeterResult};
use crate::models::{
    CostBreakdown, DeploymentStatus, DeploymentType, PricingRate, RateUnit, ResourceSnapshot,
    ResourceType, SnapshotCost,
};
use crate::pricing::PricingTable;

const BYTES_PER_GB: u64 = 1 << 30;

fn dec(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

fn gb(bytes: u64) -> Decimal {
    Decimal::from(bytes) / Decimal::from(BYTES_PER_GB)
}

/// Normalize a rate to a per-hour price. Volume rates (`PerGb`) pass
/// through untouched; callers apply those to bytes moved, not time.
fn hourly_price(rate: &PricingRate) -> Decimal {
    match rate.unit {
        RateUnit::PerHour | RateUnit::PerGbHour | RateUnit::PerGb => rate.price,
        // 730 hours per month, per the published rate card
        RateUnit::PerGbMonth => rate.price / Decimal::from(730),
    }
}

/// Cost of one snapshot over the interval it covers.
///
/// Running deployments pay for cpu time, memory residency, bytes
/// transferred and reserved storage; suspended and stopped ones pay
/// for reserved storage only. Errors if any required rate is missing.
pub fn cost(s: &ResourceSnapshot, table: &PricingTable) -> MeterResult<CostBreakdown> {
    let at = s.timestamp;
    let dt = s.deployment_type;
    let hours = Decimal::from(s.elapsed_seconds) / Decimal::from(3600);

    // storage is billed on the reserved limit whatever the status
    let storage_rate = table.rate(ResourceType::Storage, dt, at)?;
    let storage = gb(s.memory_limit_bytes) * hourly_price(storage_rate) * hours;

    if !s.status.is_running() {
        return Ok(CostBreakdown::new(
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            storage,
        ));
    }

    let cpu_rate = table.rate(ResourceType::Cpu, dt, at)?;
    let memory_rate = table.rate(ResourceType::Memory, dt, at)?;
    let network_rate = table.rate(ResourceType::Network, dt, at)?;

    // transfer is a volume charge on the interval's delta, not prorated;
    // a time-based network rate cannot price it
    if network_rate.unit != RateUnit::PerGb {
        return Err(MeterError::RateNotFound {
            resource_type: ResourceType::Network,
            deployment_type: dt,
            at,
        });
    }

    let cpu = dec(s.cpu_percent.max(0.0)) / Decimal::from(100) * hourly_price(cpu_rate) * hours;
    let memory = gb(s.memory_bytes) * hourly_price(memory_rate) * hours;
    let network = gb(s.network_rx_bytes + s.network_tx_bytes) * network_rate.price;

    Ok(CostBreakdown::new(cpu, memory, network, storage))
}

/// Price a snapshot for aggregation: a rate miss becomes `Unpriced` so
/// usage still lands in the books instead of being dropped or zeroed.
pub fn snapshot_cost(s: &ResourceSnapshot, table: &PricingTable) -> SnapshotCost {
    match cost(s, table) {
        Ok(breakdown) => SnapshotCost::Priced(breakdown),
        Err(_) => SnapshotCost::Unpriced,
    }
}

/// Cost estimate for a hypothetical deployment: one synthetic snapshot
/// covering the whole duration, priced at current rates. Transfer is
/// unknowable up front and estimates at zero.
pub fn estimate(
    deployment_type: DeploymentType,
    duration_hours: f64,
    avg_cpu_percent: f64,
    avg_memory_gb: f64,
    table: &PricingTable,
) -> MeterResult<CostBreakdown> {
    let seconds = (duration_hours.max(0.0) * 3600.0).round();
    let memory_bytes = (avg_memory_gb.max(0.0) * BYTES_PER_GB as f64).round() as u64;
    let synthetic = ResourceSnapshot {
        timestamp: chrono::Utc::now().timestamp_millis(),
        deployment_id: String::new(),
        user_id: String::new(),
        deployment_type,
        cpu_percent: avg_cpu_percent.max(0.0),
        memory_bytes,
        memory_limit_bytes: memory_bytes,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
        block_read_bytes: 0,
        block_write_bytes: 0,
        status: DeploymentStatus::Running,
        elapsed_seconds: seconds.min(u32::MAX as f64) as u32,
    };
    // trim the arithmetic scale so the response reads 0.02496, not 0.024960
    let b = cost(&synthetic, table)?;
    Ok(CostBreakdown::new(
        b.cpu_cost.normalize(),
        b.memory_cost.normalize(),
        b.network_cost.normalize(),
        b.storage_cost.normalize(),
    ))
}
