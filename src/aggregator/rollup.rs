// Daily and monthly rollups. Both are replace-idempotent rebuilds
// from the layer below: daily from highest-version hourly rows,
// monthly from daily rows.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::instrument;

use crate::billing_store::BillingStore;
use crate::models::{
    DAY_MS, DailyAggregate, HourlyAggregate, MonthlySummary, month_key, next_month_start_ms,
};

/// Rebuild every deployment's daily row for one UTC day. Hours with no
/// aggregate mean zero usage and are simply absent from the sum.
#[instrument(skip(store), fields(operation = "rollup_day"))]
pub async fn rollup_day(
    store: &BillingStore,
    day_start: i64,
    now_ms: i64,
) -> anyhow::Result<usize> {
    let day_end = day_start + DAY_MS;
    let deployments = store.deployments_with_hours(day_start, day_end).await?;
    let mut rolled = 0usize;
    for deployment_id in deployments {
        let hours = store
            .hourly_for_deployment(&deployment_id, day_start, day_end)
            .await?;
        if let Some(daily) = fold_day(&hours, day_start, now_ms) {
            store.replace_daily(&daily).await?;
            rolled += 1;
        }
    }
    Ok(rolled)
}

/// Rebuild per-user summaries for the month containing `month_start`.
#[instrument(skip(store), fields(operation = "rollup_month"))]
pub async fn rollup_month(
    store: &BillingStore,
    month_start: i64,
    now_ms: i64,
) -> anyhow::Result<usize> {
    let month_end = next_month_start_ms(month_start);
    let month = month_key(month_start);
    let users = store.users_with_days(month_start, month_end).await?;
    let mut rolled = 0usize;
    for user_id in users {
        let days = store.daily_for_user(&user_id, month_start, month_end).await?;
        if let Some(summary) = fold_month(&user_id, &month, &days, now_ms) {
            store.replace_monthly(&summary).await?;
            rolled += 1;
        }
    }
    Ok(rolled)
}

fn fold_day(hours: &[HourlyAggregate], day_start: i64, now_ms: i64) -> Option<DailyAggregate> {
    let first = hours.first()?;
    let mut agg = DailyAggregate {
        deployment_id: first.deployment_id.clone(),
        user_id: first.user_id.clone(),
        deployment_type: first.deployment_type,
        day_start,
        hours_counted: 0,
        snapshot_count: 0,
        unpriced_snapshot_count: 0,
        cpu_cost: Decimal::ZERO,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: Decimal::ZERO,
        cpu_hours: Decimal::ZERO,
        memory_gb_hours: Decimal::ZERO,
        network_gb: Decimal::ZERO,
        computed_at: now_ms,
    };
    for h in hours {
        agg.hours_counted += 1;
        agg.snapshot_count += h.snapshot_count;
        agg.unpriced_snapshot_count += h.unpriced_snapshot_count;
        agg.cpu_cost += h.cpu_cost;
        agg.memory_cost += h.memory_cost;
        agg.network_cost += h.network_cost;
        agg.storage_cost += h.storage_cost;
        agg.total_cost += h.total_cost;
        agg.cpu_hours += h.cpu_hours;
        agg.memory_gb_hours += h.memory_gb_hours;
        agg.network_gb += h.network_gb;
    }
    Some(agg)
}

fn fold_month(
    user_id: &str,
    month: &str,
    days: &[DailyAggregate],
    now_ms: i64,
) -> Option<MonthlySummary> {
    if days.is_empty() {
        return None;
    }
    let mut summary = MonthlySummary {
        user_id: user_id.to_string(),
        month: month.to_string(),
        cpu_cost: Decimal::ZERO,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: Decimal::ZERO,
        cpu_hours: Decimal::ZERO,
        memory_gb_hours: Decimal::ZERO,
        network_gb: Decimal::ZERO,
        deployment_count: 0,
        computed_at: now_ms,
    };
    let mut deployments = HashSet::new();
    for d in days {
        summary.cpu_cost += d.cpu_cost;
        summary.memory_cost += d.memory_cost;
        summary.network_cost += d.network_cost;
        summary.storage_cost += d.storage_cost;
        summary.total_cost += d.total_cost;
        summary.cpu_hours += d.cpu_hours;
        summary.memory_gb_hours += d.memory_gb_hours;
        summary.network_gb += d.network_gb;
        deployments.insert(d.deployment_id.as_str());
    }
    summary.deployment_count = deployments.len() as u32;
    Some(summary)
}
