// Read side: billing summaries, daily/monthly breakdowns, estimates
// and budget checks over finalized aggregates. Never reads an open
// in-memory bucket.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::billing_store::BillingStore;
use crate::cost;
use crate::error::{MeterError, MeterResult};
use crate::models::{
    BudgetStatus, CostBreakdown, DailyAggregate, DeploymentType, HourlyAggregate, MonthlySummary,
    PricingRate, hour_start_ms, month_key, month_range_ms, month_start_back_ms, month_start_ms,
    next_month_start_ms, parse_day_ms, DAY_MS, HOUR_MS,
};
use crate::pricing::SharedPricing;

const MAX_SUMMARY_MONTHS: u32 = 36;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub network_cost: Decimal,
    pub storage_cost: Decimal,
    pub total_cost: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub snapshot_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCostEntry {
    pub deployment_id: String,
    pub deployment_type: DeploymentType,
    pub total_cost: Decimal,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub network_gb: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSummary {
    pub user_id: String,
    pub period_start: i64,
    pub period_end: i64,
    pub cost_summary: CostSummary,
    pub resource_usage: ResourceUsage,
    pub deployment_breakdown: Vec<DeploymentCostEntry>,
    pub monthly_breakdown: Vec<MonthlySummary>,
    pub budget: BudgetStatus,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub user_id: String,
    pub date: String,
    pub day_start: i64,
    pub cost_summary: CostSummary,
    pub resource_usage: ResourceUsage,
    pub deployments: Vec<DailyAggregate>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBreakdown {
    pub user_id: String,
    pub months: Vec<MonthlySummary>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCosts {
    pub deployment_id: String,
    pub user_id: String,
    pub deployment_type: DeploymentType,
    pub cost_summary: CostSummary,
    pub resource_usage: ResourceUsage,
    /// Finalized daily rollups, coarse view of the same spend.
    pub days: Vec<DailyAggregate>,
    pub hours: Vec<HourlyAggregate>,
    pub incomplete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingDump {
    pub version: u64,
    pub rates: Vec<PricingRate>,
}

pub struct QueryService {
    store: Arc<BillingStore>,
    pricing: Arc<SharedPricing>,
    grace_ms: i64,
}

impl QueryService {
    pub fn new(store: Arc<BillingStore>, pricing: Arc<SharedPricing>, grace_ms: i64) -> Self {
        Self {
            store,
            pricing,
            grace_ms,
        }
    }

    /// True when `[_, period_end)` includes any hour whose finalize
    /// deadline has not passed yet.
    fn reaches_unfinalized(&self, period_end_ms: i64, now_ms: i64) -> bool {
        let latest_finalizable = hour_start_ms(now_ms - HOUR_MS - self.grace_ms);
        period_end_ms > latest_finalizable + HOUR_MS
    }

    #[instrument(skip(self), fields(operation = "billing_summary"))]
    pub async fn billing_summary(&self, user_id: &str, months: u32) -> MeterResult<BillingSummary> {
        if months == 0 || months > MAX_SUMMARY_MONTHS {
            return Err(MeterError::InvalidRequest(format!(
                "months must be between 1 and {MAX_SUMMARY_MONTHS}"
            )));
        }
        let now = chrono::Utc::now().timestamp_millis();
        let period_start = month_start_back_ms(now, months - 1);
        let period_end = now;

        let daily = self
            .store
            .daily_for_user(user_id, period_start, period_end)
            .await?;
        let (cost_summary, resource_usage) = fold_daily(&daily);
        let deployment_breakdown = breakdown_by_deployment(&daily);
        let any_unpriced = daily.iter().any(|d| d.unpriced_snapshot_count > 0);

        let first_month = month_key(period_start);
        let mut monthly_breakdown = self.store.monthly_for_user(user_id).await?;
        monthly_breakdown.retain(|m| m.month >= first_month);

        let budget = self.budget_check(user_id).await?;
        let incomplete = any_unpriced || self.reaches_unfinalized(period_end, now);

        Ok(BillingSummary {
            user_id: user_id.to_string(),
            period_start,
            period_end,
            cost_summary,
            resource_usage,
            deployment_breakdown,
            monthly_breakdown,
            budget,
            incomplete,
        })
    }

    #[instrument(skip(self), fields(operation = "daily_usage"))]
    pub async fn daily_usage(&self, user_id: &str, date: &str) -> MeterResult<DailyUsage> {
        let day_start = parse_day_ms(date).ok_or_else(|| {
            MeterError::InvalidRequest(format!("invalid date '{date}', expected YYYY-MM-DD"))
        })?;
        let now = chrono::Utc::now().timestamp_millis();
        let deployments = self
            .store
            .daily_for_user(user_id, day_start, day_start + DAY_MS)
            .await?;
        let (cost_summary, resource_usage) = fold_daily(&deployments);
        let any_unpriced = deployments.iter().any(|d| d.unpriced_snapshot_count > 0);
        let incomplete = any_unpriced || self.reaches_unfinalized(day_start + DAY_MS, now);

        Ok(DailyUsage {
            user_id: user_id.to_string(),
            date: date.to_string(),
            day_start,
            cost_summary,
            resource_usage,
            deployments,
            incomplete,
        })
    }

    #[instrument(skip(self), fields(operation = "monthly_breakdown"))]
    pub async fn monthly_breakdown(&self, user_id: &str) -> MeterResult<MonthlyBreakdown> {
        let now = chrono::Utc::now().timestamp_millis();
        let months = self.store.monthly_for_user(user_id).await?;

        let mut incomplete = false;
        for m in &months {
            if let Some((_, end)) = month_range_ms(&m.month)
                && self.reaches_unfinalized(end, now)
            {
                incomplete = true;
                break;
            }
        }
        if !incomplete && !months.is_empty() {
            let daily = self.store.daily_for_user(user_id, 0, now).await?;
            incomplete = daily.iter().any(|d| d.unpriced_snapshot_count > 0);
        }

        Ok(MonthlyBreakdown {
            user_id: user_id.to_string(),
            months,
            incomplete,
        })
    }

    #[instrument(skip(self), fields(operation = "deployment_costs"))]
    pub async fn deployment_costs(&self, deployment_id: &str) -> MeterResult<DeploymentCosts> {
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| MeterError::DeploymentNotFound(deployment_id.to_string()))?;

        let now = chrono::Utc::now().timestamp_millis();
        let hours = self
            .store
            .hourly_for_deployment(deployment_id, 0, now)
            .await?;
        let days = self
            .store
            .daily_for_deployment(deployment_id, 0, now)
            .await?;
        let (cost_summary, resource_usage) = fold_hourly(&hours);
        let any_unpriced = hours.iter().any(HourlyAggregate::has_unpriced);
        let active_end = deployment.terminated_at.unwrap_or(now);
        let incomplete = any_unpriced || self.reaches_unfinalized(active_end, now);

        Ok(DeploymentCosts {
            deployment_id: deployment.id,
            user_id: deployment.user_id,
            deployment_type: deployment.deployment_type,
            cost_summary,
            resource_usage,
            days,
            hours,
            incomplete,
        })
    }

    /// Budget standing for the current UTC month. Current usage is the
    /// sum of this month's daily rows; the derived fields are omitted
    /// when no budget is configured, never reported as zero.
    #[instrument(skip(self), fields(operation = "budget_check"))]
    pub async fn budget_check(&self, user_id: &str) -> MeterResult<BudgetStatus> {
        let now = chrono::Utc::now().timestamp_millis();
        let month = month_key(now);
        let from = month_start_ms(now);
        let to = next_month_start_ms(now);

        let daily = self.store.daily_for_user(user_id, from, to).await?;
        let current_usage: Decimal = daily.iter().map(|d| d.total_cost).sum();
        let monthly_budget = self.store.get_budget(user_id).await?;

        let (remaining_budget, utilization_percent) = match monthly_budget {
            Some(budget) if budget > Decimal::ZERO => {
                let utilization = (current_usage / budget * Decimal::from(100))
                    .round_dp(2)
                    .max(Decimal::ZERO);
                (Some(budget - current_usage), Some(utilization))
            }
            Some(budget) => (Some(budget - current_usage), None),
            None => (None, None),
        };

        Ok(BudgetStatus {
            user_id: user_id.to_string(),
            month,
            monthly_budget,
            current_usage,
            remaining_budget,
            utilization_percent,
        })
    }

    /// Pure estimate against the current pricing table.
    pub async fn cost_estimate(
        &self,
        deployment_type: DeploymentType,
        duration_hours: f64,
        avg_cpu_percent: f64,
        avg_memory_gb: f64,
    ) -> MeterResult<CostBreakdown> {
        if !duration_hours.is_finite() || duration_hours <= 0.0 {
            return Err(MeterError::InvalidRequest(
                "duration_hours must be a positive number".to_string(),
            ));
        }
        if !avg_cpu_percent.is_finite() || avg_cpu_percent < 0.0 {
            return Err(MeterError::InvalidRequest(
                "avg_cpu_percent must be non-negative".to_string(),
            ));
        }
        if !avg_memory_gb.is_finite() || avg_memory_gb < 0.0 {
            return Err(MeterError::InvalidRequest(
                "avg_memory_gb must be non-negative".to_string(),
            ));
        }
        let table = self.pricing.current().await;
        cost::estimate(
            deployment_type,
            duration_hours,
            avg_cpu_percent,
            avg_memory_gb,
            &table,
        )
    }

    /// Current pricing table dump, every resource and deployment type.
    pub async fn pricing(&self) -> PricingDump {
        let table = self.pricing.current().await;
        PricingDump {
            version: table.version(),
            rates: table.all_rates(),
        }
    }
}

fn fold_daily(rows: &[DailyAggregate]) -> (CostSummary, ResourceUsage) {
    let mut cost = zero_cost_summary();
    let mut usage = zero_usage();
    for d in rows {
        cost.cpu_cost += d.cpu_cost;
        cost.memory_cost += d.memory_cost;
        cost.network_cost += d.network_cost;
        cost.storage_cost += d.storage_cost;
        cost.total_cost += d.total_cost;
        usage.cpu_hours += d.cpu_hours;
        usage.memory_gb_hours += d.memory_gb_hours;
        usage.network_gb += d.network_gb;
        usage.snapshot_count += u64::from(d.snapshot_count);
    }
    (cost, usage)
}

fn fold_hourly(rows: &[HourlyAggregate]) -> (CostSummary, ResourceUsage) {
    let mut cost = zero_cost_summary();
    let mut usage = zero_usage();
    for h in rows {
        cost.cpu_cost += h.cpu_cost;
        cost.memory_cost += h.memory_cost;
        cost.network_cost += h.network_cost;
        cost.storage_cost += h.storage_cost;
        cost.total_cost += h.total_cost;
        usage.cpu_hours += h.cpu_hours;
        usage.memory_gb_hours += h.memory_gb_hours;
        usage.network_gb += h.network_gb;
        usage.snapshot_count += u64::from(h.snapshot_count);
    }
    (cost, usage)
}

fn breakdown_by_deployment(rows: &[DailyAggregate]) -> Vec<DeploymentCostEntry> {
    let mut by_id: BTreeMap<&str, DeploymentCostEntry> = BTreeMap::new();
    for d in rows {
        let entry = by_id
            .entry(d.deployment_id.as_str())
            .or_insert_with(|| DeploymentCostEntry {
                deployment_id: d.deployment_id.clone(),
                deployment_type: d.deployment_type,
                total_cost: Decimal::ZERO,
                cpu_hours: Decimal::ZERO,
                memory_gb_hours: Decimal::ZERO,
                network_gb: Decimal::ZERO,
            });
        entry.total_cost += d.total_cost;
        entry.cpu_hours += d.cpu_hours;
        entry.memory_gb_hours += d.memory_gb_hours;
        entry.network_gb += d.network_gb;
    }
    by_id.into_values().collect()
}

fn zero_cost_summary() -> CostSummary {
    CostSummary {
        cpu_cost: Decimal::ZERO,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: Decimal::ZERO,
        currency: "USD".to_string(),
    }
}

fn zero_usage() -> ResourceUsage {
    ResourceUsage {
        cpu_hours: Decimal::ZERO,
        memory_gb_hours: Decimal::ZERO,
        network_gb: Decimal::ZERO,
        snapshot_count: 0,
    }
}
