// Domain models: snapshots, deployments, pricing, billing aggregates

mod aggregate;
mod deployment;
mod pricing;
mod snapshot;

pub use aggregate::{
    BudgetStatus, DailyAggregate, HourlyAggregate, MonthlySummary, day_key, day_start_ms,
    hour_start_ms, month_key, month_range_ms, month_start_back_ms, month_start_ms,
    next_month_start_ms, parse_day_ms, DAY_MS, HOUR_MS,
};
pub use deployment::Deployment;
pub use pricing::{CostBreakdown, PricingRate, RateUnit, ResourceType, SnapshotCost};
pub use snapshot::{DeploymentStatus, DeploymentType, RawUsage, ResourceSnapshot};
