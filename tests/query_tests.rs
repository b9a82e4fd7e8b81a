// QueryService tests over seeded aggregate rows: summaries, daily and
// monthly breakdowns, deployment costs, budgets, estimates

use std::sync::Arc;

use meterd::billing_store::BillingStore;
use meterd::error::MeterError;
use meterd::models::*;
use meterd::pricing::{PricingTable, SharedPricing, default_rates};
use meterd::query::QueryService;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

const GRACE_MS: i64 = 60_000;

async fn open_service(dir: &TempDir) -> (Arc<BillingStore>, QueryService) {
    let path = dir.path().join("billing.db");
    let store = Arc::new(
        BillingStore::connect(path.to_str().unwrap(), 3, 90)
            .await
            .unwrap(),
    );
    store.init().await.unwrap();
    let pricing = Arc::new(SharedPricing::new(PricingTable::from_rates(
        1,
        default_rates(),
    )));
    let query = QueryService::new(store.clone(), pricing, GRACE_MS);
    (store, query)
}

fn daily(deployment_id: &str, user_id: &str, day_start: i64, total: Decimal) -> DailyAggregate {
    DailyAggregate {
        deployment_id: deployment_id.into(),
        user_id: user_id.into(),
        deployment_type: DeploymentType::Acp,
        day_start,
        hours_counted: 10,
        snapshot_count: 1_200,
        unpriced_snapshot_count: 0,
        cpu_cost: total,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: total,
        cpu_hours: dec!(2),
        memory_gb_hours: dec!(4),
        network_gb: dec!(0.25),
        computed_at: day_start,
    }
}

fn hourly(deployment_id: &str, hour_start: i64, total: Decimal) -> HourlyAggregate {
    HourlyAggregate {
        deployment_id: deployment_id.into(),
        user_id: "user-1".into(),
        deployment_type: DeploymentType::Function,
        hour_start,
        snapshot_count: 120,
        unpriced_snapshot_count: 0,
        cpu_cost: total,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: total,
        avg_cpu_percent: 12.0,
        avg_memory_gb: 0.5,
        cpu_hours: dec!(0.12),
        memory_gb_hours: dec!(0.5),
        network_gb: Decimal::ZERO,
        version: 1,
        finalized_at: hour_start + HOUR_MS,
    }
}

fn deployment(id: &str, user_id: &str, terminated_at: Option<i64>) -> Deployment {
    Deployment {
        id: id.into(),
        user_id: user_id.into(),
        agent_id: "agent-1".into(),
        hiring_id: "hiring-1".into(),
        container_name: format!("container-{id}"),
        deployment_type: DeploymentType::Function,
        created_at: 1_000,
        terminated_at,
    }
}

#[tokio::test]
async fn query_billing_summary_sums_and_breaks_down_by_deployment() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let now = chrono::Utc::now().timestamp_millis();
    let today = day_start_ms(now);
    store
        .replace_daily(&daily("dep-a", "user-1", today, dec!(1.25)))
        .await
        .unwrap();
    store
        .replace_daily(&daily("dep-b", "user-1", today, dec!(0.75)))
        .await
        .unwrap();
    // another user's spend never leaks in
    store
        .replace_daily(&daily("dep-c", "user-2", today, dec!(9.99)))
        .await
        .unwrap();
    store
        .replace_monthly(&MonthlySummary {
            user_id: "user-1".into(),
            month: month_key(now),
            cpu_cost: dec!(2.00),
            memory_cost: Decimal::ZERO,
            network_cost: Decimal::ZERO,
            storage_cost: Decimal::ZERO,
            total_cost: dec!(2.00),
            cpu_hours: dec!(4),
            memory_gb_hours: dec!(8),
            network_gb: dec!(0.5),
            deployment_count: 2,
            computed_at: now,
        })
        .await
        .unwrap();

    let summary = query.billing_summary("user-1", 1).await.unwrap();
    assert_eq!(summary.user_id, "user-1");
    assert_eq!(summary.period_start, month_start_ms(now));
    assert_eq!(summary.cost_summary.total_cost, dec!(2.00));
    assert_eq!(summary.cost_summary.currency, "USD");
    assert_eq!(summary.resource_usage.cpu_hours, dec!(4));
    assert_eq!(summary.resource_usage.snapshot_count, 2_400);

    assert_eq!(summary.deployment_breakdown.len(), 2);
    assert_eq!(summary.deployment_breakdown[0].deployment_id, "dep-a");
    assert_eq!(summary.deployment_breakdown[0].total_cost, dec!(1.25));
    assert_eq!(summary.deployment_breakdown[1].deployment_id, "dep-b");

    assert_eq!(summary.monthly_breakdown.len(), 1);
    assert_eq!(summary.monthly_breakdown[0].month, month_key(now));

    // the period runs into hours that cannot be finalized yet
    assert!(summary.incomplete);
}

#[tokio::test]
async fn query_billing_summary_rejects_bad_month_counts() {
    let dir = TempDir::new().unwrap();
    let (_store, query) = open_service(&dir).await;

    let err = query.billing_summary("user-1", 0).await.unwrap_err();
    assert!(matches!(err, MeterError::InvalidRequest(_)));
    let err = query.billing_summary("user-1", 37).await.unwrap_err();
    assert!(err.to_string().contains("between 1 and 36"));
}

#[tokio::test]
async fn query_daily_usage_for_a_finalized_day() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let day_start = parse_day_ms("2024-03-10").unwrap();
    store
        .replace_daily(&daily("dep-a", "user-1", day_start, dec!(0.64)))
        .await
        .unwrap();

    let usage = query.daily_usage("user-1", "2024-03-10").await.unwrap();
    assert_eq!(usage.date, "2024-03-10");
    assert_eq!(usage.day_start, day_start);
    assert_eq!(usage.cost_summary.total_cost, dec!(0.64));
    assert_eq!(usage.deployments.len(), 1);
    assert!(!usage.incomplete);

    // a day with no rows reads as zero usage
    let empty = query.daily_usage("user-1", "2024-03-11").await.unwrap();
    assert_eq!(empty.cost_summary.total_cost, Decimal::ZERO);
    assert_eq!(empty.resource_usage.snapshot_count, 0);
    assert!(empty.deployments.is_empty());
}

#[tokio::test]
async fn query_daily_usage_flags_unpriced_days() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let day_start = parse_day_ms("2024-03-10").unwrap();
    let mut row = daily("dep-a", "user-1", day_start, dec!(0.10));
    row.unpriced_snapshot_count = 3;
    store.replace_daily(&row).await.unwrap();

    let usage = query.daily_usage("user-1", "2024-03-10").await.unwrap();
    assert!(usage.incomplete);
}

#[tokio::test]
async fn query_daily_usage_rejects_bad_dates() {
    let dir = TempDir::new().unwrap();
    let (_store, query) = open_service(&dir).await;

    let err = query.daily_usage("user-1", "03/10/2024").await.unwrap_err();
    assert!(matches!(err, MeterError::InvalidRequest(_)));
    assert!(err.to_string().contains("YYYY-MM-DD"));
}

#[tokio::test]
async fn query_monthly_breakdown_flags_the_open_month() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let closed = MonthlySummary {
        user_id: "user-1".into(),
        month: "2024-02".into(),
        cpu_cost: dec!(1.00),
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: dec!(1.00),
        cpu_hours: dec!(10),
        memory_gb_hours: dec!(20),
        network_gb: dec!(1),
        deployment_count: 1,
        computed_at: 0,
    };
    store.replace_monthly(&closed).await.unwrap();

    let breakdown = query.monthly_breakdown("user-1").await.unwrap();
    assert_eq!(breakdown.months.len(), 1);
    assert!(!breakdown.incomplete);

    let now = chrono::Utc::now().timestamp_millis();
    let mut open = closed.clone();
    open.month = month_key(now);
    store.replace_monthly(&open).await.unwrap();

    let breakdown = query.monthly_breakdown("user-1").await.unwrap();
    assert_eq!(breakdown.months.len(), 2);
    assert_eq!(breakdown.months[0].month, "2024-02");
    assert!(breakdown.incomplete);
}

#[tokio::test]
async fn query_deployment_costs_lists_hours() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let h1 = parse_day_ms("2024-03-10").unwrap();
    store
        .insert_deployment(&deployment("dep-a", "user-1", Some(h1 + 3 * HOUR_MS)))
        .await
        .unwrap();
    store.save_hourly(&hourly("dep-a", h1, dec!(0.02))).await.unwrap();
    store
        .save_hourly(&hourly("dep-a", h1 + HOUR_MS, dec!(0.03)))
        .await
        .unwrap();
    store
        .replace_daily(&daily("dep-a", "user-1", h1, dec!(0.05)))
        .await
        .unwrap();

    let costs = query.deployment_costs("dep-a").await.unwrap();
    assert_eq!(costs.deployment_id, "dep-a");
    assert_eq!(costs.user_id, "user-1");
    assert_eq!(costs.deployment_type, DeploymentType::Function);
    assert_eq!(costs.cost_summary.total_cost, dec!(0.05));
    assert_eq!(costs.resource_usage.snapshot_count, 240);
    assert_eq!(costs.days.len(), 1);
    assert_eq!(costs.days[0].total_cost, dec!(0.05));
    assert_eq!(costs.hours.len(), 2);
    // terminated long ago: every hour of its life is finalized
    assert!(!costs.incomplete);
}

#[tokio::test]
async fn query_deployment_costs_active_deployment_is_incomplete() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    store
        .insert_deployment(&deployment("dep-a", "user-1", None))
        .await
        .unwrap();
    let costs = query.deployment_costs("dep-a").await.unwrap();
    assert!(costs.incomplete);
    assert_eq!(costs.cost_summary.total_cost, Decimal::ZERO);
}

#[tokio::test]
async fn query_deployment_costs_unknown_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_store, query) = open_service(&dir).await;

    let err = query.deployment_costs("missing").await.unwrap_err();
    assert!(matches!(err, MeterError::DeploymentNotFound(_)));
}

#[tokio::test]
async fn query_budget_check_omits_derived_fields_without_a_budget() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let now = chrono::Utc::now().timestamp_millis();
    store
        .replace_daily(&daily("dep-a", "user-1", day_start_ms(now), dec!(2.50)))
        .await
        .unwrap();

    let status = query.budget_check("user-1").await.unwrap();
    assert_eq!(status.month, month_key(now));
    assert_eq!(status.current_usage, dec!(2.50));
    assert!(status.monthly_budget.is_none());
    assert!(status.remaining_budget.is_none());
    assert!(status.utilization_percent.is_none());

    store.set_budget("user-1", Some(dec!(10)), now).await.unwrap();
    let status = query.budget_check("user-1").await.unwrap();
    assert_eq!(status.monthly_budget, Some(dec!(10)));
    assert_eq!(status.remaining_budget, Some(dec!(7.50)));
    assert_eq!(status.utilization_percent, Some(dec!(25.00)));
}

#[tokio::test]
async fn query_budget_overrun_reports_negative_remaining() {
    let dir = TempDir::new().unwrap();
    let (store, query) = open_service(&dir).await;

    let now = chrono::Utc::now().timestamp_millis();
    store
        .replace_daily(&daily("dep-a", "user-1", day_start_ms(now), dec!(12)))
        .await
        .unwrap();
    store.set_budget("user-1", Some(dec!(10)), now).await.unwrap();

    let status = query.budget_check("user-1").await.unwrap();
    assert_eq!(status.remaining_budget, Some(dec!(-2)));
    assert_eq!(status.utilization_percent, Some(dec!(120.00)));
}

#[tokio::test]
async fn query_estimate_validates_inputs() {
    let dir = TempDir::new().unwrap();
    let (_store, query) = open_service(&dir).await;

    let err = query
        .cost_estimate(DeploymentType::Acp, 0.0, 30.0, 1.0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duration_hours"));
    let err = query
        .cost_estimate(DeploymentType::Acp, 2.0, -1.0, 1.0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("avg_cpu_percent"));
    let err = query
        .cost_estimate(DeploymentType::Acp, 2.0, 30.0, f64::NAN)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("avg_memory_gb"));

    let breakdown = query
        .cost_estimate(DeploymentType::Acp, 2.0, 30.0, 1.0)
        .await
        .unwrap();
    assert_eq!(breakdown.cpu_cost, dec!(0.02496));
    assert!(breakdown.total_cost > Decimal::ZERO);
}

#[tokio::test]
async fn query_pricing_dump_reflects_the_current_table() {
    let dir = TempDir::new().unwrap();
    let (_store, query) = open_service(&dir).await;

    let dump = query.pricing().await;
    assert_eq!(dump.version, 1);
    assert_eq!(dump.rates.len(), 12);
}
