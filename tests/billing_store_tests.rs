// BillingStore tests: deployments, snapshots, versioned hourly rows,
// daily/monthly rollup rows, pricing, budgets, retention

use meterd::billing_store::BillingStore;
use meterd::models::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

const HOUR: i64 = 3_600_000;

fn deployment(id: &str, user_id: &str) -> Deployment {
    Deployment {
        id: id.into(),
        user_id: user_id.into(),
        agent_id: "agent-1".into(),
        hiring_id: "hiring-1".into(),
        container_name: format!("container-{id}"),
        deployment_type: DeploymentType::Acp,
        created_at: 1_000,
        terminated_at: None,
    }
}

fn snap(deployment_id: &str, timestamp: i64) -> ResourceSnapshot {
    ResourceSnapshot {
        timestamp,
        deployment_id: deployment_id.into(),
        user_id: "user-1".into(),
        deployment_type: DeploymentType::Acp,
        cpu_percent: 25.0,
        memory_bytes: 512 * 1024 * 1024,
        memory_limit_bytes: 1 << 30,
        network_rx_bytes: 1_000,
        network_tx_bytes: 2_000,
        block_read_bytes: 10,
        block_write_bytes: 20,
        status: DeploymentStatus::Running,
        elapsed_seconds: 30,
    }
}

fn hourly(deployment_id: &str, hour_start: i64, version: i64, total: Decimal) -> HourlyAggregate {
    HourlyAggregate {
        deployment_id: deployment_id.into(),
        user_id: "user-1".into(),
        deployment_type: DeploymentType::Acp,
        hour_start,
        snapshot_count: 120,
        unpriced_snapshot_count: 0,
        cpu_cost: total,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: total,
        avg_cpu_percent: 25.0,
        avg_memory_gb: 0.5,
        cpu_hours: dec!(0.25),
        memory_gb_hours: dec!(0.5),
        network_gb: Decimal::ZERO,
        version,
        finalized_at: hour_start + HOUR + 60_000,
    }
}

fn daily(deployment_id: &str, user_id: &str, day_start: i64, total: Decimal) -> DailyAggregate {
    DailyAggregate {
        deployment_id: deployment_id.into(),
        user_id: user_id.into(),
        deployment_type: DeploymentType::Acp,
        day_start,
        hours_counted: 24,
        snapshot_count: 2_880,
        unpriced_snapshot_count: 0,
        cpu_cost: total,
        memory_cost: Decimal::ZERO,
        network_cost: Decimal::ZERO,
        storage_cost: Decimal::ZERO,
        total_cost: total,
        cpu_hours: dec!(6),
        memory_gb_hours: dec!(12),
        network_gb: dec!(0.5),
        computed_at: day_start + DAY_MS,
    }
}

#[tokio::test]
async fn billing_store_connect_and_init() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");

    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();
    // Second init is no-op (IF NOT EXISTS)
    store.init().await.unwrap();
}

#[tokio::test]
async fn billing_store_deployment_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let d = deployment("dep-1", "user-1");
    assert!(store.insert_deployment(&d).await.unwrap());
    // a second insert with the same id is rejected
    assert!(!store.insert_deployment(&d).await.unwrap());

    let loaded = store.get_deployment("dep-1").await.unwrap().unwrap();
    assert_eq!(loaded.user_id, "user-1");
    assert_eq!(loaded.container_name, "container-dep-1");
    assert_eq!(loaded.deployment_type, DeploymentType::Acp);
    assert!(loaded.terminated_at.is_none());
    assert!(loaded.is_active());

    assert!(store.get_deployment("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn billing_store_terminate_removes_from_active_list() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    store
        .insert_deployment(&deployment("dep-1", "user-1"))
        .await
        .unwrap();
    store
        .insert_deployment(&deployment("dep-2", "user-1"))
        .await
        .unwrap();
    assert_eq!(store.list_active_deployments().await.unwrap().len(), 2);

    store.set_terminated("dep-1", 5_000).await.unwrap();
    let active = store.list_active_deployments().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "dep-2");

    // termination time is written once
    store.set_terminated("dep-1", 9_000).await.unwrap();
    let d = store.get_deployment("dep-1").await.unwrap().unwrap();
    assert_eq!(d.terminated_at, Some(5_000));

    let for_user = store.list_deployments_for_user("user-1").await.unwrap();
    assert_eq!(for_user.len(), 2);
}

#[tokio::test]
async fn billing_store_snapshots_by_hour() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let hour = 10 * HOUR;
    store
        .save_snapshots(&[
            snap("dep-1", hour + 60_000),
            snap("dep-1", hour),
            snap("dep-1", hour + HOUR - 1),
            snap("dep-1", hour + HOUR), // next hour
            snap("dep-2", hour + 10),   // other deployment
        ])
        .await
        .unwrap();

    let in_hour = store.snapshots_for_hour("dep-1", hour).await.unwrap();
    assert_eq!(in_hour.len(), 3);
    assert_eq!(in_hour[0].timestamp, hour);
    assert_eq!(in_hour[2].timestamp, hour + HOUR - 1);
    assert_eq!(in_hour[0].cpu_percent, 25.0);
    assert_eq!(in_hour[0].network_tx_bytes, 2_000);
    assert_eq!(in_hour[0].status, DeploymentStatus::Running);
    assert_eq!(in_hour[0].elapsed_seconds, 30);
}

#[tokio::test]
async fn billing_store_save_empty_no_op() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    store.save_snapshots(&[]).await.unwrap();
    assert!(store.snapshots_for_hour("dep-1", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn billing_store_unfolded_hours_and_mark_folded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    store
        .save_snapshots(&[
            snap("dep-1", 2 * HOUR + 5),
            snap("dep-1", HOUR + 5),
            snap("dep-1", HOUR + 65_000),
        ])
        .await
        .unwrap();

    let unfolded = store.unfolded_hours(i64::MAX).await.unwrap();
    assert_eq!(
        unfolded,
        vec![("dep-1".to_string(), HOUR), ("dep-1".to_string(), 2 * HOUR)]
    );

    // the cutoff excludes hours at or after it
    let early = store.unfolded_hours(2 * HOUR).await.unwrap();
    assert_eq!(early, vec![("dep-1".to_string(), HOUR)]);

    let folded = store.mark_folded("dep-1", HOUR).await.unwrap();
    assert_eq!(folded, 2);
    let unfolded = store.unfolded_hours(i64::MAX).await.unwrap();
    assert_eq!(unfolded, vec![("dep-1".to_string(), 2 * HOUR)]);
}

#[tokio::test]
async fn billing_store_cleanup_deletes_only_folded_snapshots() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let now = 100 * HOUR;
    let old_hour = now - 50 * HOUR;
    store
        .save_snapshots(&[
            snap("dep-1", old_hour + 1_000),
            snap("dep-2", old_hour + 2_000),
            snap("dep-1", now - 1_000),
        ])
        .await
        .unwrap();
    store.mark_folded("dep-1", old_hour).await.unwrap();

    // dep-2's old snapshot is unfolded and must survive
    let deleted = store.cleanup_snapshots(24, now).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        store.snapshots_for_hour("dep-2", old_hour).await.unwrap().len(),
        1
    );
    assert!(store.snapshots_for_hour("dep-1", old_hour).await.unwrap().is_empty());
}

#[tokio::test]
async fn billing_store_hourly_versions_append_and_latest_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let hour = 24 * HOUR;
    assert!(store.max_hourly_version("dep-1", hour).await.unwrap().is_none());
    assert!(store.latest_finalized_hour("dep-1").await.unwrap().is_none());

    store
        .save_hourly(&hourly("dep-1", hour, 1, dec!(0.01)))
        .await
        .unwrap();
    store
        .save_hourly(&hourly("dep-1", hour, 2, dec!(0.02)))
        .await
        .unwrap();
    store
        .save_hourly(&hourly("dep-1", hour + HOUR, 1, dec!(0.05)))
        .await
        .unwrap();

    assert_eq!(store.max_hourly_version("dep-1", hour).await.unwrap(), Some(2));
    assert_eq!(
        store.latest_finalized_hour("dep-1").await.unwrap(),
        Some(hour + HOUR)
    );

    let rows = store
        .hourly_for_deployment("dep-1", 0, i64::MAX)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].hour_start, hour);
    assert_eq!(rows[0].version, 2);
    assert_eq!(rows[0].total_cost, dec!(0.02));
    assert_eq!(rows[1].hour_start, hour + HOUR);
    assert_eq!(rows[1].version, 1);
}

#[tokio::test]
async fn billing_store_deployments_with_hours_filters_by_range() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    store
        .save_hourly(&hourly("dep-1", HOUR, 1, dec!(0.01)))
        .await
        .unwrap();
    store
        .save_hourly(&hourly("dep-2", 5 * HOUR, 1, dec!(0.01)))
        .await
        .unwrap();

    let in_range = store.deployments_with_hours(0, 2 * HOUR).await.unwrap();
    assert_eq!(in_range, vec!["dep-1".to_string()]);
    let all = store.deployments_with_hours(0, i64::MAX).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn billing_store_daily_replace_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let day = 3 * DAY_MS;
    store
        .replace_daily(&daily("dep-1", "user-1", day, dec!(0.40)))
        .await
        .unwrap();
    store
        .replace_daily(&daily("dep-1", "user-1", day, dec!(0.55)))
        .await
        .unwrap();

    let rows = store
        .daily_for_user("user-1", day, day + DAY_MS)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_cost, dec!(0.55));
    assert_eq!(rows[0].hours_counted, 24);

    let by_dep = store
        .daily_for_deployment("dep-1", 0, i64::MAX)
        .await
        .unwrap();
    assert_eq!(by_dep.len(), 1);

    let users = store.users_with_days(day, day + DAY_MS).await.unwrap();
    assert_eq!(users, vec!["user-1".to_string()]);
    assert!(store.users_with_days(0, day).await.unwrap().is_empty());
}

#[tokio::test]
async fn billing_store_monthly_replace_and_fetch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    let summary = MonthlySummary {
        user_id: "user-1".into(),
        month: "2026-02".into(),
        cpu_cost: dec!(3.10),
        memory_cost: dec!(1.20),
        network_cost: dec!(0.45),
        storage_cost: dec!(0.30),
        total_cost: dec!(5.05),
        cpu_hours: dec!(70),
        memory_gb_hours: dec!(200),
        network_gb: dec!(5),
        deployment_count: 2,
        computed_at: 1_000,
    };
    store.replace_monthly(&summary).await.unwrap();

    let mut updated = summary.clone();
    updated.total_cost = dec!(6.00);
    store.replace_monthly(&updated).await.unwrap();

    let mut january = summary.clone();
    january.month = "2026-01".into();
    store.replace_monthly(&january).await.unwrap();

    let months = store.monthly_for_user("user-1").await.unwrap();
    assert_eq!(months.len(), 2);
    assert_eq!(months[0].month, "2026-01");
    assert_eq!(months[1].month, "2026-02");
    assert_eq!(months[1].total_cost, dec!(6.00));
    assert_eq!(months[1].deployment_count, 2);
}

#[tokio::test]
async fn billing_store_pricing_rates_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    assert!(store.load_pricing_rates().await.unwrap().is_empty());

    store
        .insert_pricing_rate(&PricingRate {
            resource_type: ResourceType::Cpu,
            deployment_type: DeploymentType::Acp,
            price: dec!(0.0416),
            unit: RateUnit::PerHour,
            currency: "USD".into(),
            effective_from: 0,
        })
        .await
        .unwrap();
    store
        .insert_pricing_rate(&PricingRate {
            resource_type: ResourceType::Storage,
            deployment_type: DeploymentType::Persistent,
            price: dec!(0.10),
            unit: RateUnit::PerGbMonth,
            currency: "USD".into(),
            effective_from: 9_000,
        })
        .await
        .unwrap();

    let rates = store.load_pricing_rates().await.unwrap();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[0].resource_type, ResourceType::Cpu);
    assert_eq!(rates[0].price, dec!(0.0416));
    assert_eq!(rates[0].unit, RateUnit::PerHour);
    assert_eq!(rates[1].deployment_type, DeploymentType::Persistent);
    assert_eq!(rates[1].effective_from, 9_000);
}

#[tokio::test]
async fn billing_store_budget_set_get_and_clear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();

    assert!(store.get_budget("user-1").await.unwrap().is_none());

    store
        .set_budget("user-1", Some(dec!(100.50)), 1_000)
        .await
        .unwrap();
    assert_eq!(store.get_budget("user-1").await.unwrap(), Some(dec!(100.50)));

    store
        .set_budget("user-1", Some(dec!(75)), 2_000)
        .await
        .unwrap();
    assert_eq!(store.get_budget("user-1").await.unwrap(), Some(dec!(75)));

    store.set_budget("user-1", None, 3_000).await.unwrap();
    assert!(store.get_budget("user-1").await.unwrap().is_none());
}

#[tokio::test]
async fn billing_store_prune_drops_hourly_and_daily_past_retention() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    // 1 day of retention
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 1)
        .await
        .unwrap();
    store.init().await.unwrap();

    let now = 30 * DAY_MS;
    store
        .save_hourly(&hourly("dep-1", now - 3 * DAY_MS, 1, dec!(0.01)))
        .await
        .unwrap();
    store
        .save_hourly(&hourly("dep-1", now - HOUR, 1, dec!(0.02)))
        .await
        .unwrap();
    store
        .replace_daily(&daily("dep-1", "user-1", now - 3 * DAY_MS, dec!(0.24)))
        .await
        .unwrap();
    store
        .replace_daily(&daily("dep-1", "user-1", day_start_ms(now - HOUR), dec!(0.48)))
        .await
        .unwrap();

    let pruned = store.prune_old_aggregates(now).await.unwrap();
    assert_eq!(pruned, 2);

    let hours = store
        .hourly_for_deployment("dep-1", 0, i64::MAX)
        .await
        .unwrap();
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0].hour_start, now - HOUR);
    let days = store.daily_for_user("user-1", 0, i64::MAX).await.unwrap();
    assert_eq!(days.len(), 1);

    // monthly summaries survive any retention window
    store
        .replace_monthly(&MonthlySummary {
            user_id: "user-1".into(),
            month: "1970-01".into(),
            cpu_cost: Decimal::ZERO,
            memory_cost: Decimal::ZERO,
            network_cost: Decimal::ZERO,
            storage_cost: Decimal::ZERO,
            total_cost: dec!(1.23),
            cpu_hours: Decimal::ZERO,
            memory_gb_hours: Decimal::ZERO,
            network_gb: Decimal::ZERO,
            deployment_count: 1,
            computed_at: 0,
        })
        .await
        .unwrap();
    store.prune_old_aggregates(now).await.unwrap();
    assert_eq!(store.monthly_for_user("user-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn billing_store_vacuum_runs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("billing.db");
    let store = BillingStore::connect(path.to_str().unwrap(), 3, 90)
        .await
        .unwrap();
    store.init().await.unwrap();
    store.vacuum().await.unwrap();
}
