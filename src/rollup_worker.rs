// Background worker: finalize due hourly buckets, recover unfolded
// hours, refresh daily and monthly rollups, prune old aggregates.
// VACUUM runs on a configurable schedule (cron expression or fixed
// interval).

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::aggregator::{Aggregator, rollup_day, rollup_month};
use crate::billing_store::BillingStore;
use crate::models::{DAY_MS, day_start_ms, month_start_back_ms, month_start_ms};

/// Config for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupWorkerConfig {
    pub sweep_interval_secs: u64,
    /// Days back from today whose daily rows are rebuilt each sweep.
    /// Today's partial row is always included.
    pub daily_refresh_days: u32,
    pub stats_log_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(
    store: Arc<BillingStore>,
    aggregator: Arc<Aggregator>,
    config: RollupWorkerConfig,
    snapshots_saved_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, aggregator, config, snapshots_saved_total).await;
    })
}

#[instrument(skip(store, aggregator, snapshots_saved_total), fields(interval_secs = config.sweep_interval_secs))]
async fn run(
    store: Arc<BillingStore>,
    aggregator: Arc<Aggregator>,
    config: RollupWorkerConfig,
    snapshots_saved_total: Arc<AtomicU64>,
) {
    let mut sweep_tick = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_tick =
        tokio::time::interval(Duration::from_secs(config.stats_log_interval_secs.max(1)));
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = sweep_tick.tick() => {
                if let Err(e) = run_one_sweep(&store, &aggregator, &config).await {
                    warn!(error = %e, "rollup sweep failed");
                }
            }
            _ = stats_tick.tick() => {
                info!(
                    open_buckets = aggregator.open_bucket_count(),
                    snapshots_saved_total = snapshots_saved_total.load(Ordering::Relaxed),
                    "metering stats"
                );
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: RollupWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Runs one sweep (finalize due hours, recover unfolded ones, rebuild
/// recent daily and monthly rollups, prune). Used by the worker loop
/// and by the startup backfill.
pub async fn run_one_sweep(
    store: &BillingStore,
    aggregator: &Aggregator,
    config: &RollupWorkerConfig,
) -> anyhow::Result<()> {
    let now_ms = chrono::Utc::now().timestamp_millis();

    let finalized = aggregator.finalize_due(now_ms).await?;
    let recovered = aggregator.recover_unfolded(now_ms).await?;

    let today = day_start_ms(now_ms);
    let mut refreshed_days = 0usize;
    for back in 0..=config.daily_refresh_days {
        let day_start = today - i64::from(back) * DAY_MS;
        refreshed_days += rollup_day(store, day_start, now_ms).await?;
    }

    // previous month keeps refreshing until its last day finalizes
    let mut refreshed_months = rollup_month(store, month_start_ms(now_ms), now_ms).await?;
    refreshed_months += rollup_month(store, month_start_back_ms(now_ms, 1), now_ms).await?;

    let pruned = store.prune_old_aggregates(now_ms).await?;

    if finalized + recovered > 0 {
        info!(
            finalized_hours = finalized,
            recovered_hours = recovered,
            refreshed_days,
            refreshed_months,
            pruned_rows = pruned,
            "rollup sweep"
        );
    }

    Ok(())
}
