use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::Result;
use meterd::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(
        billing_store::BillingStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
        )
        .await?,
    );
    store.init().await?;

    let mut rates = store.load_pricing_rates().await?;
    if rates.is_empty() {
        for rate in pricing::default_rates() {
            store.insert_pricing_rate(&rate).await?;
        }
        rates = store.load_pricing_rates().await?;
        tracing::info!(rates = rates.len(), "seeded default pricing rates");
    }
    let shared_pricing = Arc::new(pricing::SharedPricing::new(
        pricing::PricingTable::from_rates(1, rates),
    ));

    let exposition = Arc::new(metrics::ExpositionMetrics::new()?);
    let grace_ms = app_config.metering.grace_ms();
    let aggregator = Arc::new(aggregator::Aggregator::new(
        store.clone(),
        shared_pricing.clone(),
        grace_ms,
    ));

    let rollup_config = rollup_worker::RollupWorkerConfig {
        sweep_interval_secs: app_config.rollup.sweep_interval_secs,
        daily_refresh_days: app_config.rollup.daily_refresh_days,
        stats_log_interval_secs: app_config.rollup.stats_log_interval_secs,
        vacuum_schedule: app_config.rollup.vacuum_schedule.clone(),
        vacuum_interval_secs: app_config.rollup.vacuum_interval_secs,
    };
    backfill::run_backfill(store.clone(), aggregator.clone(), &rollup_config).await?;

    let snapshots_saved_total = Arc::new(AtomicU64::new(0));
    let (write_tx, write_rx) = tokio::sync::mpsc::channel(collector::writer_channel_capacity(
        app_config.database.flush_rate,
    ));
    let (writer_shutdown_tx, writer_shutdown_rx) = tokio::sync::oneshot::channel();
    let writer_handle = collector::spawn_snapshot_writer(
        write_rx,
        store.clone(),
        collector::SnapshotWriterConfig {
            flush_rate: app_config.database.flush_rate,
            flush_interval_secs: app_config.database.flush_interval_secs,
        },
        snapshots_saved_total.clone(),
        writer_shutdown_rx,
    );

    let docker = Arc::new(docker_repo::DockerRepo::connect()?);
    let metrics_collector = Arc::new(collector::MetricsCollector::new(
        docker,
        store.clone(),
        aggregator.clone(),
        exposition.clone(),
        write_tx,
        collector::CollectorConfig {
            sample_interval_ms: app_config.metering.sample_interval_ms,
            failure_threshold: app_config.metering.failure_threshold,
        },
    ));
    let resumed = metrics_collector.resume_active().await?;
    tracing::info!(deployments = resumed, "resumed tracking active deployments");

    let rollup_handle = rollup_worker::spawn(
        store.clone(),
        aggregator.clone(),
        rollup_config,
        snapshots_saved_total.clone(),
    );

    let query = Arc::new(query::QueryService::new(
        store.clone(),
        shared_pricing.clone(),
        grace_ms,
    ));

    let app = routes::app(
        store,
        shared_pricing,
        aggregator,
        metrics_collector,
        query,
        exposition,
    );
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                rollup_handle.abort();
                let _ = writer_shutdown_tx.send(());
                let _ = writer_handle.await;
            }
        }
    }

    Ok(())
}
