// Startup recovery: replay unfolded snapshot hours and rebuild recent
// rollups once before the workers take over.

use std::sync::Arc;

use tracing::info;

use crate::aggregator::Aggregator;
use crate::billing_store::BillingStore;
use crate::rollup_worker::{RollupWorkerConfig, run_one_sweep};

/// Runs one rollup sweep so hours interrupted by a crash or restart
/// are finalized before new samples arrive.
pub async fn run_backfill(
    store: Arc<BillingStore>,
    aggregator: Arc<Aggregator>,
    config: &RollupWorkerConfig,
) -> anyhow::Result<()> {
    run_one_sweep(store.as_ref(), aggregator.as_ref(), config).await?;
    info!("startup backfill complete");
    Ok(())
}
