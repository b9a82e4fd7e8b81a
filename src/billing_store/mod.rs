// SQLite billing store. Snapshots are raw samples; hourly rows are
// append-only and versioned; daily and monthly rows are replaced
// wholesale on rollup. Money columns are TEXT-encoded decimals and all
// summing happens in Rust.

use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use crate::models::{
    DailyAggregate, Deployment, DeploymentStatus, DeploymentType, HourlyAggregate, HOUR_MS,
    MonthlySummary, PricingRate, RateUnit, ResourceSnapshot, ResourceType,
};

pub struct BillingStore {
    pool: SqlitePool,
    retention_ms: i64,
}

impl BillingStore {
    pub async fn connect(path: &str, max_pool_size: u32, retention_days: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self { pool, retention_ms })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                hiring_id TEXT NOT NULL,
                container_name TEXT NOT NULL,
                deployment_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                terminated_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deployment_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                deployment_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_bytes INTEGER NOT NULL,
                memory_limit_bytes INTEGER NOT NULL,
                network_rx_bytes INTEGER NOT NULL,
                network_tx_bytes INTEGER NOT NULL,
                block_read_bytes INTEGER NOT NULL,
                block_write_bytes INTEGER NOT NULL,
                status TEXT NOT NULL,
                elapsed_seconds INTEGER NOT NULL,
                folded INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_deployment_time
             ON snapshots(deployment_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_folded ON snapshots(folded, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hourly_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deployment_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                deployment_type TEXT NOT NULL,
                hour_start INTEGER NOT NULL,
                snapshot_count INTEGER NOT NULL,
                unpriced_snapshot_count INTEGER NOT NULL,
                cpu_cost TEXT NOT NULL,
                memory_cost TEXT NOT NULL,
                network_cost TEXT NOT NULL,
                storage_cost TEXT NOT NULL,
                total_cost TEXT NOT NULL,
                avg_cpu_percent REAL NOT NULL,
                avg_memory_gb REAL NOT NULL,
                cpu_hours TEXT NOT NULL,
                memory_gb_hours TEXT NOT NULL,
                network_gb TEXT NOT NULL,
                version INTEGER NOT NULL,
                finalized_at INTEGER NOT NULL,
                UNIQUE(deployment_id, hour_start, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hourly_user_time
             ON hourly_aggregates(user_id, hour_start)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deployment_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                deployment_type TEXT NOT NULL,
                day_start INTEGER NOT NULL,
                hours_counted INTEGER NOT NULL,
                snapshot_count INTEGER NOT NULL,
                unpriced_snapshot_count INTEGER NOT NULL,
                cpu_cost TEXT NOT NULL,
                memory_cost TEXT NOT NULL,
                network_cost TEXT NOT NULL,
                storage_cost TEXT NOT NULL,
                total_cost TEXT NOT NULL,
                cpu_hours TEXT NOT NULL,
                memory_gb_hours TEXT NOT NULL,
                network_gb TEXT NOT NULL,
                computed_at INTEGER NOT NULL,
                UNIQUE(deployment_id, day_start)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_daily_user_time
             ON daily_aggregates(user_id, day_start)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monthly_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                month TEXT NOT NULL,
                cpu_cost TEXT NOT NULL,
                memory_cost TEXT NOT NULL,
                network_cost TEXT NOT NULL,
                storage_cost TEXT NOT NULL,
                total_cost TEXT NOT NULL,
                cpu_hours TEXT NOT NULL,
                memory_gb_hours TEXT NOT NULL,
                network_gb TEXT NOT NULL,
                deployment_count INTEGER NOT NULL,
                computed_at INTEGER NOT NULL,
                UNIQUE(user_id, month)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pricing_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_type TEXT NOT NULL,
                deployment_type TEXT NOT NULL,
                price TEXT NOT NULL,
                unit TEXT NOT NULL,
                currency TEXT NOT NULL,
                effective_from INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS budgets (
                user_id TEXT PRIMARY KEY,
                monthly_budget TEXT,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- deployments ---

    /// Register a deployment mapping. Returns false when the id is
    /// already taken.
    #[instrument(skip(self, d), fields(repo = "billing", operation = "insert_deployment", deployment_id = %d.id))]
    pub async fn insert_deployment(&self, d: &Deployment) -> anyhow::Result<bool> {
        let r = sqlx::query(
            "INSERT OR IGNORE INTO deployments
             (id, user_id, agent_id, hiring_id, container_name, deployment_type, created_at, terminated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&d.id)
        .bind(&d.user_id)
        .bind(&d.agent_id)
        .bind(&d.hiring_id)
        .bind(&d.container_name)
        .bind(d.deployment_type.as_str())
        .bind(d.created_at)
        .bind(d.terminated_at)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    pub async fn get_deployment(&self, id: &str) -> anyhow::Result<Option<Deployment>> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::parse_deployment_row(&r)).transpose()
    }

    pub async fn list_active_deployments(&self) -> anyhow::Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments WHERE terminated_at IS NULL")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_deployment_row).collect()
    }

    pub async fn list_deployments_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_deployment_row).collect()
    }

    #[instrument(skip(self), fields(repo = "billing", operation = "set_terminated"))]
    pub async fn set_terminated(&self, id: &str, at_ms: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE deployments SET terminated_at = $1 WHERE id = $2 AND terminated_at IS NULL")
            .bind(at_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- snapshots ---

    #[instrument(skip(self, snapshots), fields(repo = "billing", operation = "save_snapshots", snapshots_count = snapshots.len()))]
    pub async fn save_snapshots(&self, snapshots: &[ResourceSnapshot]) -> anyhow::Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in snapshots {
            sqlx::query(
                "INSERT INTO snapshots
                 (deployment_id, user_id, deployment_type, created_at, cpu_percent,
                  memory_bytes, memory_limit_bytes, network_rx_bytes, network_tx_bytes,
                  block_read_bytes, block_write_bytes, status, elapsed_seconds, folded)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0)",
            )
            .bind(&s.deployment_id)
            .bind(&s.user_id)
            .bind(s.deployment_type.as_str())
            .bind(s.timestamp)
            .bind(s.cpu_percent)
            .bind(s.memory_bytes as i64)
            .bind(s.memory_limit_bytes as i64)
            .bind(s.network_rx_bytes as i64)
            .bind(s.network_tx_bytes as i64)
            .bind(s.block_read_bytes as i64)
            .bind(s.block_write_bytes as i64)
            .bind(s.status.as_str())
            .bind(s.elapsed_seconds as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Snapshots of one deployment hour, ascending. Folded or not;
    /// recompute replays from here.
    #[instrument(skip(self), fields(repo = "billing", operation = "snapshots_for_hour"))]
    pub async fn snapshots_for_hour(
        &self,
        deployment_id: &str,
        hour_start: i64,
    ) -> anyhow::Result<Vec<ResourceSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots
             WHERE deployment_id = $1 AND created_at >= $2 AND created_at < $3
             ORDER BY created_at ASC",
        )
        .bind(deployment_id)
        .bind(hour_start)
        .bind(hour_start + HOUR_MS)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_snapshot_row).collect()
    }

    #[instrument(skip(self), fields(repo = "billing", operation = "mark_folded"))]
    pub async fn mark_folded(&self, deployment_id: &str, hour_start: i64) -> anyhow::Result<u64> {
        let r = sqlx::query(
            "UPDATE snapshots SET folded = 1
             WHERE deployment_id = $1 AND created_at >= $2 AND created_at < $3",
        )
        .bind(deployment_id)
        .bind(hour_start)
        .bind(hour_start + HOUR_MS)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// (deployment_id, hour_start) pairs that still have unfolded
    /// snapshots strictly before `before_ms`. Startup recovery walks
    /// these.
    pub async fn unfolded_hours(&self, before_ms: i64) -> anyhow::Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT deployment_id, (created_at - created_at % 3600000) AS hour_start
             FROM snapshots WHERE folded = 0 AND created_at < $1
             ORDER BY hour_start ASC",
        )
        .bind(before_ms)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let deployment_id: String = row.try_get("deployment_id")?;
            let hour_start: i64 = row.try_get("hour_start")?;
            out.push((deployment_id, hour_start));
        }
        Ok(out)
    }

    /// Delete folded snapshots older than `max_age_hours`. Unfolded
    /// rows are never compacted away.
    #[instrument(skip(self), fields(repo = "billing", operation = "cleanup_snapshots"))]
    pub async fn cleanup_snapshots(&self, max_age_hours: u32, now_ms: i64) -> anyhow::Result<u64> {
        let cutoff = now_ms - (max_age_hours as i64) * HOUR_MS;
        let r = sqlx::query("DELETE FROM snapshots WHERE folded = 1 AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    // --- hourly aggregates ---

    #[instrument(skip(self, agg), fields(repo = "billing", operation = "save_hourly", deployment_id = %agg.deployment_id, hour_start = agg.hour_start, version = agg.version))]
    pub async fn save_hourly(&self, agg: &HourlyAggregate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO hourly_aggregates
             (deployment_id, user_id, deployment_type, hour_start, snapshot_count,
              unpriced_snapshot_count, cpu_cost, memory_cost, network_cost, storage_cost,
              total_cost, avg_cpu_percent, avg_memory_gb, cpu_hours, memory_gb_hours,
              network_gb, version, finalized_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&agg.deployment_id)
        .bind(&agg.user_id)
        .bind(agg.deployment_type.as_str())
        .bind(agg.hour_start)
        .bind(agg.snapshot_count as i64)
        .bind(agg.unpriced_snapshot_count as i64)
        .bind(agg.cpu_cost.to_string())
        .bind(agg.memory_cost.to_string())
        .bind(agg.network_cost.to_string())
        .bind(agg.storage_cost.to_string())
        .bind(agg.total_cost.to_string())
        .bind(agg.avg_cpu_percent)
        .bind(agg.avg_memory_gb)
        .bind(agg.cpu_hours.to_string())
        .bind(agg.memory_gb_hours.to_string())
        .bind(agg.network_gb.to_string())
        .bind(agg.version)
        .bind(agg.finalized_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn max_hourly_version(
        &self,
        deployment_id: &str,
        hour_start: i64,
    ) -> anyhow::Result<Option<i64>> {
        let v = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM hourly_aggregates
             WHERE deployment_id = $1 AND hour_start = $2",
        )
        .bind(deployment_id)
        .bind(hour_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(v)
    }

    /// Latest finalized hour boundary for a deployment, if any.
    pub async fn latest_finalized_hour(&self, deployment_id: &str) -> anyhow::Result<Option<i64>> {
        let v = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(hour_start) FROM hourly_aggregates WHERE deployment_id = $1",
        )
        .bind(deployment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(v)
    }

    /// Highest-version hourly rows for one deployment in
    /// [from, to), ascending by hour.
    #[instrument(skip(self), fields(repo = "billing", operation = "hourly_for_deployment"))]
    pub async fn hourly_for_deployment(
        &self,
        deployment_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<HourlyAggregate>> {
        let rows = sqlx::query(
            "SELECT h.* FROM hourly_aggregates h
             JOIN (SELECT deployment_id, hour_start, MAX(version) AS v
                   FROM hourly_aggregates
                   WHERE deployment_id = $1 AND hour_start >= $2 AND hour_start < $3
                   GROUP BY deployment_id, hour_start) m
             ON h.deployment_id = m.deployment_id
                AND h.hour_start = m.hour_start
                AND h.version = m.v
             ORDER BY h.hour_start ASC",
        )
        .bind(deployment_id)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_hourly_row).collect()
    }

    /// Deployments that have any hourly row in [from, to).
    pub async fn deployments_with_hours(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT deployment_id FROM hourly_aggregates
             WHERE hour_start >= $1 AND hour_start < $2",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- daily aggregates ---

    #[instrument(skip(self, agg), fields(repo = "billing", operation = "replace_daily", deployment_id = %agg.deployment_id, day_start = agg.day_start))]
    pub async fn replace_daily(&self, agg: &DailyAggregate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO daily_aggregates
             (deployment_id, user_id, deployment_type, day_start, hours_counted,
              snapshot_count, unpriced_snapshot_count, cpu_cost, memory_cost, network_cost,
              storage_cost, total_cost, cpu_hours, memory_gb_hours, network_gb, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&agg.deployment_id)
        .bind(&agg.user_id)
        .bind(agg.deployment_type.as_str())
        .bind(agg.day_start)
        .bind(agg.hours_counted as i64)
        .bind(agg.snapshot_count as i64)
        .bind(agg.unpriced_snapshot_count as i64)
        .bind(agg.cpu_cost.to_string())
        .bind(agg.memory_cost.to_string())
        .bind(agg.network_cost.to_string())
        .bind(agg.storage_cost.to_string())
        .bind(agg.total_cost.to_string())
        .bind(agg.cpu_hours.to_string())
        .bind(agg.memory_gb_hours.to_string())
        .bind(agg.network_gb.to_string())
        .bind(agg.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "billing", operation = "daily_for_user"))]
    pub async fn daily_for_user(
        &self,
        user_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<DailyAggregate>> {
        let rows = sqlx::query(
            "SELECT * FROM daily_aggregates
             WHERE user_id = $1 AND day_start >= $2 AND day_start < $3
             ORDER BY day_start ASC",
        )
        .bind(user_id)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_daily_row).collect()
    }

    pub async fn daily_for_deployment(
        &self,
        deployment_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<DailyAggregate>> {
        let rows = sqlx::query(
            "SELECT * FROM daily_aggregates
             WHERE deployment_id = $1 AND day_start >= $2 AND day_start < $3
             ORDER BY day_start ASC",
        )
        .bind(deployment_id)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_daily_row).collect()
    }

    /// Users that have any daily row in [from, to).
    pub async fn users_with_days(&self, from_ms: i64, to_ms: i64) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM daily_aggregates
             WHERE day_start >= $1 AND day_start < $2",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- monthly summaries ---

    #[instrument(skip(self, summary), fields(repo = "billing", operation = "replace_monthly", user_id = %summary.user_id, month = %summary.month))]
    pub async fn replace_monthly(&self, summary: &MonthlySummary) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO monthly_summaries
             (user_id, month, cpu_cost, memory_cost, network_cost, storage_cost, total_cost,
              cpu_hours, memory_gb_hours, network_gb, deployment_count, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&summary.user_id)
        .bind(&summary.month)
        .bind(summary.cpu_cost.to_string())
        .bind(summary.memory_cost.to_string())
        .bind(summary.network_cost.to_string())
        .bind(summary.storage_cost.to_string())
        .bind(summary.total_cost.to_string())
        .bind(summary.cpu_hours.to_string())
        .bind(summary.memory_gb_hours.to_string())
        .bind(summary.network_gb.to_string())
        .bind(summary.deployment_count as i64)
        .bind(summary.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn monthly_for_user(&self, user_id: &str) -> anyhow::Result<Vec<MonthlySummary>> {
        let rows = sqlx::query(
            "SELECT * FROM monthly_summaries WHERE user_id = $1 ORDER BY month ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::parse_monthly_row).collect()
    }

    // --- pricing ---

    #[instrument(skip(self, rate), fields(repo = "billing", operation = "insert_pricing_rate"))]
    pub async fn insert_pricing_rate(&self, rate: &PricingRate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO pricing_rates
             (resource_type, deployment_type, price, unit, currency, effective_from)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(rate.resource_type.as_str())
        .bind(rate.deployment_type.as_str())
        .bind(rate.price.to_string())
        .bind(rate.unit.as_str())
        .bind(&rate.currency)
        .bind(rate.effective_from)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_pricing_rates(&self) -> anyhow::Result<Vec<PricingRate>> {
        let rows = sqlx::query("SELECT * FROM pricing_rates ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_pricing_row).collect()
    }

    // --- budgets ---

    #[instrument(skip(self), fields(repo = "billing", operation = "set_budget"))]
    pub async fn set_budget(
        &self,
        user_id: &str,
        monthly_budget: Option<Decimal>,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO budgets (user_id, monthly_budget, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT(user_id) DO UPDATE SET monthly_budget = $2, updated_at = $3",
        )
        .bind(user_id)
        .bind(monthly_budget.map(|b| b.to_string()))
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_budget(&self, user_id: &str) -> anyhow::Result<Option<Decimal>> {
        let row = sqlx::query("SELECT monthly_budget FROM budgets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: Option<String> = row.try_get("monthly_budget")?;
        raw.map(|s| parse_decimal(&s)).transpose()
    }

    // --- maintenance ---

    /// Drop hourly and daily rows past retention. Monthly summaries
    /// are permanent.
    #[instrument(skip(self), fields(repo = "billing", operation = "prune_old_aggregates"))]
    pub async fn prune_old_aggregates(&self, now_ms: i64) -> anyhow::Result<u64> {
        let cutoff = now_ms - self.retention_ms;
        let hourly = sqlx::query("DELETE FROM hourly_aggregates WHERE hour_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let daily = sqlx::query("DELETE FROM daily_aggregates WHERE day_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(hourly.rows_affected() + daily.rows_affected())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "billing", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    // --- row parsing ---

    fn parse_deployment_row(row: &SqliteRow) -> anyhow::Result<Deployment> {
        let type_raw: String = row.try_get("deployment_type")?;
        Ok(Deployment {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            agent_id: row.try_get("agent_id")?,
            hiring_id: row.try_get("hiring_id")?,
            container_name: row.try_get("container_name")?,
            deployment_type: parse_deployment_type(&type_raw)?,
            created_at: row.try_get("created_at")?,
            terminated_at: row.try_get("terminated_at")?,
        })
    }

    fn parse_snapshot_row(row: &SqliteRow) -> anyhow::Result<ResourceSnapshot> {
        let type_raw: String = row.try_get("deployment_type")?;
        let status_raw: String = row.try_get("status")?;
        Ok(ResourceSnapshot {
            timestamp: row.try_get("created_at")?,
            deployment_id: row.try_get("deployment_id")?,
            user_id: row.try_get("user_id")?,
            deployment_type: parse_deployment_type(&type_raw)?,
            cpu_percent: row.try_get("cpu_percent")?,
            memory_bytes: row.try_get::<i64, _>("memory_bytes")? as u64,
            memory_limit_bytes: row.try_get::<i64, _>("memory_limit_bytes")? as u64,
            network_rx_bytes: row.try_get::<i64, _>("network_rx_bytes")? as u64,
            network_tx_bytes: row.try_get::<i64, _>("network_tx_bytes")? as u64,
            block_read_bytes: row.try_get::<i64, _>("block_read_bytes")? as u64,
            block_write_bytes: row.try_get::<i64, _>("block_write_bytes")? as u64,
            status: DeploymentStatus::parse(&status_raw)
                .ok_or_else(|| anyhow::anyhow!("unknown status {status_raw:?}"))?,
            elapsed_seconds: row.try_get::<i64, _>("elapsed_seconds")? as u32,
        })
    }

    fn parse_hourly_row(row: &SqliteRow) -> anyhow::Result<HourlyAggregate> {
        let type_raw: String = row.try_get("deployment_type")?;
        Ok(HourlyAggregate {
            deployment_id: row.try_get("deployment_id")?,
            user_id: row.try_get("user_id")?,
            deployment_type: parse_deployment_type(&type_raw)?,
            hour_start: row.try_get("hour_start")?,
            snapshot_count: row.try_get::<i64, _>("snapshot_count")? as u32,
            unpriced_snapshot_count: row.try_get::<i64, _>("unpriced_snapshot_count")? as u32,
            cpu_cost: parse_decimal(&row.try_get::<String, _>("cpu_cost")?)?,
            memory_cost: parse_decimal(&row.try_get::<String, _>("memory_cost")?)?,
            network_cost: parse_decimal(&row.try_get::<String, _>("network_cost")?)?,
            storage_cost: parse_decimal(&row.try_get::<String, _>("storage_cost")?)?,
            total_cost: parse_decimal(&row.try_get::<String, _>("total_cost")?)?,
            avg_cpu_percent: row.try_get("avg_cpu_percent")?,
            avg_memory_gb: row.try_get("avg_memory_gb")?,
            cpu_hours: parse_decimal(&row.try_get::<String, _>("cpu_hours")?)?,
            memory_gb_hours: parse_decimal(&row.try_get::<String, _>("memory_gb_hours")?)?,
            network_gb: parse_decimal(&row.try_get::<String, _>("network_gb")?)?,
            version: row.try_get("version")?,
            finalized_at: row.try_get("finalized_at")?,
        })
    }

    fn parse_daily_row(row: &SqliteRow) -> anyhow::Result<DailyAggregate> {
        let type_raw: String = row.try_get("deployment_type")?;
        Ok(DailyAggregate {
            deployment_id: row.try_get("deployment_id")?,
            user_id: row.try_get("user_id")?,
            deployment_type: parse_deployment_type(&type_raw)?,
            day_start: row.try_get("day_start")?,
            hours_counted: row.try_get::<i64, _>("hours_counted")? as u32,
            snapshot_count: row.try_get::<i64, _>("snapshot_count")? as u32,
            unpriced_snapshot_count: row.try_get::<i64, _>("unpriced_snapshot_count")? as u32,
            cpu_cost: parse_decimal(&row.try_get::<String, _>("cpu_cost")?)?,
            memory_cost: parse_decimal(&row.try_get::<String, _>("memory_cost")?)?,
            network_cost: parse_decimal(&row.try_get::<String, _>("network_cost")?)?,
            storage_cost: parse_decimal(&row.try_get::<String, _>("storage_cost")?)?,
            total_cost: parse_decimal(&row.try_get::<String, _>("total_cost")?)?,
            cpu_hours: parse_decimal(&row.try_get::<String, _>("cpu_hours")?)?,
            memory_gb_hours: parse_decimal(&row.try_get::<String, _>("memory_gb_hours")?)?,
            network_gb: parse_decimal(&row.try_get::<String, _>("network_gb")?)?,
            computed_at: row.try_get("computed_at")?,
        })
    }

    fn parse_monthly_row(row: &SqliteRow) -> anyhow::Result<MonthlySummary> {
        Ok(MonthlySummary {
            user_id: row.try_get("user_id")?,
            month: row.try_get("month")?,
            cpu_cost: parse_decimal(&row.try_get::<String, _>("cpu_cost")?)?,
            memory_cost: parse_decimal(&row.try_get::<String, _>("memory_cost")?)?,
            network_cost: parse_decimal(&row.try_get::<String, _>("network_cost")?)?,
            storage_cost: parse_decimal(&row.try_get::<String, _>("storage_cost")?)?,
            total_cost: parse_decimal(&row.try_get::<String, _>("total_cost")?)?,
            cpu_hours: parse_decimal(&row.try_get::<String, _>("cpu_hours")?)?,
            memory_gb_hours: parse_decimal(&row.try_get::<String, _>("memory_gb_hours")?)?,
            network_gb: parse_decimal(&row.try_get::<String, _>("network_gb")?)?,
            deployment_count: row.try_get::<i64, _>("deployment_count")? as u32,
            computed_at: row.try_get("computed_at")?,
        })
    }

    fn parse_pricing_row(row: &SqliteRow) -> anyhow::Result<PricingRate> {
        let resource_raw: String = row.try_get("resource_type")?;
        let type_raw: String = row.try_get("deployment_type")?;
        let unit_raw: String = row.try_get("unit")?;
        Ok(PricingRate {
            resource_type: ResourceType::parse(&resource_raw)
                .ok_or_else(|| anyhow::anyhow!("unknown resource type {resource_raw:?}"))?,
            deployment_type: parse_deployment_type(&type_raw)?,
            price: parse_decimal(&row.try_get::<String, _>("price")?)?,
            unit: RateUnit::parse(&unit_raw)
                .ok_or_else(|| anyhow::anyhow!("unknown rate unit {unit_raw:?}"))?,
            currency: row.try_get("currency")?,
            effective_from: row.try_get("effective_from")?,
        })
    }
}

fn parse_deployment_type(s: &str) -> anyhow::Result<DeploymentType> {
    DeploymentType::parse(s).ok_or_else(|| anyhow::anyhow!("unknown deployment type {s:?}"))
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).map_err(|e| anyhow::anyhow!("bad decimal {s:?}: {e}"))
}
