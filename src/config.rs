use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub metering: MeteringConfig,
    pub rollup: RollupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Snapshot writer flushes once this many samples are buffered.
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Hourly and daily aggregates older than this are pruned. Monthly
    /// summaries are kept forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeteringConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Consecutive failed sampling cycles before a deployment is
    /// treated as stopped.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Grace window after an hour closes, as a multiple of the
    /// sampling interval. Late samples inside the window still land.
    #[serde(default = "default_grace_multiplier")]
    pub grace_multiplier: u32,
}

fn default_sample_interval_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_grace_multiplier() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Days back from today whose daily rows are rebuilt each sweep.
    #[serde(default = "default_daily_refresh_days")]
    pub daily_refresh_days: u32,
    /// How often to log metering stats (open buckets, snapshots saved) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_daily_refresh_days() -> u32 {
    2
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

impl MeteringConfig {
    /// Grace window in millis.
    pub fn grace_ms(&self) -> i64 {
        (self.grace_multiplier as i64) * (self.sample_interval_ms as i64)
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.metering.sample_interval_ms >= 1000,
            "metering.sample_interval_ms must be >= 1000, got {}",
            self.metering.sample_interval_ms
        );
        anyhow::ensure!(
            self.metering.sample_interval_ms <= 3_600_000,
            "metering.sample_interval_ms must fit within one hour, got {}",
            self.metering.sample_interval_ms
        );
        anyhow::ensure!(
            self.metering.failure_threshold > 0,
            "metering.failure_threshold must be > 0, got {}",
            self.metering.failure_threshold
        );
        anyhow::ensure!(
            self.metering.grace_multiplier > 0,
            "metering.grace_multiplier must be > 0, got {}",
            self.metering.grace_multiplier
        );
        anyhow::ensure!(
            self.rollup.sweep_interval_secs > 0,
            "rollup.sweep_interval_secs must be > 0, got {}",
            self.rollup.sweep_interval_secs
        );
        anyhow::ensure!(
            self.rollup.stats_log_interval_secs > 0,
            "rollup.stats_log_interval_secs must be > 0, got {}",
            self.rollup.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.rollup.vacuum_interval_secs > 0,
            "rollup.vacuum_interval_secs must be > 0, got {}",
            self.rollup.vacuum_interval_secs
        );
        Ok(())
    }
}
