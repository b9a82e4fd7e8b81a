// Config loading and validation tests

use meterd::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/billing.db"
max_pool_size = 10
flush_rate = 10

[metering]
sample_interval_ms = 1000

[rollup]
sweep_interval_secs = 60
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/billing.db");
    assert_eq!(config.database.flush_rate, 10);
    assert_eq!(config.metering.sample_interval_ms, 1000);
    assert_eq!(config.rollup.sweep_interval_secs, 60);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/billing.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_flush_rate_zero() {
    let bad = VALID_CONFIG.replace("flush_rate = 10", "flush_rate = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("flush_rate"));
}

#[test]
fn test_config_validation_rejects_sub_second_sample_interval() {
    let bad = VALID_CONFIG.replace("sample_interval_ms = 1000", "sample_interval_ms = 500");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("sample_interval_ms"));
}

#[test]
fn test_config_validation_rejects_sample_interval_over_an_hour() {
    let bad = VALID_CONFIG.replace("sample_interval_ms = 1000", "sample_interval_ms = 7200000");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("one hour"));
}

#[test]
fn test_config_validation_rejects_sweep_interval_zero() {
    let bad = VALID_CONFIG.replace("sweep_interval_secs = 60", "sweep_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("sweep_interval_secs"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.database.path, "data/billing.db");
}

#[test]
fn test_config_defaults_when_omitted() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");
    assert_eq!(config.database.flush_interval_secs, 10);
    assert_eq!(config.database.retention_days, 90);
    assert_eq!(config.metering.failure_threshold, 3);
    assert_eq!(config.metering.grace_multiplier, 2);
    assert_eq!(config.rollup.daily_refresh_days, 2);
    assert_eq!(config.rollup.stats_log_interval_secs, 300);
    assert!(config.rollup.vacuum_schedule.is_none());
    assert_eq!(config.rollup.vacuum_interval_secs, 86_400);
}

#[test]
fn test_grace_window_scales_with_sample_interval() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");
    // grace_multiplier defaults to 2
    assert_eq!(config.metering.grace_ms(), 2_000);
}

const VALID_CONFIG_FULL: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[database]
path = "data/billing.db"
max_pool_size = 10
flush_rate = 10
flush_interval_secs = 5
retention_days = 30

[metering]
sample_interval_ms = 30000
failure_threshold = 5
grace_multiplier = 3

[rollup]
sweep_interval_secs = 30
daily_refresh_days = 1
stats_log_interval_secs = 120
vacuum_schedule = "0 0 3 * * *"
vacuum_interval_secs = 43200
"#;

#[test]
fn test_config_loads_every_field() {
    let config = AppConfig::load_from_str(VALID_CONFIG_FULL).expect("valid");
    assert_eq!(config.database.flush_interval_secs, 5);
    assert_eq!(config.database.retention_days, 30);
    assert_eq!(config.metering.failure_threshold, 5);
    assert_eq!(config.metering.grace_ms(), 90_000);
    assert_eq!(config.rollup.daily_refresh_days, 1);
    assert_eq!(config.rollup.vacuum_schedule.as_deref(), Some("0 0 3 * * *"));
    assert_eq!(config.rollup.vacuum_interval_secs, 43200);
}

#[test]
fn test_config_validation_rejects_flush_interval_zero() {
    let bad = VALID_CONFIG_FULL.replace("flush_interval_secs = 5", "flush_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("flush_interval_secs"));
}

#[test]
fn test_config_validation_rejects_retention_days_zero() {
    let bad = VALID_CONFIG_FULL.replace("retention_days = 30", "retention_days = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("retention_days"));
}

#[test]
fn test_config_validation_rejects_failure_threshold_zero() {
    let bad = VALID_CONFIG_FULL.replace("failure_threshold = 5", "failure_threshold = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("failure_threshold"));
}

#[test]
fn test_config_validation_rejects_grace_multiplier_zero() {
    let bad = VALID_CONFIG_FULL.replace("grace_multiplier = 3", "grace_multiplier = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("grace_multiplier"));
}

#[test]
fn test_config_validation_rejects_stats_log_interval_zero() {
    let bad = VALID_CONFIG_FULL.replace(
        "stats_log_interval_secs = 120",
        "stats_log_interval_secs = 0",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("stats_log_interval_secs"));
}

#[test]
fn test_config_validation_rejects_vacuum_interval_zero() {
    let bad = VALID_CONFIG_FULL.replace("vacuum_interval_secs = 43200", "vacuum_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("vacuum_interval_secs"));
}
