// Billing aggregates (hourly, daily, monthly) and the UTC time-bucket
// boundary math they share.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DeploymentType;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 86_400_000;

/// Floor an epoch-millis timestamp to its UTC hour boundary.
pub fn hour_start_ms(ts_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(HOUR_MS)
}

/// Floor an epoch-millis timestamp to its UTC day boundary.
pub fn day_start_ms(ts_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(DAY_MS)
}

fn utc(ts_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts_ms).unwrap_or_default()
}

/// Month key ("YYYY-MM") of a timestamp.
pub fn month_key(ts_ms: i64) -> String {
    let dt = utc(ts_ms);
    format!("{:04}-{:02}", dt.year(), dt.month())
}

/// Day key ("YYYY-MM-DD") of a timestamp.
pub fn day_key(ts_ms: i64) -> String {
    let dt = utc(ts_ms);
    format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
}

/// Start of the UTC month containing the timestamp.
pub fn month_start_ms(ts_ms: i64) -> i64 {
    let dt = utc(ts_ms);
    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(0)
}

/// Start of the UTC month after the one containing the timestamp.
pub fn next_month_start_ms(ts_ms: i64) -> i64 {
    let dt = utc(ts_ms);
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(i64::MAX)
}

/// Start of the UTC month `months_back` months before the one
/// containing the timestamp.
pub fn month_start_back_ms(ts_ms: i64, months_back: u32) -> i64 {
    let dt = utc(ts_ms);
    let total = dt.year() * 12 + dt.month() as i32 - 1 - months_back as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(0)
}

/// `[start, end)` millis range of a "YYYY-MM" month key.
pub fn month_range_ms(key: &str) -> Option<(i64, i64)> {
    let (y, m) = key.split_once('-')?;
    let year: i32 = y.parse().ok()?;
    let month: u32 = m.parse().ok()?;
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()?
        .timestamp_millis();
    Some((start, next_month_start_ms(start)))
}

/// Day start millis of a "YYYY-MM-DD" date string.
pub fn parse_day_ms(date: &str) -> Option<i64> {
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let dt = d.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&dt).timestamp_millis())
}

/// One finalized billing hour for one deployment. Immutable once
/// written; a recompute writes the same hour again with `version + 1`
/// and reads always take the highest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyAggregate {
    pub deployment_id: String,
    pub user_id: String,
    pub deployment_type: DeploymentType,
    /// UTC hour boundary, epoch millis.
    pub hour_start: i64,
    pub snapshot_count: u32,
    /// Samples recorded with no applicable rate; they contribute usage
    /// but no cost until a recompute after a rate backfill.
    pub unpriced_snapshot_count: u32,
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub network_cost: Decimal,
    pub storage_cost: Decimal,
    pub total_cost: Decimal,
    pub avg_cpu_percent: f64,
    pub avg_memory_gb: f64,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub version: i64,
    /// When this version was finalized, epoch millis.
    pub finalized_at: i64,
}

impl HourlyAggregate {
    pub fn has_unpriced(&self) -> bool {
        self.unpriced_snapshot_count > 0
    }
}

/// One UTC day for one deployment: the sum of its finalized hours.
/// Replaced wholesale when the day is rolled up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub deployment_id: String,
    pub user_id: String,
    pub deployment_type: DeploymentType,
    /// UTC day boundary, epoch millis.
    pub day_start: i64,
    /// Hours of the day that had a finalized aggregate. Missing hours
    /// mean zero usage, never a synthesized row.
    pub hours_counted: u32,
    pub snapshot_count: u32,
    pub unpriced_snapshot_count: u32,
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub network_cost: Decimal,
    pub storage_cost: Decimal,
    pub total_cost: Decimal,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub computed_at: i64,
}

/// One user-month of spend, summed across deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub user_id: String,
    /// "YYYY-MM".
    pub month: String,
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub network_cost: Decimal,
    pub storage_cost: Decimal,
    pub total_cost: Decimal,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub deployment_count: u32,
    pub computed_at: i64,
}

/// Budget standing for the current month. Budget-derived fields are
/// omitted entirely when no budget is configured for the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub user_id: String,
    pub month: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_budget: Option<Decimal>,
    pub current_usage: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_budget: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_percent: Option<Decimal>,
}
