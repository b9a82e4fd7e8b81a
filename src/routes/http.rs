// Handlers: billing queries, pricing and deployment administration

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::docker_repo::StatsSource;
use crate::error::{MeterError, MeterResult};
use crate::models::{
    BudgetStatus, Deployment, DeploymentType, HourlyAggregate, PricingRate, RateUnit, ResourceType,
};
use crate::query::{
    BillingSummary, CostSummary, DailyUsage, DeploymentCosts, MonthlyBreakdown, PricingDump,
};
use crate::version::{NAME, VERSION};

/// GET /version — service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /metrics — Prometheus text exposition. Fleet totals are
/// refreshed from the collector at scrape time.
pub(super) async fn metrics_handler<S: StatsSource>(
    State(state): State<AppState<S>>,
) -> MeterResult<impl IntoResponse> {
    let (total, running, stopped) = state.collector.container_totals().await;
    state.metrics.set_totals(total, running, stopped);
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[derive(Deserialize)]
pub(super) struct SummaryParams {
    user_id: String,
    months: Option<u32>,
}

/// GET /api/billing/summary?user_id&months
pub(super) async fn billing_summary<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<SummaryParams>,
) -> MeterResult<Json<BillingSummary>> {
    let months = params.months.unwrap_or(1);
    Ok(Json(state.query.billing_summary(&params.user_id, months).await?))
}

#[derive(Deserialize)]
pub(super) struct DailyParams {
    user_id: String,
    date: String,
}

/// GET /api/billing/daily?user_id&date=YYYY-MM-DD
pub(super) async fn daily_usage<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<DailyParams>,
) -> MeterResult<Json<DailyUsage>> {
    Ok(Json(state.query.daily_usage(&params.user_id, &params.date).await?))
}

#[derive(Deserialize)]
pub(super) struct UserParams {
    user_id: String,
}

/// GET /api/billing/monthly?user_id
pub(super) async fn monthly_breakdown<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<UserParams>,
) -> MeterResult<Json<MonthlyBreakdown>> {
    Ok(Json(state.query.monthly_breakdown(&params.user_id).await?))
}

#[derive(Deserialize)]
pub(super) struct EstimateParams {
    deployment_type: String,
    duration_hours: f64,
    avg_cpu_percent: f64,
    avg_memory_gb: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EstimateResponse {
    deployment_type: DeploymentType,
    duration_hours: f64,
    cost: CostSummary,
}

/// GET /api/billing/estimate?deployment_type&duration_hours&avg_cpu_percent&avg_memory_gb
pub(super) async fn cost_estimate<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<EstimateParams>,
) -> MeterResult<Json<EstimateResponse>> {
    let deployment_type = DeploymentType::parse(&params.deployment_type).ok_or_else(|| {
        MeterError::InvalidRequest(format!(
            "unknown deployment_type '{}'",
            params.deployment_type
        ))
    })?;
    let breakdown = state
        .query
        .cost_estimate(
            deployment_type,
            params.duration_hours,
            params.avg_cpu_percent,
            params.avg_memory_gb,
        )
        .await?;
    Ok(Json(EstimateResponse {
        deployment_type,
        duration_hours: params.duration_hours,
        cost: CostSummary {
            cpu_cost: breakdown.cpu_cost,
            memory_cost: breakdown.memory_cost,
            network_cost: breakdown.network_cost,
            storage_cost: breakdown.storage_cost,
            total_cost: breakdown.total_cost,
            currency: "USD".to_string(),
        },
    }))
}

/// GET /api/billing/budget?user_id
pub(super) async fn budget_check<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<UserParams>,
) -> MeterResult<Json<BudgetStatus>> {
    Ok(Json(state.query.budget_check(&params.user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SetBudgetRequest {
    user_id: String,
    /// Monthly budget in USD; null clears the budget.
    monthly_budget: Option<Decimal>,
}

/// PUT /api/billing/budget
pub(super) async fn set_budget<S: StatsSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<SetBudgetRequest>,
) -> MeterResult<Json<BudgetStatus>> {
    if req.user_id.is_empty() {
        return Err(MeterError::InvalidRequest("user_id is required".to_string()));
    }
    if let Some(budget) = req.monthly_budget
        && budget <= Decimal::ZERO
    {
        return Err(MeterError::InvalidRequest(
            "monthlyBudget must be positive; null clears it".to_string(),
        ));
    }
    let now = chrono::Utc::now().timestamp_millis();
    state
        .store
        .set_budget(&req.user_id, req.monthly_budget, now)
        .await?;
    Ok(Json(state.query.budget_check(&req.user_id).await?))
}

#[derive(Deserialize)]
pub(super) struct ListDeploymentsParams {
    user_id: Option<String>,
}

/// GET /api/deployments?user_id — registered mappings. A user filter
/// includes that user's terminated deployments; the unfiltered list is
/// active deployments only.
pub(super) async fn list_deployments<S: StatsSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<ListDeploymentsParams>,
) -> MeterResult<Json<Vec<Deployment>>> {
    let deployments = match params.user_id.as_deref() {
        Some(user_id) => state.store.list_deployments_for_user(user_id).await?,
        None => state.store.list_active_deployments().await?,
    };
    Ok(Json(deployments))
}

/// GET /api/deployments/{id}/costs
pub(super) async fn deployment_costs<S: StatsSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> MeterResult<Json<DeploymentCosts>> {
    Ok(Json(state.query.deployment_costs(&id).await?))
}

/// GET /api/pricing
pub(super) async fn pricing<S: StatsSource>(
    State(state): State<AppState<S>>,
) -> MeterResult<Json<PricingDump>> {
    Ok(Json(state.query.pricing().await))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AddRateRequest {
    resource_type: ResourceType,
    deployment_type: DeploymentType,
    price: Decimal,
    unit: RateUnit,
    #[serde(default)]
    currency: Option<String>,
    /// Epoch millis; defaults to now. A past value backfills and takes
    /// effect on recompute.
    #[serde(default)]
    effective_from: Option<i64>,
}

/// POST /api/pricing — append one versioned rate and reload the table.
pub(super) async fn add_pricing_rate<S: StatsSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<AddRateRequest>,
) -> MeterResult<Json<PricingDump>> {
    if req.price < Decimal::ZERO {
        return Err(MeterError::InvalidRequest(
            "price must be non-negative".to_string(),
        ));
    }
    if let Some(from) = req.effective_from
        && from < 0
    {
        return Err(MeterError::InvalidRequest(
            "effectiveFrom must be non-negative epoch millis".to_string(),
        ));
    }
    let rate = PricingRate {
        resource_type: req.resource_type,
        deployment_type: req.deployment_type,
        price: req.price,
        unit: req.unit,
        currency: req.currency.unwrap_or_else(|| "USD".to_string()),
        effective_from: req
            .effective_from
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
    };
    state.store.insert_pricing_rate(&rate).await?;
    let all = state.store.load_pricing_rates().await?;
    state.pricing.install(all).await;
    Ok(Json(state.query.pricing().await))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterDeploymentRequest {
    id: String,
    user_id: String,
    agent_id: String,
    hiring_id: String,
    container_name: String,
    deployment_type: DeploymentType,
}

/// POST /api/deployments — register the explicit mapping and start
/// sampling. Container identity is never inferred from names.
pub(super) async fn register_deployment<S: StatsSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<RegisterDeploymentRequest>,
) -> MeterResult<impl IntoResponse> {
    if req.id.is_empty() || req.user_id.is_empty() || req.container_name.is_empty() {
        return Err(MeterError::InvalidRequest(
            "id, userId and containerName are required".to_string(),
        ));
    }
    let deployment = Deployment {
        id: req.id,
        user_id: req.user_id,
        agent_id: req.agent_id,
        hiring_id: req.hiring_id,
        container_name: req.container_name,
        deployment_type: req.deployment_type,
        created_at: chrono::Utc::now().timestamp_millis(),
        terminated_at: None,
    };
    if !state.store.insert_deployment(&deployment).await? {
        return Err(MeterError::DeploymentExists(deployment.id));
    }
    state.collector.track(deployment.clone()).await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TerminateResponse {
    deployment_id: String,
    terminated_at: i64,
    finalized_hours: usize,
}

/// DELETE /api/deployments/{id} — stop sampling, then finalize every
/// open bucket before responding.
pub(super) async fn terminate_deployment<S: StatsSource>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> MeterResult<Json<TerminateResponse>> {
    let deployment = state
        .store
        .get_deployment(&id)
        .await?
        .ok_or_else(|| MeterError::DeploymentNotFound(id.clone()))?;
    if deployment.terminated_at.is_some() {
        return Err(MeterError::InvalidRequest(format!(
            "deployment {id} is already terminated"
        )));
    }
    let finalized_hours = state.collector.stop(&id).await?;
    let terminated_at = chrono::Utc::now().timestamp_millis();
    state.store.set_terminated(&id, terminated_at).await?;
    Ok(Json(TerminateResponse {
        deployment_id: id,
        terminated_at,
        finalized_hours,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CollectResponse {
    sampled: usize,
}

/// POST /api/collect — one immediate sampling pass.
pub(super) async fn trigger_collection<S: StatsSource>(
    State(state): State<AppState<S>>,
) -> Json<CollectResponse> {
    let sampled = state.collector.trigger_collection().await;
    Json(CollectResponse { sampled })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RecomputeRequest {
    deployment_id: String,
    hour_start: i64,
}

/// POST /api/aggregates/recompute — replay a stored hour into the next
/// version.
pub(super) async fn recompute_hour<S: StatsSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<RecomputeRequest>,
) -> MeterResult<Json<HourlyAggregate>> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(
        state
            .aggregator
            .recompute_hour(&req.deployment_id, req.hour_start, now)
            .await?,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CleanupRequest {
    max_age_hours: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CleanupResponse {
    deleted_snapshots: u64,
}

/// POST /api/cleanup — delete folded snapshots older than the age.
pub(super) async fn cleanup_snapshots<S: StatsSource>(
    State(state): State<AppState<S>>,
    Json(req): Json<CleanupRequest>,
) -> MeterResult<Json<CleanupResponse>> {
    let now = chrono::Utc::now().timestamp_millis();
    let deleted_snapshots = state.store.cleanup_snapshots(req.max_age_hours, now).await?;
    Ok(Json(CleanupResponse { deleted_snapshots }))
}
