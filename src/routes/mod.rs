// HTTP routes for the billing and administration API

mod http;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::aggregator::Aggregator;
use crate::billing_store::BillingStore;
use crate::collector::MetricsCollector;
use crate::docker_repo::StatsSource;
use crate::metrics::ExpositionMetrics;
use crate::pricing::SharedPricing;
use crate::query::QueryService;

pub(crate) struct AppState<S: StatsSource> {
    pub(crate) store: Arc<BillingStore>,
    pub(crate) pricing: Arc<SharedPricing>,
    pub(crate) aggregator: Arc<Aggregator>,
    pub(crate) collector: Arc<MetricsCollector<S>>,
    pub(crate) query: Arc<QueryService>,
    pub(crate) metrics: Arc<ExpositionMetrics>,
}

impl<S: StatsSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pricing: self.pricing.clone(),
            aggregator: self.aggregator.clone(),
            collector: self.collector.clone(),
            query: self.query.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

pub fn app<S: StatsSource>(
    store: Arc<BillingStore>,
    pricing: Arc<SharedPricing>,
    aggregator: Arc<Aggregator>,
    collector: Arc<MetricsCollector<S>>,
    query: Arc<QueryService>,
    metrics: Arc<ExpositionMetrics>,
) -> Router {
    let state = AppState {
        store,
        pricing,
        aggregator,
        collector,
        query,
        metrics,
    };
    Router::new()
        .route("/", get(|| async { "meterd: resource metering for agent deployments" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/metrics", get(http::metrics_handler::<S>)) // GET /metrics
        .route("/api/billing/summary", get(http::billing_summary::<S>))
        .route("/api/billing/daily", get(http::daily_usage::<S>))
        .route("/api/billing/monthly", get(http::monthly_breakdown::<S>))
        .route("/api/billing/estimate", get(http::cost_estimate::<S>))
        .route(
            "/api/billing/budget",
            get(http::budget_check::<S>).put(http::set_budget::<S>),
        )
        .route(
            "/api/deployments",
            get(http::list_deployments::<S>).post(http::register_deployment::<S>),
        )
        .route("/api/deployments/{id}", delete(http::terminate_deployment::<S>))
        .route("/api/deployments/{id}/costs", get(http::deployment_costs::<S>))
        .route(
            "/api/pricing",
            get(http::pricing::<S>).post(http::add_pricing_rate::<S>),
        )
        .route("/api/collect", post(http::trigger_collection::<S>))
        .route("/api/aggregates/recompute", post(http::recompute_hour::<S>))
        .route("/api/cleanup", post(http::cleanup_snapshots::<S>))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
