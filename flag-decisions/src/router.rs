use std::future::ready;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analytics::UsageAnalyticsEngine;
use crate::api::endpoint;
use crate::cache::DecisionCache;
use crate::config::Config;
use crate::evaluator::FlagEvaluator;
use crate::flags::KillSwitchScope;
use crate::metrics::{setup_metrics_recorder, track_metrics};
use crate::store::FlagStore;
use crate::targeting::ABTestEngine;

#[derive(Clone)]
pub struct State {
    pub store: Arc<dyn FlagStore + Send + Sync>,
    pub evaluator: Arc<FlagEvaluator>,
    // shared with the evaluator, exposed here for invalidation
    pub cache: Arc<DecisionCache>,
    pub experiments: Arc<ABTestEngine>,
    pub usage: Arc<UsageAnalyticsEngine>,
}

pub fn router(state: State, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let readiness_store = state.store.clone();
    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || readiness(readiness_store.clone())))
        .route("/_liveness", get(|| ready("ok")));

    let flags_router = Router::new()
        .route("/flags/evaluate", post(endpoint::evaluate_all))
        .route("/flags/:flag_key/evaluate", post(endpoint::evaluate_flag))
        .route("/cache/invalidate", post(endpoint::invalidate_cache));

    let experiments_router = Router::new()
        .route("/experiments/assign", post(endpoint::assign_variants))
        .route("/experiments/conversions", post(endpoint::track_conversion))
        .route(
            "/experiments/:test_id/conversions",
            get(endpoint::conversion_stats),
        );

    let analytics_router = Router::new()
        .route(
            "/analytics/flags/:flag_key/metrics",
            get(endpoint::flag_metrics),
        )
        .route(
            "/analytics/flags/:flag_key/pattern",
            get(endpoint::usage_pattern),
        )
        .route(
            "/analytics/flags/:flag_key/forecast",
            get(endpoint::load_forecast),
        )
        .route(
            "/analytics/flags/:flag_key/recommendations",
            get(endpoint::recommendations),
        )
        .route("/analytics/summary", get(endpoint::stats_summary));

    let router = Router::new()
        .merge(status_router)
        .merge(flags_router)
        .merge(experiments_router)
        .merge(analytics_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if *config.export_prometheus {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}

pub async fn index() -> &'static str {
    "flag decisions"
}

/// Ready once the store answers a read.
pub async fn readiness(
    store: Arc<dyn FlagStore + Send + Sync>,
) -> Result<&'static str, (StatusCode, String)> {
    store
        .get_kill_switch(&KillSwitchScope::Global)
        .await
        .map(|_| "ok")
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, format!("store unavailable: {e}")))
}
