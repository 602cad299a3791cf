use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::analytics::usage::{DEFAULT_FORECAST_HOURS, MAX_FORECAST_HOURS};
use crate::analytics::{FlagMetrics, LoadForecast, Recommendation, StatsSummary, UsagePattern};
use crate::api::errors::FlagError;
use crate::api::types::{
    validate_context, AssignRequest, AssignResponse, ConversionRequest, ConversionStatsResponse,
    EvaluateAllResponse, ForecastParams, InvalidateRequest, InvalidateResponse, InvalidationScope,
};
use crate::evaluator::FlagDecision;
use crate::flags::EvaluationContext;
use crate::router;

/// Evaluates every known flag for the tenant in the body context.
pub async fn evaluate_all(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<EvaluateAllResponse>, FlagError> {
    let context: EvaluationContext = serde_json::from_slice(&body)?;
    validate_context(&context)?;

    let request_id = Uuid::new_v4();
    let flags = state
        .evaluator
        .evaluate_all(&context)
        .instrument(info_span!("evaluate_all", %request_id))
        .await?;

    Ok(Json(EvaluateAllResponse { flags }))
}

pub async fn evaluate_flag(
    state: State<router::State>,
    Path(flag_key): Path<String>,
    body: Bytes,
) -> Result<Json<FlagDecision>, FlagError> {
    let context: EvaluationContext = serde_json::from_slice(&body)?;
    validate_context(&context)?;
    if flag_key.trim().is_empty() {
        return Err(FlagError::EmptyField("flag_key"));
    }

    let request_id = Uuid::new_v4();
    let decision = state
        .evaluator
        .evaluate_with_reason(&context.tenant_id, &flag_key, &context)
        .instrument(info_span!("evaluate_flag", %request_id))
        .await;

    Ok(Json(decision))
}

/// Assigns the experiments in order, threading earlier assignments into the
/// context seen by later ones.
pub async fn assign_variants(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<AssignResponse>, FlagError> {
    let request: AssignRequest = serde_json::from_slice(&body)?;
    validate_context(&request.context)?;

    let mut context = request.context;
    let assignments = state
        .experiments
        .assign_multiple_variants(&mut context, &request.experiments);

    Ok(Json(AssignResponse {
        assignments,
        previous_variants: context.previous_variants,
    }))
}

/// Accepted even when the record is dropped for missing ids.
pub async fn track_conversion(
    state: State<router::State>,
    body: Bytes,
) -> Result<StatusCode, FlagError> {
    let request: ConversionRequest = serde_json::from_slice(&body)?;
    state.experiments.track_conversion(
        &request.test_id,
        &request.variant_id,
        request.user_id.as_deref(),
        request.value,
        &request.metadata,
    );
    Ok(StatusCode::ACCEPTED)
}

pub async fn conversion_stats(
    state: State<router::State>,
    Path(test_id): Path<String>,
) -> Json<ConversionStatsResponse> {
    let variants = state.experiments.conversion_stats(&test_id);
    Json(ConversionStatsResponse { test_id, variants })
}

pub async fn invalidate_cache(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<InvalidateResponse>, FlagError> {
    let request: InvalidateRequest = serde_json::from_slice(&body)?;
    let scope = request.scope()?;
    let tenant_id = request.tenant_id.as_deref().unwrap_or_default();
    let flag_key = request.flag_key.as_deref().unwrap_or_default();

    match scope {
        InvalidationScope::Entry => state.cache.invalidate(tenant_id, flag_key),
        InvalidationScope::Tenant => state.cache.invalidate_tenant(tenant_id),
        InvalidationScope::Flag => state.cache.invalidate_flag(flag_key),
        InvalidationScope::All => state.cache.invalidate_all(),
    }
    tracing::info!(?scope, tenant_id, flag_key, "invalidated cached decisions");

    Ok(Json(InvalidateResponse {
        scope,
        remaining_entries: state.cache.size(),
    }))
}

pub async fn flag_metrics(
    state: State<router::State>,
    Path(flag_key): Path<String>,
) -> Result<Json<FlagMetrics>, FlagError> {
    state
        .usage
        .get_metrics(&flag_key)
        .map(Json)
        .ok_or(FlagError::NoUsageRecorded(flag_key))
}

pub async fn usage_pattern(
    state: State<router::State>,
    Path(flag_key): Path<String>,
) -> Json<UsagePattern> {
    Json(state.usage.analyze_usage_pattern(&flag_key))
}

pub async fn load_forecast(
    state: State<router::State>,
    Path(flag_key): Path<String>,
    Query(params): Query<ForecastParams>,
) -> Json<LoadForecast> {
    let hours_ahead = params
        .hours_ahead
        .unwrap_or(DEFAULT_FORECAST_HOURS)
        .min(MAX_FORECAST_HOURS);
    Json(state.usage.predict_load(&flag_key, hours_ahead))
}

pub async fn recommendations(
    state: State<router::State>,
    Path(flag_key): Path<String>,
) -> Json<Vec<Recommendation>> {
    Json(state.usage.generate_optimization_recommendations(&flag_key))
}

pub async fn stats_summary(state: State<router::State>) -> Json<StatsSummary> {
    Json(state.usage.generate_stats_summary())
}
