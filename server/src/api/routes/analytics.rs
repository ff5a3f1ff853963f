//! Cost analytics endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::types::ApiError;
use crate::data::types::ModelCostRow;
use crate::domain::traces::TraceService;

#[derive(Clone)]
pub struct AnalyticsApiState {
    pub service: Arc<TraceService>,
}

/// Build analytics routes
pub fn routes(service: Arc<TraceService>) -> Router<()> {
    let state = AnalyticsApiState { service };

    Router::new()
        .route("/api/v1/analytics/costs", get(get_costs))
        .with_state(state)
}

/// Spend across stored spans that name a model, broken down by model
#[derive(Debug, Serialize, ToSchema)]
pub struct CostAnalyticsResponse {
    pub total_cost_usd: f64,
    pub request_count: u64,
    pub total_tokens: i64,
    /// Highest spend first
    pub models: Vec<ModelCostRow>,
}

impl CostAnalyticsResponse {
    fn from_rows(models: Vec<ModelCostRow>) -> Self {
        Self {
            total_cost_usd: models.iter().map(|m| m.total_cost_usd).sum(),
            request_count: models.iter().map(|m| m.request_count).sum(),
            total_tokens: models.iter().map(|m| m.total_tokens).sum(),
            models,
        }
    }
}

/// Cost by model
#[utoipa::path(
    get,
    path = "/api/v1/analytics/costs",
    tag = "analytics",
    responses(
        (status = 200, description = "Cost breakdown by model", body = CostAnalyticsResponse)
    )
)]
pub async fn get_costs(
    State(state): State<AnalyticsApiState>,
) -> Result<(HeaderMap, Json<CostAnalyticsResponse>), ApiError> {
    let rows = state
        .service
        .cost_by_model()
        .await
        .map_err(ApiError::from_data)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((headers, Json(CostAnalyticsResponse::from_rows(rows))))
}
