//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct HealthApiState {
    pub storage: &'static str,
}

/// Build health routes (never behind auth)
pub fn routes(storage: &'static str) -> Router<()> {
    Router::new()
        .route("/api/v1/health", get(health))
        .with_state(HealthApiState { storage })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Active storage backend (`sqlite` or `memory`)
    pub storage: &'static str,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<HealthApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            storage: state.storage,
        }),
    )
}
