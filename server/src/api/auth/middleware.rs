//! Authentication middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::keys::ApiKeySet;
use crate::api::types::ApiError;
use crate::utils::api_key::extract_key;

/// Reject requests without a valid API key before they reach a handler.
/// Passes everything through when authentication is disabled.
pub async fn require_auth(
    State(keys): State<Arc<ApiKeySet>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !keys.is_enabled() {
        return Ok(next.run(request).await);
    }

    let Some(presented) = extract_key(request.headers()) else {
        return Err(ApiError::unauthorized(
            "AUTH_REQUIRED",
            "API key required (X-API-KEY header)",
        ));
    };
    if !keys.verify(&presented) {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected request with invalid API key"
        );
        return Err(ApiError::unauthorized("API_KEY_INVALID", "Invalid API key"));
    }

    Ok(next.run(request).await)
}
