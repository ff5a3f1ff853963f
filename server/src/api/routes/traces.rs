//! Trace ingestion and read endpoints

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::extractors::{TracePath, ValidatedQuery};
use crate::api::types::{
    ApiError, PaginatedResponse, default_limit, default_page, parse_trace_order, validate_limit,
    validate_page,
};
use crate::core::constants::INGEST_BODY_LIMIT;
use crate::data::types::{ListTracesParams, TraceSummary};
use crate::domain::traces::{
    IngestError, IngestRejection, SpanRecord, TraceDetail, TraceService, ValidationIssue,
};
use crate::utils::string::non_empty;

#[derive(Clone)]
pub struct TracesApiState {
    pub service: Arc<TraceService>,
}

/// Build trace routes
pub fn routes(service: Arc<TraceService>) -> Router<()> {
    let state = TracesApiState { service };

    Router::new()
        .route("/api/v1/traces", get(list_traces).post(ingest_trace))
        .route("/api/v1/traces/{trace_id}", get(get_trace))
        .route("/api/v1/traces/{trace_id}/spans", get(list_trace_spans))
        .with_state(state)
}

// ============================================================================
// Ingestion
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    Rejected,
}

/// Response for an accepted trace
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestAccepted {
    pub trace_id: String,
    pub status: IngestStatus,
    /// A trace with this id already existed and its spans were replaced
    pub replaced: bool,
    pub span_count: usize,
    pub warnings: Vec<String>,
}

/// Response for a rejected trace; nothing was stored
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestRejected {
    pub trace_id: Option<String>,
    pub status: IngestStatus,
    pub errors: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

/// Failed ingestion: either the payload or the storage backend
#[derive(Debug)]
pub enum IngestFailure {
    Rejected {
        status: StatusCode,
        rejection: IngestRejection,
    },
    Api(ApiError),
}

impl From<IngestError> for IngestFailure {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Rejected(rejection) => Self::Rejected {
                status: StatusCode::BAD_REQUEST,
                rejection,
            },
            IngestError::Storage(e) => Self::Api(ApiError::from_data(e)),
        }
    }
}

impl IntoResponse for IngestFailure {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected { status, rejection } => {
                let body = IngestRejected {
                    errors: rejection.errors(),
                    trace_id: rejection.trace_id,
                    status: IngestStatus::Rejected,
                    issues: rejection.issues,
                };
                (status, Json(body)).into_response()
            }
            Self::Api(e) => e.into_response(),
        }
    }
}

/// Ingest one complete trace
///
/// The payload is validated as a whole; any problem rejects it and nothing
/// is stored. Re-sending the same trace id replaces the stored span set.
#[utoipa::path(
    post,
    path = "/api/v1/traces",
    tag = "traces",
    request_body = crate::domain::traces::IngestPayload,
    responses(
        (status = 200, description = "Trace accepted", body = IngestAccepted),
        (status = 400, description = "Trace rejected", body = IngestRejected),
        (status = 401, description = "Missing or invalid API key"),
        (status = 413, description = "Body exceeds the ingestion limit", body = IngestRejected)
    )
)]
pub async fn ingest_trace(
    State(state): State<TracesApiState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestAccepted>, IngestFailure> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestFailure::Rejected {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                rejection: IngestRejection::too_large(INGEST_BODY_LIMIT),
            }
        } else {
            IngestFailure::Api(ApiError::bad_request(
                "BODY_READ_ERROR",
                rejection.body_text(),
            ))
        }
    })?;

    let receipt = state
        .service
        .ingest_bytes(&body, Utc::now())
        .await
        .map_err(|e| {
            if let IngestError::Rejected(rejection) = &e {
                tracing::debug!(
                    trace_id = ?rejection.trace_id,
                    issues = rejection.issues.len(),
                    "Rejected trace payload"
                );
            }
            IngestFailure::from(e)
        })?;

    Ok(Json(IngestAccepted {
        trace_id: receipt.trace_id,
        status: IngestStatus::Accepted,
        replaced: receipt.outcome.is_replaced(),
        span_count: receipt.span_count,
        warnings: receipt.warnings,
    }))
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTracesQuery {
    /// Page number (1-based)
    #[serde(default = "default_page")]
    #[validate(custom(function = "validate_page"))]
    pub page: u32,
    /// Items per page
    #[serde(default = "default_limit")]
    #[validate(custom(function = "validate_limit"))]
    pub limit: u32,
    /// `start_time`, `latency_ms`, `total_cost_usd` or `ingested_at`, optionally `:asc`/`:desc`
    pub order_by: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Case-insensitive substring of the trace name
    pub name: Option<String>,
}

/// List trace summaries with pagination and filters
#[utoipa::path(
    get,
    path = "/api/v1/traces",
    tag = "traces",
    params(ListTracesQuery),
    responses(
        (status = 200, description = "Trace summaries with pagination metadata"),
        (status = 400, description = "Invalid query")
    )
)]
pub async fn list_traces(
    State(state): State<TracesApiState>,
    ValidatedQuery(query): ValidatedQuery<ListTracesQuery>,
) -> Result<(HeaderMap, Json<PaginatedResponse<TraceSummary>>), ApiError> {
    let order = match query.order_by.as_deref() {
        Some(ob) => parse_trace_order(ob)?,
        None => Default::default(),
    };

    let params = ListTracesParams {
        page: query.page,
        limit: query.limit,
        order,
        session_id: non_empty(query.session_id),
        user_id: non_empty(query.user_id),
        name: non_empty(query.name),
    };

    let (rows, total) = state
        .service
        .list(&params)
        .await
        .map_err(ApiError::from_data)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        headers,
        Json(PaginatedResponse::new(rows, query.page, query.limit, total)),
    ))
}

/// Reconstructed trace: span tree, metrics, anomalies and evaluations
#[utoipa::path(
    get,
    path = "/api/v1/traces/{trace_id}",
    tag = "traces",
    params(("trace_id" = String, Path, description = "Trace ID")),
    responses(
        (status = 200, description = "Trace detail", body = TraceDetail),
        (status = 304, description = "Unchanged since the given ETag"),
        (status = 404, description = "Trace not found")
    )
)]
pub async fn get_trace(
    State(state): State<TracesApiState>,
    path: TracePath,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let detail = state
        .service
        .get_detail(&path.trace_id)
        .await
        .map_err(ApiError::from_data)?
        .ok_or_else(|| trace_not_found(&path.trace_id))?;

    let etag = detail_etag(&detail);
    let etag_header = etag.as_deref().and_then(|e| HeaderValue::from_str(e).ok());

    if let Some(etag) = etag.as_deref()
        && let Some(candidates) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
        && candidates
            .split(',')
            .any(|c| c.trim() == etag || c.trim() == "*")
    {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        if let Some(value) = etag_header {
            response.headers_mut().insert(header::ETAG, value);
        }
        return Ok(response);
    }

    let mut response = Json(detail).into_response();
    if let Some(value) = etag_header {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Flat span list ordered by start_time, then id
#[utoipa::path(
    get,
    path = "/api/v1/traces/{trace_id}/spans",
    tag = "traces",
    params(("trace_id" = String, Path, description = "Trace ID")),
    responses(
        (status = 200, description = "Spans of the trace", body = Vec<SpanRecord>),
        (status = 404, description = "Trace not found")
    )
)]
pub async fn list_trace_spans(
    State(state): State<TracesApiState>,
    path: TracePath,
) -> Result<Json<Vec<SpanRecord>>, ApiError> {
    let spans = state
        .service
        .get_spans(&path.trace_id)
        .await
        .map_err(ApiError::from_data)?
        .ok_or_else(|| trace_not_found(&path.trace_id))?;
    Ok(Json(spans))
}

fn trace_not_found(trace_id: &str) -> ApiError {
    ApiError::not_found("TRACE_NOT_FOUND", format!("Trace not found: {}", trace_id))
}

/// Weak ETag over the serialized detail. Re-sending an identical trace keeps
/// it; changed spans or a new evaluation change it.
fn detail_etag(detail: &TraceDetail) -> Option<String> {
    let bytes = serde_json::to_vec(detail).ok()?;
    let digest = Sha256::digest(&bytes);
    Some(format!("W/\"{}\"", hex::encode(&digest[..16])))
}
