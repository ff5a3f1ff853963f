//! Evaluation endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::extractors::{ValidatedJson, ValidatedQuery};
use crate::api::types::ApiError;
use crate::data::types::EvaluationFilter;
use crate::domain::evaluations::{
    AttachEvaluation, EvaluationError, EvaluationRecord, EvaluationService, EvaluatorType,
    TargetKind,
};
use crate::utils::string::non_empty;

#[derive(Clone)]
pub struct EvaluationsApiState {
    pub service: Arc<EvaluationService>,
}

/// Build evaluation routes
pub fn routes(service: Arc<EvaluationService>) -> Router<()> {
    let state = EvaluationsApiState { service };

    Router::new()
        .route(
            "/api/v1/evaluations",
            get(list_evaluations).post(attach_evaluation),
        )
        .with_state(state)
}

/// Body of `POST /api/v1/evaluations`
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AttachEvaluationRequest {
    #[validate(length(min = 1, max = 256, message = "target_id must be 1-256 characters"))]
    pub target_id: String,
    pub target_kind: TargetKind,
    /// Owning trace of a span target, needed only when the span id exists in
    /// several traces
    pub trace_id: Option<String>,
    pub evaluator_type: String,
    /// Must lie in [0, 1]; out-of-range scores are rejected, never clamped
    pub score: f64,
    pub label: Option<String>,
    #[validate(length(max = 10000, message = "explanation must be at most 10000 characters"))]
    pub explanation: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

impl From<AttachEvaluationRequest> for AttachEvaluation {
    fn from(req: AttachEvaluationRequest) -> Self {
        Self {
            target_id: req.target_id,
            target_kind: req.target_kind,
            trace_id: req.trace_id,
            evaluator_type: req.evaluator_type,
            score: req.score,
            label: req.label,
            explanation: req.explanation,
            metadata: req.metadata,
        }
    }
}

fn evaluation_error(e: EvaluationError) -> ApiError {
    match e {
        EvaluationError::InvalidScore(_) => ApiError::bad_request("INVALID_SCORE", e.to_string()),
        EvaluationError::UnknownEvaluator(_) => {
            let allowed: Vec<&str> = EvaluatorType::ALL.iter().map(|t| t.as_str()).collect();
            ApiError::bad_request(
                "UNKNOWN_EVALUATOR_TYPE",
                format!("{}. Allowed: {}", e, allowed.join(", ")),
            )
        }
        EvaluationError::InvalidField { .. } => {
            ApiError::bad_request("VALIDATION_ERROR", e.to_string())
        }
        EvaluationError::TargetNotFound { .. } => {
            ApiError::not_found("TARGET_NOT_FOUND", e.to_string())
        }
        EvaluationError::AmbiguousSpan { .. } => ApiError::conflict("AMBIGUOUS_SPAN", e.to_string()),
        EvaluationError::Storage(e) => ApiError::from_data(e),
    }
}

/// Attach an evaluation score to a trace or span
#[utoipa::path(
    post,
    path = "/api/v1/evaluations",
    tag = "evaluations",
    request_body = AttachEvaluationRequest,
    responses(
        (status = 201, description = "Evaluation stored", body = EvaluationRecord),
        (status = 400, description = "Invalid score, evaluator type or field"),
        (status = 404, description = "Target trace or span not found"),
        (status = 409, description = "Span id exists in several traces; pass trace_id")
    )
)]
pub async fn attach_evaluation(
    State(state): State<EvaluationsApiState>,
    ValidatedJson(body): ValidatedJson<AttachEvaluationRequest>,
) -> Result<(StatusCode, Json<EvaluationRecord>), ApiError> {
    let evaluation = state
        .service
        .attach(body.into(), Utc::now())
        .await
        .map_err(evaluation_error)?;
    Ok((StatusCode::CREATED, Json(evaluation)))
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListEvaluationsQuery {
    /// Evaluations of the trace and of any of its spans
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub evaluator_type: Option<String>,
}

/// List evaluations, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/evaluations",
    tag = "evaluations",
    params(ListEvaluationsQuery),
    responses(
        (status = 200, description = "Matching evaluations", body = Vec<EvaluationRecord>),
        (status = 400, description = "Unknown evaluator type")
    )
)]
pub async fn list_evaluations(
    State(state): State<EvaluationsApiState>,
    ValidatedQuery(query): ValidatedQuery<ListEvaluationsQuery>,
) -> Result<Json<Vec<EvaluationRecord>>, ApiError> {
    let evaluator_type = match non_empty(query.evaluator_type) {
        Some(raw) => Some(
            raw.parse::<EvaluatorType>()
                .map_err(|_| evaluation_error(EvaluationError::UnknownEvaluator(raw)))?,
        ),
        None => None,
    };

    let filter = EvaluationFilter {
        trace_id: non_empty(query.trace_id),
        span_id: non_empty(query.span_id),
        evaluator_type,
    };

    let evaluations = state
        .service
        .list(&filter)
        .await
        .map_err(evaluation_error)?;
    Ok(Json(evaluations))
}
