//! Request extractors that validate before the handler runs
//!
//! Every rejection renders the standard `{"error","code","message"}` body.
//! Constraint failures from `validator` also list each failing field under
//! `issues`, in the same `{code, path, message}` shape ingestion uses.

use std::ops::Deref;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::utils::string::is_valid_id;

#[derive(Debug, Deserialize)]
struct TracePathRaw {
    trace_id: String,
}

/// `{trace_id}` path segment, checked with the same id rules as ingestion
#[derive(Debug)]
pub struct TracePath {
    pub trace_id: String,
}

impl<S> FromRequestParts<S> for TracePath
where
    S: Send + Sync,
{
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<TracePathRaw>::from_request_parts(parts, state)
            .await
            .map_err(ValidationRejection::Path)?;

        if !is_valid_id(&raw.trace_id) {
            return Err(ValidationRejection::InvalidTraceId);
        }
        Ok(Self {
            trace_id: raw.trace_id,
        })
    }
}

/// One failing field of a validated query or body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub code: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ValidationRejection {
    Path(PathRejection),
    InvalidTraceId,
    Query(QueryRejection),
    Json(JsonRejection),
    Validation(ValidationErrors),
}

impl ValidationRejection {
    /// Status, machine code and message for the response body
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Path(r) => (r.status(), "PATH_PARSE_ERROR", r.body_text()),
            Self::InvalidTraceId => (
                StatusCode::BAD_REQUEST,
                "INVALID_TRACE_ID",
                "Invalid trace_id: must be 1-256 characters without control characters"
                    .to_string(),
            ),
            Self::Query(r) => (StatusCode::BAD_REQUEST, "QUERY_PARSE_ERROR", r.body_text()),
            // Keeps 415 for a missing content type and 413 for an oversized body
            Self::Json(r) => (r.status(), "JSON_PARSE_ERROR", r.body_text()),
            Self::Validation(errors) => {
                let issues = field_issues(errors);
                let message = issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
        }
    }
}

impl IntoResponse for ValidationRejection {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let mut body = serde_json::json!({
            "error": "bad_request",
            "code": code,
            "message": message,
        });
        if let Self::Validation(errors) = &self {
            body["issues"] = serde_json::json!(field_issues(errors));
        }
        (status, Json(body)).into_response()
    }
}

/// Flatten validator output into issues sorted by field path
pub fn field_issues(errors: &ValidationErrors) -> Vec<FieldIssue> {
    let mut issues: Vec<FieldIssue> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| FieldIssue {
                code: e.code.to_string(),
                path: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{}: failed '{}' check", field, e.code)),
            })
        })
        .collect();
    issues.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.code.cmp(&b.code)));
    issues
}

/// Query extractor that runs `Validate` on the parsed value
#[derive(Debug)]
pub struct ValidatedQuery<T>(pub T);

impl<T> Deref for ValidatedQuery<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(ValidationRejection::Query)?;
        value.validate().map_err(ValidationRejection::Validation)?;
        Ok(Self(value))
    }
}

/// JSON body extractor that runs `Validate` on the parsed value
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<T> Deref for ValidatedJson<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ValidationRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ValidationRejection::Json)?;
        value.validate().map_err(ValidationRejection::Validation)?;
        Ok(Self(value))
    }
}
