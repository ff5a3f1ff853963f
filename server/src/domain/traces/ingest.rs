//! Trace payload validation
//!
//! A payload is accepted or rejected as a whole. Validation collects every
//! structural problem before answering so clients can fix a payload in one
//! round trip.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use super::model::{
    ATTR_COMPLETION_TOKENS, ATTR_COST_USD, ATTR_MODEL, ATTR_PROMPT_TOKENS, ATTR_PROVIDER,
    ATTR_TOTAL_TOKENS, SpanRecord, SpanStatus, SpanType, TraceRecord,
};
use crate::core::config::IngestConfig;
use crate::core::constants::{DEFAULT_TRACE_NAME, MAX_SPAN_PAYLOAD_BYTES, MAX_TRACE_TAGS};
use crate::utils::string::{is_valid_id, non_empty};
use crate::utils::time::{parse_timestamp, truncate_to_micros};

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Body of `POST /api/v1/traces`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IngestPayload {
    #[serde(default)]
    pub trace: TracePayload,
    #[serde(default)]
    pub spans: Vec<SpanPayload>,
}

/// Trace metadata. `id` is the idempotency key; one is generated if absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TracePayload {
    pub id: Option<String>,
    pub name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tags: Option<Vec<String>>,
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
}

/// One span as reported by a client
///
/// Required fields are optional here so that every missing field can be
/// reported instead of failing on the first one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SpanPayload {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "type")]
    pub span_type: Option<String>,
    pub parent_span_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub latency_ms: Option<f64>,
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<Map<String, Value>>,
    pub status: Option<String>,
    pub error_message: Option<String>,
    // Flat LLM fields, folded into attributes when the attribute is absent
    pub model: Option<String>,
    pub provider: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
}

// ============================================================================
// REJECTION
// ============================================================================

/// Machine-readable reason a payload was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MalformedPayload,
    InvalidTraceId,
    TooManySpans,
    TooManyTags,
    MissingSpanId,
    InvalidSpanId,
    DuplicateSpanId,
    InvalidParentSpanId,
    MissingSpanName,
    MissingStartTime,
    InvalidTimestamp,
    EndBeforeStart,
    InvalidLatency,
    PayloadTooLarge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ValidationIssue {
    pub code: IssueCode,
    /// JSON path of the offending field, e.g. `spans[2].start_time`
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Whole-payload rejection
#[derive(Debug, Clone, Error)]
#[error("trace payload rejected with {} issue(s)", .issues.len())]
pub struct IngestRejection {
    pub trace_id: Option<String>,
    pub issues: Vec<ValidationIssue>,
}

impl IngestRejection {
    pub fn malformed(err: &serde_json::Error) -> Self {
        Self {
            trace_id: None,
            issues: vec![ValidationIssue::new(
                IssueCode::MalformedPayload,
                "$",
                format!("Invalid JSON payload: {}", err),
            )],
        }
    }

    /// Request body exceeded the ingestion body limit
    pub fn too_large(limit_bytes: usize) -> Self {
        Self {
            trace_id: None,
            issues: vec![ValidationIssue::new(
                IssueCode::PayloadTooLarge,
                "$",
                format!("Request body exceeds {} bytes", limit_bytes),
            )],
        }
    }

    /// One line per issue, `path: message`
    pub fn errors(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect()
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// A payload that passed validation, ready to persist
#[derive(Debug, Clone)]
pub struct ValidatedTrace {
    pub trace: TraceRecord,
    /// In payload order
    pub spans: Vec<SpanRecord>,
    /// Accepted-but-notable conditions (open spans, latency mismatches)
    pub warnings: Vec<String>,
}

/// Decode a request body into a payload
pub fn parse_payload(body: &[u8]) -> Result<IngestPayload, IngestRejection> {
    serde_json::from_slice(body).map_err(|e| IngestRejection::malformed(&e))
}

/// Validate a payload against the configured limits
pub fn validate(
    payload: IngestPayload,
    limits: &IngestConfig,
    now: DateTime<Utc>,
) -> Result<ValidatedTrace, IngestRejection> {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    let TracePayload {
        id,
        name,
        metadata,
        session_id,
        user_id,
        tags,
        input,
        output,
    } = payload.trace;

    let trace_id = match non_empty(id) {
        Some(id) if is_valid_id(&id) => id,
        Some(id) => {
            issues.push(ValidationIssue::new(
                IssueCode::InvalidTraceId,
                "trace.id",
                "Trace id must be 1-256 characters without control characters",
            ));
            id
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    let tags = normalize_tags(tags.unwrap_or_default());
    if tags.len() > MAX_TRACE_TAGS {
        issues.push(ValidationIssue::new(
            IssueCode::TooManyTags,
            "trace.tags",
            format!("At most {} tags are allowed, got {}", MAX_TRACE_TAGS, tags.len()),
        ));
    }

    for (field, value) in [("metadata", &metadata), ("input", &input), ("output", &output)] {
        if let Some(v) = value {
            check_size(v, &format!("trace.{}", field), &mut issues);
        }
    }

    if payload.spans.len() > limits.max_spans_per_trace {
        issues.push(ValidationIssue::new(
            IssueCode::TooManySpans,
            "spans",
            format!(
                "At most {} spans are allowed per trace, got {}",
                limits.max_spans_per_trace,
                payload.spans.len()
            ),
        ));
        // Per-span checks on an oversized payload would only add noise
        return Err(IngestRejection {
            trace_id: Some(trace_id),
            issues,
        });
    }

    let mut seen = HashSet::with_capacity(payload.spans.len());
    let mut spans = Vec::with_capacity(payload.spans.len());

    for (index, raw) in payload.spans.into_iter().enumerate() {
        if let Some(span) = validate_span(
            index,
            raw,
            limits,
            &mut seen,
            &mut issues,
            &mut warnings,
        ) {
            spans.push(span);
        }
    }

    if !issues.is_empty() {
        tracing::debug!(
            trace_id = %trace_id,
            issues = issues.len(),
            "Rejected trace payload"
        );
        return Err(IngestRejection {
            trace_id: Some(trace_id),
            issues,
        });
    }

    let trace = TraceRecord {
        id: trace_id,
        name: non_empty(name).unwrap_or_else(|| DEFAULT_TRACE_NAME.to_string()),
        metadata,
        session_id: non_empty(session_id),
        user_id: non_empty(user_id),
        tags,
        input,
        output,
        ingested_at: truncate_to_micros(now),
    };

    Ok(ValidatedTrace {
        trace,
        spans,
        warnings,
    })
}

fn validate_span(
    index: usize,
    raw: SpanPayload,
    limits: &IngestConfig,
    seen: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<String>,
) -> Option<SpanRecord> {
    let path = |field: &str| format!("spans[{}].{}", index, field);
    let issues_before = issues.len();

    let id = match non_empty(raw.id) {
        None => {
            issues.push(ValidationIssue::new(
                IssueCode::MissingSpanId,
                path("id"),
                "Span id is required",
            ));
            None
        }
        Some(id) if !is_valid_id(&id) => {
            issues.push(ValidationIssue::new(
                IssueCode::InvalidSpanId,
                path("id"),
                "Span id must be 1-256 characters without control characters",
            ));
            None
        }
        Some(id) => {
            if !seen.insert(id.clone()) {
                issues.push(ValidationIssue::new(
                    IssueCode::DuplicateSpanId,
                    path("id"),
                    format!("Span id '{}' appears more than once", id),
                ));
            }
            Some(id)
        }
    };

    let name = non_empty(raw.name);
    if name.is_none() {
        issues.push(ValidationIssue::new(
            IssueCode::MissingSpanName,
            path("name"),
            "Span name is required",
        ));
    }

    let parent_span_id = non_empty(raw.parent_span_id);
    if let Some(parent) = &parent_span_id
        && !is_valid_id(parent)
    {
        issues.push(ValidationIssue::new(
            IssueCode::InvalidParentSpanId,
            path("parent_span_id"),
            "Parent span id must be 1-256 characters without control characters",
        ));
    }

    let start_time = match raw.start_time.as_deref().map(str::trim) {
        None | Some("") => {
            issues.push(ValidationIssue::new(
                IssueCode::MissingStartTime,
                path("start_time"),
                "Span start_time is required",
            ));
            None
        }
        Some(s) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                issues.push(ValidationIssue::new(
                    IssueCode::InvalidTimestamp,
                    path("start_time"),
                    format!("'{}' is not an ISO 8601 timestamp", s),
                ));
            }
            parsed
        }
    };

    let end_time = match raw.end_time.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                issues.push(ValidationIssue::new(
                    IssueCode::InvalidTimestamp,
                    path("end_time"),
                    format!("'{}' is not an ISO 8601 timestamp", s),
                ));
            }
            parsed
        }
    };

    if let (Some(start), Some(end)) = (start_time, end_time)
        && end < start
    {
        issues.push(ValidationIssue::new(
            IssueCode::EndBeforeStart,
            path("end_time"),
            "Span end_time is before start_time",
        ));
    }

    let explicit_latency = match raw.latency_ms {
        Some(l) if !l.is_finite() || l < 0.0 => {
            issues.push(ValidationIssue::new(
                IssueCode::InvalidLatency,
                path("latency_ms"),
                "latency_ms must be a non-negative number",
            ));
            None
        }
        Some(l) => Some(l.round() as i64),
        None => None,
    };

    for (field, value) in [("input", &raw.input), ("output", &raw.output)] {
        if let Some(v) = value {
            check_size(v, &path(field), issues);
        }
    }

    let mut attributes = raw.attributes.unwrap_or_default();
    fold_flat_fields(
        &mut attributes,
        raw.model,
        raw.provider,
        raw.prompt_tokens,
        raw.completion_tokens,
        raw.total_tokens,
        raw.cost_usd,
    );
    if !attributes.is_empty() {
        check_size(&Value::Object(attributes.clone()), &path("attributes"), issues);
    }

    if issues.len() > issues_before {
        return None;
    }
    let (id, name, start_time) = (id?, name?, start_time?);

    let derived = end_time.map(|end| (end - start_time).num_milliseconds());
    let mut latency_mismatch = false;
    let latency_ms = match (explicit_latency, derived) {
        (Some(explicit), Some(derived)) => {
            if (explicit - derived).abs() > limits.latency_tolerance_ms {
                latency_mismatch = true;
                tracing::warn!(
                    span_id = %id,
                    explicit,
                    derived,
                    "Span latency disagrees with timestamps, keeping explicit value"
                );
                warnings.push(format!(
                    "span '{}': latency_ms {} differs from timestamps ({} ms)",
                    id, explicit, derived
                ));
            }
            Some(explicit)
        }
        (explicit, derived) => explicit.or(derived),
    };

    if end_time.is_none() {
        warnings.push(format!("span '{}': no end_time, trace is incomplete", id));
    }

    Some(SpanRecord {
        id,
        name,
        span_type: raw
            .span_type
            .as_deref()
            .map(SpanType::parse)
            .unwrap_or_default(),
        parent_span_id,
        start_time,
        end_time,
        latency_ms,
        input: raw.input,
        output: raw.output,
        attributes,
        status: raw
            .status
            .as_deref()
            .map(SpanStatus::parse)
            .unwrap_or_default(),
        error_message: non_empty(raw.error_message),
        latency_mismatch,
    })
}

fn fold_flat_fields(
    attributes: &mut Map<String, Value>,
    model: Option<String>,
    provider: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
    cost_usd: Option<f64>,
) {
    let mut fold = |key: &str, value: Option<Value>| {
        if let Some(v) = value
            && !attributes.contains_key(key)
        {
            attributes.insert(key.to_string(), v);
        }
    };
    fold(ATTR_MODEL, non_empty(model).map(Value::from));
    fold(ATTR_PROVIDER, non_empty(provider).map(Value::from));
    fold(ATTR_PROMPT_TOKENS, prompt_tokens.map(Value::from));
    fold(ATTR_COMPLETION_TOKENS, completion_tokens.map(Value::from));
    fold(ATTR_TOTAL_TOKENS, total_tokens.map(Value::from));
    fold(
        ATTR_COST_USD,
        cost_usd
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
    );
}

fn check_size(value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let size = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0);
    if size > MAX_SPAN_PAYLOAD_BYTES {
        issues.push(ValidationIssue::new(
            IssueCode::PayloadTooLarge,
            path,
            format!(
                "Value is {} bytes, the limit is {} bytes",
                size, MAX_SPAN_PAYLOAD_BYTES
            ),
        ));
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter_map(|t| non_empty(Some(t)))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> IngestConfig {
        IngestConfig::default()
    }

    fn now() -> DateTime<Utc> {
        parse_timestamp("2024-01-01T12:00:00Z").unwrap()
    }

    fn payload(value: Value) -> IngestPayload {
        serde_json::from_value(value).unwrap()
    }

    fn codes(rejection: &IngestRejection) -> Vec<IssueCode> {
        rejection.issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_valid_payload_accepted() {
        let validated = validate(
            payload(json!({
                "trace": { "id": "t1", "name": "agent", "tags": ["a", " a ", "b"] },
                "spans": [
                    { "id": "s1", "name": "root", "span_type": "agent",
                      "start_time": "2024-01-01T10:00:00Z", "end_time": "2024-01-01T10:00:02.450Z" },
                    { "id": "s2", "name": "call", "span_type": "vector_search", "parent_span_id": "s1",
                      "start_time": "2024-01-01T10:00:00.100Z", "end_time": "2024-01-01T10:00:00.600Z" }
                ]
            })),
            &limits(),
            now(),
        )
        .unwrap();

        assert_eq!(validated.trace.id, "t1");
        assert_eq!(validated.trace.tags, vec!["a", "b"]);
        assert_eq!(validated.spans.len(), 2);
        assert_eq!(validated.spans[0].latency_ms, Some(2450));
        assert_eq!(validated.spans[1].span_type, SpanType::Custom);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn test_defaults_for_missing_trace_fields() {
        let validated = validate(IngestPayload::default(), &limits(), now()).unwrap();
        assert_eq!(validated.trace.name, DEFAULT_TRACE_NAME);
        assert!(uuid::Uuid::parse_str(&validated.trace.id).is_ok());
        assert!(validated.spans.is_empty());
    }

    #[test]
    fn test_collects_all_issues() {
        let rejection = validate(
            payload(json!({
                "trace": { "id": "t1" },
                "spans": [
                    { "name": "no id", "start_time": "2024-01-01T10:00:00Z" },
                    { "id": "s2", "start_time": "not a time" },
                    { "id": "s3", "name": "no start" },
                    { "id": "s3", "name": "dup", "start_time": "2024-01-01T10:00:00Z" },
                    { "id": "s5", "name": "backwards", "start_time": "2024-01-01T10:00:01Z",
                      "end_time": "2024-01-01T10:00:00Z" },
                    { "id": "s6", "name": "neg", "start_time": "2024-01-01T10:00:00Z", "latency_ms": -4 }
                ]
            })),
            &limits(),
            now(),
        )
        .unwrap_err();

        assert_eq!(rejection.trace_id.as_deref(), Some("t1"));
        assert_eq!(
            codes(&rejection),
            vec![
                IssueCode::MissingSpanId,
                IssueCode::MissingSpanName,
                IssueCode::InvalidTimestamp,
                IssueCode::MissingStartTime,
                IssueCode::DuplicateSpanId,
                IssueCode::EndBeforeStart,
                IssueCode::InvalidLatency,
            ]
        );
        assert_eq!(rejection.issues[2].path, "spans[1].start_time");
        assert!(rejection.errors()[0].starts_with("spans[0].id: "));
    }

    #[test]
    fn test_too_many_spans() {
        let limits = IngestConfig {
            max_spans_per_trace: 1,
            ..IngestConfig::default()
        };
        let rejection = validate(
            payload(json!({ "spans": [
                { "id": "a", "name": "a", "start_time": "2024-01-01T10:00:00Z" },
                { "id": "b", "name": "b", "start_time": "2024-01-01T10:00:00Z" }
            ]})),
            &limits,
            now(),
        )
        .unwrap_err();
        assert_eq!(codes(&rejection), vec![IssueCode::TooManySpans]);
    }

    #[test]
    fn test_latency_mismatch_keeps_explicit_value() {
        let validated = validate(
            payload(json!({ "spans": [
                { "id": "a", "name": "a", "start_time": "2024-01-01T10:00:00Z",
                  "end_time": "2024-01-01T10:00:01Z", "latency_ms": 1500 },
                { "id": "b", "name": "b", "start_time": "2024-01-01T10:00:00Z",
                  "end_time": "2024-01-01T10:00:01Z", "latency_ms": 1003 }
            ]})),
            &limits(),
            now(),
        )
        .unwrap();

        assert_eq!(validated.spans[0].latency_ms, Some(1500));
        assert!(validated.spans[0].latency_mismatch);
        // Within the 5 ms tolerance
        assert_eq!(validated.spans[1].latency_ms, Some(1003));
        assert!(!validated.spans[1].latency_mismatch);
        assert_eq!(validated.warnings.len(), 1);
    }

    #[test]
    fn test_open_span_accepted_with_warning() {
        let validated = validate(
            payload(json!({ "spans": [
                { "id": "a", "name": "a", "start_time": "2024-01-01T10:00:00Z", "end_time": null }
            ]})),
            &limits(),
            now(),
        )
        .unwrap();
        assert_eq!(validated.spans[0].end_time, None);
        assert_eq!(validated.spans[0].latency_ms, None);
        assert!(validated.warnings[0].contains("no end_time"));
    }

    #[test]
    fn test_flat_llm_fields_folded_into_attributes() {
        let validated = validate(
            payload(json!({ "spans": [
                { "id": "a", "name": "llm", "type": "llm", "start_time": "2024-01-01T10:00:00Z",
                  "model": "gpt-4-turbo", "prompt_tokens": 150, "completion_tokens": 45,
                  "attributes": { "model": "gpt-4o" } }
            ]})),
            &limits(),
            now(),
        )
        .unwrap();
        let span = &validated.spans[0];
        assert_eq!(span.span_type, SpanType::Llm);
        // Explicit attribute wins over the flat field
        assert_eq!(span.model(), Some("gpt-4o"));
        assert_eq!(span.token_usage().total_tokens(), 195);
    }

    #[test]
    fn test_empty_parent_is_root() {
        let validated = validate(
            payload(json!({ "spans": [
                { "id": "a", "name": "a", "parent_span_id": "", "start_time": "2024-01-01T10:00:00Z" }
            ]})),
            &limits(),
            now(),
        )
        .unwrap();
        assert_eq!(validated.spans[0].parent_span_id, None);
    }

    #[test]
    fn test_parse_payload_malformed() {
        let rejection = parse_payload(b"{ not json").unwrap_err();
        assert_eq!(codes(&rejection), vec![IssueCode::MalformedPayload]);
        assert!(parse_payload(br#"{"spans": []}"#).is_ok());
    }
}
