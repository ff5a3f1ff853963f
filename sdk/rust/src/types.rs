//! Wire types shared with the Arbor server

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of work a span describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    Llm,
    Retrieval,
    Tool,
    Chain,
    Agent,
    Embedding,
    Rerank,
    #[default]
    Custom,
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpanType::Llm => "llm",
            SpanType::Retrieval => "retrieval",
            SpanType::Tool => "tool",
            SpanType::Chain => "chain",
            SpanType::Agent => "agent",
            SpanType::Embedding => "embedding",
            SpanType::Rerank => "rerank",
            SpanType::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
}

/// Body of `POST /api/v1/traces`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub trace: TracePayload,
    pub spans: Vec<SpanPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePayload {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// One recorded span. `end_time` is absent for spans never ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanPayload {
    pub id: String,
    pub name: String,
    pub span_type: SpanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Server answer for an accepted trace
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestResponse {
    pub trace_id: String,
    pub status: String,
    #[serde(default)]
    pub replaced: bool,
    #[serde(default)]
    pub span_count: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Server answer for a rejected trace
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RejectedResponse {
    pub trace_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// `{"error", "code", "message"}` body of every other failure
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Trace,
    Span,
}

/// Body of `POST /api/v1/evaluations`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRequest {
    pub target_id: String,
    pub target_kind: TargetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub evaluator_type: String,
    /// Must lie in [0, 1]; the server rejects anything else
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl EvaluationRequest {
    pub fn for_trace(trace_id: impl Into<String>, evaluator_type: impl Into<String>, score: f64) -> Self {
        Self {
            target_id: trace_id.into(),
            target_kind: TargetKind::Trace,
            trace_id: None,
            evaluator_type: evaluator_type.into(),
            score,
            label: None,
            explanation: None,
            metadata: None,
        }
    }

    /// Span ids are unique only within a trace, so the owning trace is sent along
    pub fn for_span(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        evaluator_type: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            target_id: span_id.into(),
            target_kind: TargetKind::Span,
            trace_id: Some(trace_id.into()),
            evaluator_type: evaluator_type.into(),
            score,
            label: None,
            explanation: None,
            metadata: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

/// Stored evaluation as returned by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub target_kind: TargetKind,
    pub trace_id: String,
    pub span_id: Option<String>,
    pub evaluator_type: String,
    pub score: f64,
    pub label: Option<String>,
    pub explanation: Option<String>,
    pub created_at: DateTime<Utc>,
}
