//! Trace and span records as stored after ingestion

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Kind of work a span represents
///
/// Unrecognized values deserialize to `Custom` so newer clients never get
/// rejected for sending a type this server does not know yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
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

impl SpanType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SpanType::Llm => "llm",
            SpanType::Retrieval => "retrieval",
            SpanType::Tool => "tool",
            SpanType::Chain => "chain",
            SpanType::Agent => "agent",
            SpanType::Embedding => "embedding",
            SpanType::Rerank => "rerank",
            SpanType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "llm" => SpanType::Llm,
            "retrieval" => SpanType::Retrieval,
            "tool" => SpanType::Tool,
            "chain" => SpanType::Chain,
            "agent" => SpanType::Agent,
            "embedding" => SpanType::Embedding,
            "rerank" => SpanType::Rerank,
            _ => SpanType::Custom,
        }
    }
}

impl From<String> for SpanType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the client for a span; anything but "error" is ok
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ToSchema, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
}

impl SpanStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("error") {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        }
    }
}

impl From<String> for SpanStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

/// A validated span belonging to one trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SpanRecord {
    pub id: String,
    pub name: String,
    pub span_type: SpanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Explicit client latency when given, otherwise end minus start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Explicit latency disagreed with the timestamps beyond tolerance
    #[serde(default)]
    pub latency_mismatch: bool,
}

/// Token counts read from span attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt: Option<i64>,
    pub completion: Option<i64>,
    pub total: Option<i64>,
}

impl TokenUsage {
    /// prompt + completion when either is present, else the reported total.
    /// Saturates at `i64::MAX`.
    pub fn total_tokens(&self) -> i64 {
        match (self.prompt, self.completion) {
            (None, None) => self.total.unwrap_or(0).max(0),
            (p, c) => p.unwrap_or(0).max(0).saturating_add(c.unwrap_or(0).max(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.is_none() && self.completion.is_none() && self.total.is_none()
    }
}

pub const ATTR_MODEL: &str = "model";
pub const ATTR_PROVIDER: &str = "provider";
pub const ATTR_PROMPT_TOKENS: &str = "prompt_tokens";
pub const ATTR_INPUT_TOKENS: &str = "input_tokens";
pub const ATTR_COMPLETION_TOKENS: &str = "completion_tokens";
pub const ATTR_OUTPUT_TOKENS: &str = "output_tokens";
pub const ATTR_TOTAL_TOKENS: &str = "total_tokens";
pub const ATTR_COST_USD: &str = "cost_usd";

impl SpanRecord {
    /// Milliseconds between start and end, if the span was closed
    pub fn timestamp_latency_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    pub fn model(&self) -> Option<&str> {
        self.attr_str(ATTR_MODEL)
    }

    pub fn provider(&self) -> Option<&str> {
        self.attr_str(ATTR_PROVIDER)
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt: self
                .attr_i64(ATTR_PROMPT_TOKENS)
                .or_else(|| self.attr_i64(ATTR_INPUT_TOKENS)),
            completion: self
                .attr_i64(ATTR_COMPLETION_TOKENS)
                .or_else(|| self.attr_i64(ATTR_OUTPUT_TOKENS)),
            total: self.attr_i64(ATTR_TOTAL_TOKENS),
        }
    }

    /// Client-reported cost; ignored unless finite and non-negative
    pub fn explicit_cost_usd(&self) -> Option<f64> {
        self.attributes
            .get(ATTR_COST_USD)
            .and_then(value_as_f64)
            .filter(|c| c.is_finite() && *c >= 0.0)
    }

    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Trace-level metadata as submitted (never aggregates)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TraceRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    pub ingested_at: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_span_type_unknown_is_custom() {
        let t: SpanType = serde_json::from_str(r#""vector_search""#).unwrap();
        assert_eq!(t, SpanType::Custom);
        let t: SpanType = serde_json::from_str(r#""LLM""#).unwrap();
        assert_eq!(t, SpanType::Llm);
        assert_eq!(serde_json::to_string(&SpanType::Rerank).unwrap(), r#""rerank""#);
    }

    #[test]
    fn test_span_status_parse() {
        assert_eq!(SpanStatus::parse("ERROR"), SpanStatus::Error);
        assert_eq!(SpanStatus::parse("cancelled"), SpanStatus::Ok);
    }

    #[test]
    fn test_token_usage_aliases() {
        let s = with_attrs(
            span("a", None, "2024-01-01T10:00:00Z", None),
            SpanType::Llm,
            json!({ "input_tokens": 10, "output_tokens": "5", "total_tokens": 99 }),
        );
        let usage = s.token_usage();
        assert_eq!(usage.prompt, Some(10));
        assert_eq!(usage.completion, Some(5));
        // prompt + completion wins over the reported total
        assert_eq!(usage.total_tokens(), 15);
    }

    #[test]
    fn test_token_usage_total_only() {
        let s = with_attrs(
            span("a", None, "2024-01-01T10:00:00Z", None),
            SpanType::Llm,
            json!({ "total_tokens": 42 }),
        );
        assert_eq!(s.token_usage().total_tokens(), 42);
        assert!(span("b", None, "2024-01-01T10:00:00Z", None)
            .token_usage()
            .is_empty());
    }

    #[test]
    fn test_token_total_saturates() {
        let usage = TokenUsage {
            prompt: Some(i64::MAX),
            completion: Some(1),
            total: None,
        };
        assert_eq!(usage.total_tokens(), i64::MAX);
    }

    #[test]
    fn test_explicit_cost_filters_invalid() {
        let s = with_attrs(
            span("a", None, "2024-01-01T10:00:00Z", None),
            SpanType::Llm,
            json!({ "cost_usd": -1.0, "model": "  " }),
        );
        assert_eq!(s.explicit_cost_usd(), None);
        assert_eq!(s.model(), None);
    }

    #[test]
    fn test_timestamp_latency() {
        let s = span(
            "a",
            None,
            "2024-01-01T10:00:00Z",
            Some("2024-01-01T10:00:02.450Z"),
        );
        assert_eq!(s.timestamp_latency_ms(), Some(2450));
    }
}
