//! Trace storage rows and query parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::traces::{SpanRecord, TraceRecord};

// ============================================================================
// Write types
// ============================================================================

/// Aggregates cached on the trace row for listing and ordering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TraceRollup {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub total_cost_usd: f64,
    pub total_tokens: i64,
    pub span_count: u64,
    pub error_count: u64,
    pub incomplete: bool,
    /// Orphans plus broken cycles
    pub anomaly_count: u64,
}

/// A span together with the values derived for it at ingest time
#[derive(Debug, Clone, PartialEq)]
pub struct SpanWrite {
    pub span: SpanRecord,
    pub cost_usd: f64,
}

/// Everything persisted for one accepted payload
#[derive(Debug, Clone)]
pub struct TraceWrite {
    pub trace: TraceRecord,
    pub spans: Vec<SpanWrite>,
    pub rollup: TraceRollup,
}

/// Whether an upsert created a trace or replaced an earlier submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
}

impl UpsertOutcome {
    pub fn is_replaced(self) -> bool {
        self == UpsertOutcome::Replaced
    }
}

// ============================================================================
// Row types (query results)
// ============================================================================

/// One line of the trace listing
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TraceSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub ingested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub rollup: TraceRollup,
}

/// Cost grouped by model across every stored span
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ModelCostRow {
    pub model: String,
    pub total_cost_usd: f64,
    pub request_count: u64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub avg_cost_usd: f64,
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Desc,
    Asc,
}

impl OrderDirection {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Columns the trace listing may be ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceSortField {
    #[default]
    StartTime,
    LatencyMs,
    TotalCostUsd,
    IngestedAt,
}

impl TraceSortField {
    pub const ALLOWED: &'static [&'static str] =
        &["start_time", "latency_ms", "total_cost_usd", "ingested_at"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start_time" => Some(Self::StartTime),
            "latency_ms" => Some(Self::LatencyMs),
            "total_cost_usd" => Some(Self::TotalCostUsd),
            "ingested_at" => Some(Self::IngestedAt),
            _ => None,
        }
    }

    pub const fn column(&self) -> &'static str {
        match self {
            Self::StartTime => "start_time",
            Self::LatencyMs => "latency_ms",
            Self::TotalCostUsd => "total_cost_usd",
            Self::IngestedAt => "ingested_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceOrder {
    pub field: TraceSortField,
    pub direction: OrderDirection,
}

/// Parameters for list_traces. `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct ListTracesParams {
    pub page: u32,
    pub limit: u32,
    pub order: TraceOrder,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Case-insensitive substring match on the trace name
    pub name: Option<String>,
}

impl ListTracesParams {
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_field_parse() {
        for name in TraceSortField::ALLOWED {
            assert_eq!(TraceSortField::parse(name).unwrap().column(), *name);
        }
        assert_eq!(TraceSortField::parse("name; DROP TABLE traces"), None);
    }

    #[test]
    fn test_offset() {
        let params = ListTracesParams {
            page: 3,
            limit: 20,
            ..Default::default()
        };
        assert_eq!(params.offset(), 40);
        assert_eq!(ListTracesParams::default().offset(), 0);
    }

    #[test]
    fn test_summary_flattens_rollup() {
        let summary = TraceSummary {
            id: "t".into(),
            name: "n".into(),
            session_id: None,
            user_id: None,
            tags: vec![],
            ingested_at: DateTime::UNIX_EPOCH,
            rollup: TraceRollup {
                latency_ms: Some(12),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["latency_ms"], 12);
        assert!(json.get("rollup").is_none());
    }
}
