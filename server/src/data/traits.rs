//! Repository trait for storage backends
//!
//! Each backend (SQLite, in-memory) implements this trait with its own
//! specific logic. Callers only see `dyn TraceRepository`.

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::types::{
    EvaluationFilter, ListTracesParams, ModelCostRow, TraceSummary, TraceWrite, UpsertOutcome,
};
use crate::domain::evaluations::EvaluationRecord;
use crate::domain::traces::{SpanRecord, TraceRecord};

#[async_trait]
pub trait TraceRepository: Send + Sync {
    // ==================== Trace Operations ====================

    /// Store a trace with its spans atomically. Re-submitting a trace id
    /// replaces the previous span set.
    async fn upsert_trace(&self, write: &TraceWrite) -> Result<UpsertOutcome, DataError>;

    /// Get a single trace by ID
    async fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, DataError>;

    /// List traces with pagination and filters
    async fn list_traces(
        &self,
        params: &ListTracesParams,
    ) -> Result<(Vec<TraceSummary>, u64), DataError>;

    // ==================== Span Operations ====================

    /// Spans of a trace ordered by start_time, then id
    async fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, DataError>;

    /// Trace ids containing a span with this id (ids are unique per trace only)
    async fn find_span(&self, span_id: &str) -> Result<Vec<String>, DataError>;

    // ==================== Evaluation Operations ====================

    async fn insert_evaluation(&self, evaluation: &EvaluationRecord) -> Result<(), DataError>;

    /// Evaluations ordered by created_at, then id
    async fn list_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<EvaluationRecord>, DataError>;

    // ==================== Analytics ====================

    /// Cost per model across all stored spans, most expensive first
    async fn cost_by_model(&self) -> Result<Vec<ModelCostRow>, DataError>;
}
