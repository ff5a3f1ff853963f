//! TraceRepository trait implementation for SQLite
//!
//! Delegates to the free functions in `repositories`, converting errors into
//! the unified `DataError`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::traits::TraceRepository;
use crate::data::types::{
    EvaluationFilter, ListTracesParams, ModelCostRow, TraceSummary, TraceWrite, UpsertOutcome,
};
use crate::domain::evaluations::EvaluationRecord;
use crate::domain::traces::{SpanRecord, TraceRecord};

use super::SqliteService;
use super::repositories::{evaluations, traces};

#[async_trait]
impl TraceRepository for Arc<SqliteService> {
    // ==================== Trace Operations ====================

    async fn upsert_trace(&self, write: &TraceWrite) -> Result<UpsertOutcome, DataError> {
        traces::upsert_trace(self.pool(), write)
            .await
            .map_err(Into::into)
    }

    async fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, DataError> {
        traces::get_trace(self.pool(), trace_id)
            .await
            .map_err(Into::into)
    }

    async fn list_traces(
        &self,
        params: &ListTracesParams,
    ) -> Result<(Vec<TraceSummary>, u64), DataError> {
        traces::list_traces(self.pool(), params)
            .await
            .map_err(Into::into)
    }

    // ==================== Span Operations ====================

    async fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, DataError> {
        traces::get_spans(self.pool(), trace_id)
            .await
            .map_err(Into::into)
    }

    async fn find_span(&self, span_id: &str) -> Result<Vec<String>, DataError> {
        traces::find_span(self.pool(), span_id)
            .await
            .map_err(Into::into)
    }

    // ==================== Evaluation Operations ====================

    async fn insert_evaluation(&self, evaluation: &EvaluationRecord) -> Result<(), DataError> {
        evaluations::insert_evaluation(self.pool(), evaluation)
            .await
            .map_err(Into::into)
    }

    async fn list_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<EvaluationRecord>, DataError> {
        evaluations::list_evaluations(self.pool(), filter)
            .await
            .map_err(Into::into)
    }

    // ==================== Analytics ====================

    async fn cost_by_model(&self) -> Result<Vec<ModelCostRow>, DataError> {
        traces::cost_by_model(self.pool())
            .await
            .map_err(Into::into)
    }
}
