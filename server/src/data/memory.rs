//! In-memory storage backend
//!
//! Suitable for tests and ephemeral runs: process exit loses everything.
//! Each trace is one map entry, so replacing a trace swaps its whole span
//! set in a single insert.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use crate::data::error::DataError;
use crate::data::traits::TraceRepository;
use crate::data::types::{
    EvaluationFilter, ListTracesParams, ModelCostRow, OrderDirection, SpanWrite, TraceRollup,
    TraceSortField, TraceSummary, TraceWrite, UpsertOutcome,
};
use crate::domain::evaluations::EvaluationRecord;
use crate::domain::traces::{SpanRecord, TraceRecord};

struct StoredTrace {
    trace: TraceRecord,
    /// Ordered by start_time, then id
    spans: Vec<SpanWrite>,
    rollup: TraceRollup,
}

impl StoredTrace {
    fn summary(&self) -> TraceSummary {
        TraceSummary {
            id: self.trace.id.clone(),
            name: self.trace.name.clone(),
            session_id: self.trace.session_id.clone(),
            user_id: self.trace.user_id.clone(),
            tags: self.trace.tags.clone(),
            ingested_at: self.trace.ingested_at,
            rollup: self.rollup.clone(),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    traces: DashMap<String, StoredTrace>,
    evaluations: RwLock<Vec<EvaluationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }
}

#[async_trait]
impl TraceRepository for Arc<MemoryStore> {
    async fn upsert_trace(&self, write: &TraceWrite) -> Result<UpsertOutcome, DataError> {
        let mut spans = write.spans.clone();
        spans.sort_by(|a, b| {
            a.span
                .start_time
                .cmp(&b.span.start_time)
                .then_with(|| a.span.id.cmp(&b.span.id))
        });

        let mut stored = StoredTrace {
            trace: write.trace.clone(),
            spans,
            rollup: write.rollup.clone(),
        };

        Ok(match self.traces.entry(write.trace.id.clone()) {
            Entry::Occupied(mut entry) => {
                // A replace keeps the first ingested_at
                stored.trace.ingested_at = entry.get().trace.ingested_at;
                entry.insert(stored);
                UpsertOutcome::Replaced
            }
            Entry::Vacant(entry) => {
                entry.insert(stored);
                UpsertOutcome::Created
            }
        })
    }

    async fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, DataError> {
        Ok(self.traces.get(trace_id).map(|t| t.trace.clone()))
    }

    async fn list_traces(
        &self,
        params: &ListTracesParams,
    ) -> Result<(Vec<TraceSummary>, u64), DataError> {
        let name_filter = params.name.as_deref().map(str::to_lowercase);

        let mut rows: Vec<TraceSummary> = self
            .traces
            .iter()
            .filter(|t| {
                params
                    .session_id
                    .as_deref()
                    .is_none_or(|s| t.trace.session_id.as_deref() == Some(s))
                    && params
                        .user_id
                        .as_deref()
                        .is_none_or(|u| t.trace.user_id.as_deref() == Some(u))
                    && name_filter
                        .as_deref()
                        .is_none_or(|n| t.trace.name.to_lowercase().contains(n))
            })
            .map(|t| t.summary())
            .collect();

        let total = rows.len() as u64;
        rows.sort_by(|a, b| compare_summaries(a, b, params.order.field, params.order.direction));

        let rows = rows
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.limit as usize)
            .collect();
        Ok((rows, total))
    }

    async fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, DataError> {
        Ok(self
            .traces
            .get(trace_id)
            .map(|t| t.spans.iter().map(|s| s.span.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_span(&self, span_id: &str) -> Result<Vec<String>, DataError> {
        let mut trace_ids: Vec<String> = self
            .traces
            .iter()
            .filter(|t| t.spans.iter().any(|s| s.span.id == span_id))
            .map(|t| t.key().clone())
            .collect();
        trace_ids.sort();
        Ok(trace_ids)
    }

    async fn insert_evaluation(&self, evaluation: &EvaluationRecord) -> Result<(), DataError> {
        self.evaluations.write().push(evaluation.clone());
        Ok(())
    }

    async fn list_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<EvaluationRecord>, DataError> {
        let mut rows: Vec<EvaluationRecord> = self
            .evaluations
            .read()
            .iter()
            .filter(|e| {
                filter.trace_id.as_deref().is_none_or(|t| e.trace_id == t)
                    && filter
                        .span_id
                        .as_deref()
                        .is_none_or(|s| e.span_id.as_deref() == Some(s))
                    && filter.evaluator_type.is_none_or(|t| e.evaluator_type == t)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn cost_by_model(&self) -> Result<Vec<ModelCostRow>, DataError> {
        let mut groups: BTreeMap<String, ModelCostRow> = BTreeMap::new();
        for trace in self.traces.iter() {
            for write in &trace.spans {
                let Some(model) = write.span.model() else {
                    continue;
                };
                let usage = write.span.token_usage();
                let row = groups
                    .entry(model.to_string())
                    .or_insert_with(|| ModelCostRow {
                        model: model.to_string(),
                        total_cost_usd: 0.0,
                        request_count: 0,
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        total_tokens: 0,
                        avg_cost_usd: 0.0,
                    });
                row.total_cost_usd += write.cost_usd;
                row.request_count += 1;
                row.prompt_tokens += usage.prompt.unwrap_or(0).max(0);
                row.completion_tokens += usage.completion.unwrap_or(0).max(0);
                row.total_tokens += usage.total_tokens();
            }
        }

        let mut rows: Vec<ModelCostRow> = groups
            .into_values()
            .map(|mut row| {
                row.avg_cost_usd = row.total_cost_usd / row.request_count.max(1) as f64;
                row
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_cost_usd
                .partial_cmp(&a.total_cost_usd)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });
        Ok(rows)
    }
}

/// Same ordering as the SQL backend: missing values last, ties by id
fn compare_summaries(
    a: &TraceSummary,
    b: &TraceSummary,
    field: TraceSortField,
    direction: OrderDirection,
) -> Ordering {
    fn nulls_last<T: PartialOrd>(a: Option<T>, b: Option<T>, dir: OrderDirection) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                match dir {
                    OrderDirection::Asc => ord,
                    OrderDirection::Desc => ord.reverse(),
                }
            }
        }
    }

    let ord = match field {
        TraceSortField::StartTime => {
            nulls_last(a.rollup.start_time, b.rollup.start_time, direction)
        }
        TraceSortField::LatencyMs => {
            nulls_last(a.rollup.latency_ms, b.rollup.latency_ms, direction)
        }
        TraceSortField::TotalCostUsd => nulls_last(
            Some(a.rollup.total_cost_usd),
            Some(b.rollup.total_cost_usd),
            direction,
        ),
        TraceSortField::IngestedAt => {
            nulls_last(Some(a.ingested_at), Some(b.ingested_at), direction)
        }
    };
    ord.then_with(|| a.id.cmp(&b.id))
}
