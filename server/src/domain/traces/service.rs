//! Trace ingestion and read-side assembly
//!
//! Ingest: validate, reconstruct, aggregate, persist. Reads rebuild the tree
//! and metrics from the stored spans on every request; nothing derived is
//! cached between calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use super::aggregate::{CostSource, TraceMetrics, aggregate, span_cost};
use super::ingest::{IngestPayload, IngestRejection, ValidatedTrace, parse_payload, validate};
use super::model::{SpanRecord, TraceRecord};
use super::tree::{SpanTree, TreeAnomaly};
use crate::core::config::IngestConfig;
use crate::data::types::{
    EvaluationFilter, ListTracesParams, ModelCostRow, SpanWrite, TraceRollup, TraceSummary,
    TraceWrite, UpsertOutcome,
};
use crate::data::{DataError, TraceRepository};
use crate::domain::evaluations::EvaluationRecord;
use crate::domain::pricing::PricingService;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Rejected(#[from] IngestRejection),

    #[error(transparent)]
    Storage(#[from] DataError),
}

/// Result of an accepted payload
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub trace_id: String,
    pub outcome: UpsertOutcome,
    pub span_count: usize,
    pub warnings: Vec<String>,
}

/// One node of the read interface's tree
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SpanNodeView {
    #[serde(flatten)]
    pub span: SpanRecord,
    pub children: Vec<String>,
    pub depth: usize,
    pub orphaned: bool,
    pub cycle_detected: bool,
    pub cost_usd: f64,
    pub cost_source: CostSource,
}

/// Reconstructed trace as served to dashboards
///
/// The tree is flattened: `roots` lists top-level span ids and `nodes` holds
/// every span in depth-first order, each naming its children.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TraceDetail {
    pub trace: TraceRecord,
    pub metrics: TraceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_root: Option<String>,
    pub roots: Vec<String>,
    pub nodes: Vec<SpanNodeView>,
    pub anomalies: Vec<TreeAnomaly>,
    pub evaluations: Vec<EvaluationRecord>,
}

pub struct TraceService {
    repo: Arc<dyn TraceRepository>,
    pricing: Arc<PricingService>,
    limits: IngestConfig,
}

impl TraceService {
    pub fn new(
        repo: Arc<dyn TraceRepository>,
        pricing: Arc<PricingService>,
        limits: IngestConfig,
    ) -> Self {
        Self {
            repo,
            pricing,
            limits,
        }
    }

    /// Decode and ingest a raw request body
    pub async fn ingest_bytes(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestError> {
        let payload = parse_payload(body)?;
        self.ingest(payload, now).await
    }

    /// Validate and store one trace. Nothing is written unless the whole
    /// payload is valid; re-sending a trace id replaces its spans.
    pub async fn ingest(
        &self,
        payload: IngestPayload,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestError> {
        let ValidatedTrace {
            trace,
            spans,
            warnings,
        } = validate(payload, &self.limits, now)?;

        let span_count = spans.len();
        let tree = SpanTree::build(spans.clone());
        let metrics = aggregate(&tree, &self.pricing);

        let spans = spans
            .into_iter()
            .map(|span| {
                let cost_usd = span_cost(&span, &self.pricing).cost_usd;
                SpanWrite { span, cost_usd }
            })
            .collect();

        let write = TraceWrite {
            rollup: rollup_from(&metrics, tree.anomalies().len()),
            trace,
            spans,
        };
        let outcome = self.repo.upsert_trace(&write).await?;

        tracing::debug!(
            trace_id = %write.trace.id,
            spans = span_count,
            replaced = outcome.is_replaced(),
            anomalies = tree.anomalies().len(),
            "Ingested trace"
        );

        Ok(IngestReceipt {
            trace_id: write.trace.id,
            outcome,
            span_count,
            warnings,
        })
    }

    /// Tree, metrics, anomalies and evaluations for one trace
    pub async fn get_detail(&self, trace_id: &str) -> Result<Option<TraceDetail>, DataError> {
        let Some(trace) = self.repo.get_trace(trace_id).await? else {
            return Ok(None);
        };
        let spans = self.repo.get_spans(trace_id).await?;
        let evaluations = self
            .repo
            .list_evaluations(&EvaluationFilter {
                trace_id: Some(trace_id.to_string()),
                ..Default::default()
            })
            .await?;

        let tree = SpanTree::build(spans);
        let metrics = aggregate(&tree, &self.pricing);

        let nodes = tree
            .depth_first()
            .map(|node| {
                let cost = span_cost(&node.span, &self.pricing);
                SpanNodeView {
                    span: node.span.clone(),
                    children: node
                        .children
                        .iter()
                        .map(|&c| tree.node(c).span.id.clone())
                        .collect(),
                    depth: node.depth,
                    orphaned: node.orphaned,
                    cycle_detected: node.cycle_detected,
                    cost_usd: cost.cost_usd,
                    cost_source: cost.source,
                }
            })
            .collect();

        Ok(Some(TraceDetail {
            trace,
            metrics,
            primary_root: tree.primary_root().map(|n| n.span.id.clone()),
            roots: tree
                .roots()
                .iter()
                .map(|&i| tree.node(i).span.id.clone())
                .collect(),
            nodes,
            anomalies: tree.anomalies().to_vec(),
            evaluations,
        }))
    }

    /// Flat span list ordered by start_time then id; `None` if the trace is unknown
    pub async fn get_spans(&self, trace_id: &str) -> Result<Option<Vec<SpanRecord>>, DataError> {
        if self.repo.get_trace(trace_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.repo.get_spans(trace_id).await?))
    }

    pub async fn list(
        &self,
        params: &ListTracesParams,
    ) -> Result<(Vec<TraceSummary>, u64), DataError> {
        self.repo.list_traces(params).await
    }

    pub async fn cost_by_model(&self) -> Result<Vec<ModelCostRow>, DataError> {
        self.repo.cost_by_model().await
    }
}

fn rollup_from(metrics: &TraceMetrics, anomaly_count: usize) -> TraceRollup {
    TraceRollup {
        start_time: metrics.start_time,
        end_time: metrics.end_time,
        latency_ms: metrics.total_latency_ms,
        total_cost_usd: metrics.total_cost_usd,
        total_tokens: metrics.total_tokens,
        span_count: metrics.span_count,
        error_count: metrics.error_count,
        incomplete: metrics.incomplete,
        anomaly_count: anomaly_count as u64,
    }
}
