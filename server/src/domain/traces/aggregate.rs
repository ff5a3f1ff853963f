//! Trace roll-ups: latency, cost, tokens and grouped breakdowns
//!
//! `aggregate` is a pure function of the span tree and the price table. It
//! walks nodes in canonical order and groups into ordered maps, so the same
//! span set always serializes to the same bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::model::{SpanRecord, SpanStatus};
use super::tree::SpanTree;
use crate::domain::pricing::{MatchType, PricingService, SpanCostInput};

/// Where a span's cost came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// `cost_usd` attribute sent by the client
    Reported,
    /// Price table match
    Priced,
    /// Flat per-1k-token rate for an unknown model
    Fallback,
    /// No pricing data; contributes zero
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct SpanCost {
    pub cost_usd: f64,
    pub source: CostSource,
}

impl SpanCost {
    const ZERO: SpanCost = SpanCost {
        cost_usd: 0.0,
        source: CostSource::None,
    };
}

/// Cost of a single span. Reported cost wins, then the price table.
pub fn span_cost(span: &SpanRecord, pricing: &PricingService) -> SpanCost {
    if let Some(cost_usd) = span.explicit_cost_usd() {
        return SpanCost {
            cost_usd,
            source: CostSource::Reported,
        };
    }

    let Some(model) = span.model() else {
        return SpanCost::ZERO;
    };
    let usage = span.token_usage();
    if usage.is_empty() {
        return SpanCost::ZERO;
    }

    // Only a total was reported: price it all as input
    let (input_tokens, output_tokens) = match (usage.prompt, usage.completion) {
        (None, None) => (usage.total_tokens(), 0),
        (p, c) => (p.unwrap_or(0), c.unwrap_or(0)),
    };

    let output = pricing.calculate_cost(&SpanCostInput {
        system: span.provider().map(String::from),
        model: Some(model.to_string()),
        input_tokens,
        output_tokens,
    });

    let source = match output.match_type {
        Some(MatchType::Fallback) => CostSource::Fallback,
        Some(MatchType::NotFound) | None => CostSource::None,
        Some(_) => CostSource::Priced,
    };
    if source == CostSource::None {
        tracing::trace!(span_id = %span.id, model, "No pricing for model");
        return SpanCost::ZERO;
    }
    SpanCost {
        cost_usd: output.total_cost,
        source,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct TypeBreakdown {
    pub span_count: u64,
    pub error_count: u64,
    pub cost_usd: f64,
    pub total_tokens: i64,
    /// Sum of per-span latencies (spans overlap, so this exceeds wall time)
    pub latency_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ModelBreakdown {
    pub call_count: u64,
    pub cost_usd: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// Aggregates for one trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct TraceMetrics {
    /// Earliest span start
    pub start_time: Option<DateTime<Utc>>,
    /// Latest span end among spans that have one
    pub end_time: Option<DateTime<Utc>>,
    pub total_latency_ms: Option<i64>,
    /// At least one span has no end_time
    pub incomplete: bool,
    pub total_cost_usd: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub span_count: u64,
    pub error_count: u64,
    pub root_count: u64,
    pub orphan_count: u64,
    pub cycle_count: u64,
    pub max_depth: u64,
    /// Spans that carried a model and tokens but could not be priced
    pub unpriced_span_count: u64,
    pub by_type: BTreeMap<String, TypeBreakdown>,
    pub by_model: BTreeMap<String, ModelBreakdown>,
}

/// Compute the roll-ups for a reconstructed trace
pub fn aggregate(tree: &SpanTree, pricing: &PricingService) -> TraceMetrics {
    let mut m = TraceMetrics {
        span_count: tree.len() as u64,
        root_count: tree.roots().len() as u64,
        orphan_count: tree.orphan_count() as u64,
        cycle_count: tree
            .anomalies()
            .iter()
            .filter(|a| a.kind == super::tree::AnomalyKind::CycleBroken)
            .count() as u64,
        max_depth: tree.max_depth() as u64,
        ..Default::default()
    };

    for node in tree.nodes() {
        let span = &node.span;

        m.start_time = Some(match m.start_time {
            Some(s) => s.min(span.start_time),
            None => span.start_time,
        });
        match span.end_time {
            Some(end) => {
                m.end_time = Some(m.end_time.map_or(end, |e| e.max(end)));
            }
            None => m.incomplete = true,
        }

        let is_error = span.status == SpanStatus::Error;
        if is_error {
            m.error_count += 1;
        }

        let usage = span.token_usage();
        let tokens = usage.total_tokens();
        let prompt = usage.prompt.unwrap_or(0).max(0);
        let completion = usage.completion.unwrap_or(0).max(0);
        // Counts come from clients; sums saturate instead of overflowing
        m.prompt_tokens = m.prompt_tokens.saturating_add(prompt);
        m.completion_tokens = m.completion_tokens.saturating_add(completion);
        m.total_tokens = m.total_tokens.saturating_add(tokens);

        let cost = span_cost(span, pricing);
        m.total_cost_usd += cost.cost_usd;
        if cost.source == CostSource::None && span.model().is_some() && !usage.is_empty() {
            m.unpriced_span_count += 1;
        }

        let by_type = m.by_type.entry(span.span_type.to_string()).or_default();
        by_type.span_count += 1;
        by_type.cost_usd += cost.cost_usd;
        by_type.total_tokens = by_type.total_tokens.saturating_add(tokens);
        by_type.latency_ms = by_type
            .latency_ms
            .saturating_add(span.latency_ms.unwrap_or(0));
        if is_error {
            by_type.error_count += 1;
        }

        if let Some(model) = span.model() {
            let by_model = m.by_model.entry(model.to_string()).or_default();
            by_model.call_count += 1;
            by_model.cost_usd += cost.cost_usd;
            by_model.prompt_tokens = by_model.prompt_tokens.saturating_add(prompt);
            by_model.completion_tokens = by_model.completion_tokens.saturating_add(completion);
            by_model.total_tokens = by_model.total_tokens.saturating_add(tokens);
        }
    }

    m.total_latency_ms = match (m.start_time, m.end_time) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
        _ => None,
    };

    m
}
