//! Shared data types for all storage backends

mod evaluations;
mod traces;

pub use evaluations::EvaluationFilter;
pub use traces::{
    ListTracesParams, ModelCostRow, OrderDirection, SpanWrite, TraceOrder, TraceRollup,
    TraceSortField, TraceSummary, TraceWrite, UpsertOutcome,
};
