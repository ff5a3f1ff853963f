//! SQLite repositories
//!
//! Types (TraceSummary, ModelCostRow, etc.) should be imported from `crate::data::types`.

pub mod evaluations;
pub mod traces;

pub use evaluations::{insert_evaluation, list_evaluations};
pub use traces::{cost_by_model, find_span, get_spans, get_trace, list_traces, upsert_trace};
