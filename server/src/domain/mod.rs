//! Domain logic for trace observability
//!
//! - `traces` - Ingestion, hierarchy reconstruction and aggregation
//! - `evaluations` - Quality scores attached to traces and spans
//! - `pricing` - LLM cost calculation and model pricing

pub mod evaluations;
pub mod pricing;
pub mod traces;

pub use evaluations::EvaluationService;
pub use traces::TraceService;
