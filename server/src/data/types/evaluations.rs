//! Evaluation query parameters

use crate::domain::evaluations::EvaluatorType;

/// Filter for list_evaluations; all set fields must match
#[derive(Debug, Clone, Default)]
pub struct EvaluationFilter {
    /// Matches evaluations of the trace and of any span in it
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub evaluator_type: Option<EvaluatorType>,
}
