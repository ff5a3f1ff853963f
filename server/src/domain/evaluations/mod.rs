//! Evaluation attachment
//!
//! Scores from independent evaluators (hallucination detectors, LLM judges,
//! human review) attached to a trace or to one of its spans.

mod model;
mod service;

pub use model::{EvaluationRecord, EvaluatorType, TargetKind};
pub use service::{AttachEvaluation, EvaluationError, EvaluationService, MAX_LABEL_LENGTH};
