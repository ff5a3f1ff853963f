//! Attaching evaluations to traces and spans

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::model::{EvaluationRecord, EvaluatorType, TargetKind};
use crate::data::types::EvaluationFilter;
use crate::data::{DataError, TraceRepository};
use crate::utils::string::{is_valid_id, non_empty};
use crate::utils::time::truncate_to_micros;

/// Longest accepted label (`pass`, `fail`, `good`, ...)
pub const MAX_LABEL_LENGTH: usize = 50;

#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Score must be a finite number in [0, 1]; it is never clamped
    #[error("score must be between 0 and 1 inclusive, got {0}")]
    InvalidScore(f64),

    #[error("unknown evaluator type '{0}'")]
    UnknownEvaluator(String),

    #[error("invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("{} '{id}' not found", .kind.as_str())]
    TargetNotFound { kind: TargetKind, id: String },

    /// Span ids are unique per trace; the caller must name the trace
    #[error("span '{span_id}' exists in {} traces; pass trace_id to choose one", .trace_ids.len())]
    AmbiguousSpan {
        span_id: String,
        trace_ids: Vec<String>,
    },

    #[error(transparent)]
    Storage(#[from] DataError),
}

/// Request to attach one evaluation
#[derive(Debug, Clone)]
pub struct AttachEvaluation {
    pub target_id: String,
    pub target_kind: TargetKind,
    /// Owning trace of a span target; optional unless the span id is ambiguous
    pub trace_id: Option<String>,
    pub evaluator_type: String,
    pub score: f64,
    pub label: Option<String>,
    pub explanation: Option<String>,
    pub metadata: Option<Value>,
}

pub struct EvaluationService {
    repo: Arc<dyn TraceRepository>,
}

impl EvaluationService {
    pub fn new(repo: Arc<dyn TraceRepository>) -> Self {
        Self { repo }
    }

    /// Validate and store an evaluation. Repeated evaluations of the same
    /// type on the same target are all kept.
    pub async fn attach(
        &self,
        request: AttachEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, EvaluationError> {
        if !request.score.is_finite() || !(0.0..=1.0).contains(&request.score) {
            return Err(EvaluationError::InvalidScore(request.score));
        }

        let evaluator_type: EvaluatorType = request
            .evaluator_type
            .parse()
            .map_err(|_| EvaluationError::UnknownEvaluator(request.evaluator_type.clone()))?;

        let target_id = request.target_id.trim().to_string();
        if !is_valid_id(&target_id) {
            return Err(EvaluationError::InvalidField {
                field: "target_id",
                message: "must be 1-256 characters without control characters".into(),
            });
        }

        let label = non_empty(request.label);
        if let Some(label) = &label
            && label.chars().count() > MAX_LABEL_LENGTH
        {
            return Err(EvaluationError::InvalidField {
                field: "label",
                message: format!("must be at most {} characters", MAX_LABEL_LENGTH),
            });
        }

        let hint = non_empty(request.trace_id);
        let (trace_id, span_id) = match request.target_kind {
            TargetKind::Trace => {
                if let Some(hint) = &hint
                    && *hint != target_id
                {
                    return Err(EvaluationError::InvalidField {
                        field: "trace_id",
                        message: "must match target_id for trace targets".into(),
                    });
                }
                if self.repo.get_trace(&target_id).await?.is_none() {
                    return Err(EvaluationError::TargetNotFound {
                        kind: TargetKind::Trace,
                        id: target_id,
                    });
                }
                (target_id, None)
            }
            TargetKind::Span => {
                let trace_id = self.resolve_span_trace(&target_id, hint).await?;
                (trace_id, Some(target_id))
            }
        };

        let evaluation = EvaluationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            target_kind: request.target_kind,
            trace_id,
            span_id,
            evaluator_type,
            score: request.score,
            label,
            explanation: non_empty(request.explanation),
            metadata: request.metadata,
            created_at: truncate_to_micros(now),
        };

        self.repo.insert_evaluation(&evaluation).await?;

        tracing::debug!(
            evaluation_id = %evaluation.id,
            trace_id = %evaluation.trace_id,
            evaluator = %evaluation.evaluator_type,
            score = evaluation.score,
            "Attached evaluation"
        );
        Ok(evaluation)
    }

    pub async fn list(
        &self,
        filter: &EvaluationFilter,
    ) -> Result<Vec<EvaluationRecord>, EvaluationError> {
        Ok(self.repo.list_evaluations(filter).await?)
    }

    async fn resolve_span_trace(
        &self,
        span_id: &str,
        trace_hint: Option<String>,
    ) -> Result<String, EvaluationError> {
        if let Some(trace_id) = trace_hint {
            let found = self
                .repo
                .get_spans(&trace_id)
                .await?
                .iter()
                .any(|s| s.id == span_id);
            return if found {
                Ok(trace_id)
            } else {
                Err(EvaluationError::TargetNotFound {
                    kind: TargetKind::Span,
                    id: span_id.to_string(),
                })
            };
        }

        let mut trace_ids = self.repo.find_span(span_id).await?;
        match trace_ids.len() {
            0 => Err(EvaluationError::TargetNotFound {
                kind: TargetKind::Span,
                id: span_id.to_string(),
            }),
            1 => Ok(trace_ids.remove(0)),
            _ => Err(EvaluationError::AmbiguousSpan {
                span_id: span_id.to_string(),
                trace_ids,
            }),
        }
    }
}
