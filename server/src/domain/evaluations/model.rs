//! Evaluation records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// What an evaluation scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Trace,
    Span,
}

impl TargetKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Trace => "trace",
            TargetKind::Span => "span",
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(TargetKind::Trace),
            "span" => Ok(TargetKind::Span),
            other => Err(format!("unknown target kind '{}'", other)),
        }
    }
}

/// Fixed set of evaluators; unknown names are rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorType {
    Hallucination,
    Relevance,
    Toxicity,
    QaCorrectness,
    Summarization,
    CodeQuality,
    SqlCorrectness,
    LlmJudge,
    Custom,
}

impl EvaluatorType {
    pub const ALL: [EvaluatorType; 9] = [
        EvaluatorType::Hallucination,
        EvaluatorType::Relevance,
        EvaluatorType::Toxicity,
        EvaluatorType::QaCorrectness,
        EvaluatorType::Summarization,
        EvaluatorType::CodeQuality,
        EvaluatorType::SqlCorrectness,
        EvaluatorType::LlmJudge,
        EvaluatorType::Custom,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EvaluatorType::Hallucination => "hallucination",
            EvaluatorType::Relevance => "relevance",
            EvaluatorType::Toxicity => "toxicity",
            EvaluatorType::QaCorrectness => "qa_correctness",
            EvaluatorType::Summarization => "summarization",
            EvaluatorType::CodeQuality => "code_quality",
            EvaluatorType::SqlCorrectness => "sql_correctness",
            EvaluatorType::LlmJudge => "llm_judge",
            EvaluatorType::Custom => "custom",
        }
    }
}

impl FromStr for EvaluatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown evaluator type '{}'", s.trim()))
    }
}

impl fmt::Display for EvaluatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable score attached to a trace or a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvaluationRecord {
    pub id: String,
    pub target_kind: TargetKind,
    /// Owning trace; set for span targets as well
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub evaluator_type: EvaluatorType,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluator_type_parse() {
        assert_eq!("qa_correctness".parse(), Ok(EvaluatorType::QaCorrectness));
        assert_eq!(" LLM_JUDGE ".parse(), Ok(EvaluatorType::LlmJudge));
        assert!("vibes".parse::<EvaluatorType>().is_err());
        for t in EvaluatorType::ALL {
            assert_eq!(t.as_str().parse(), Ok(t));
            assert_eq!(
                serde_json::to_string(&t).unwrap(),
                format!("\"{}\"", t.as_str())
            );
        }
    }

    #[test]
    fn test_target_kind_parse() {
        assert_eq!("span".parse(), Ok(TargetKind::Span));
        assert!("Span".parse::<TargetKind>().is_err());
    }
}
