//! Evaluation repository for SQLite operations
//!
//! Evaluations are append-only; there is no update or delete.

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::EvaluationFilter;
use crate::domain::evaluations::{EvaluationRecord, EvaluatorType, TargetKind};
use crate::utils::time::micros_to_datetime;

type EvaluationTuple = (
    String,
    String,
    String,
    Option<String>,
    String,
    f64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

pub async fn insert_evaluation(
    pool: &SqlitePool,
    evaluation: &EvaluationRecord,
) -> Result<(), SqliteError> {
    let metadata = evaluation
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO evaluations (id, target_kind, trace_id, span_id, evaluator_type, score, label, explanation, metadata, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&evaluation.id)
    .bind(evaluation.target_kind.as_str())
    .bind(&evaluation.trace_id)
    .bind(&evaluation.span_id)
    .bind(evaluation.evaluator_type.as_str())
    .bind(evaluation.score)
    .bind(&evaluation.label)
    .bind(&evaluation.explanation)
    .bind(metadata)
    .bind(evaluation.created_at.timestamp_micros())
    .execute(pool)
    .await?;

    Ok(())
}

/// Evaluations matching the filter, oldest first
pub async fn list_evaluations(
    pool: &SqlitePool,
    filter: &EvaluationFilter,
) -> Result<Vec<EvaluationRecord>, SqliteError> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut binds: Vec<&str> = Vec::new();

    if let Some(trace_id) = &filter.trace_id {
        conditions.push("trace_id = ?");
        binds.push(trace_id);
    }
    if let Some(span_id) = &filter.span_id {
        conditions.push("span_id = ?");
        binds.push(span_id);
    }
    if let Some(evaluator_type) = &filter.evaluator_type {
        conditions.push("evaluator_type = ?");
        binds.push(evaluator_type.as_str());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let query = format!(
        "SELECT id, target_kind, trace_id, span_id, evaluator_type, score, label, explanation, metadata, created_at FROM evaluations {} ORDER BY created_at ASC, id ASC",
        where_clause
    );

    let mut query_builder = sqlx::query_as::<_, EvaluationTuple>(&query);
    for value in binds {
        query_builder = query_builder.bind(value);
    }
    let rows = query_builder.fetch_all(pool).await?;

    let mut evaluations = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(evaluation) = evaluation_from_tuple(row)? {
            evaluations.push(evaluation);
        }
    }
    Ok(evaluations)
}

/// Rows with a target kind or evaluator this build does not know are skipped
fn evaluation_from_tuple(row: EvaluationTuple) -> Result<Option<EvaluationRecord>, SqliteError> {
    let (
        id,
        target_kind,
        trace_id,
        span_id,
        evaluator_type,
        score,
        label,
        explanation,
        metadata,
        created_at,
    ) = row;

    let (Ok(target_kind), Ok(evaluator_type)) = (
        target_kind.parse::<TargetKind>(),
        evaluator_type.parse::<EvaluatorType>(),
    ) else {
        tracing::warn!(evaluation_id = %id, "Skipping evaluation with unknown kind or type");
        return Ok(None);
    };

    Ok(Some(EvaluationRecord {
        id,
        target_kind,
        trace_id,
        span_id,
        evaluator_type,
        score,
        label,
        explanation,
        metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        created_at: micros_to_datetime(created_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traces::model::test_support::ts;
    use serde_json::json;

    async fn setup_test_pool() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        sqlx::query(crate::data::sqlite::schema::SCHEMA)
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn evaluation(id: &str, span_id: Option<&str>, score: f64, at: &str) -> EvaluationRecord {
        EvaluationRecord {
            id: id.to_string(),
            target_kind: if span_id.is_some() {
                TargetKind::Span
            } else {
                TargetKind::Trace
            },
            trace_id: "t1".to_string(),
            span_id: span_id.map(String::from),
            evaluator_type: EvaluatorType::Hallucination,
            score,
            label: Some("pass".into()),
            explanation: None,
            metadata: Some(json!({ "judge": "gpt-4o" })),
            created_at: ts(at),
        }
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let pool = setup_test_pool().await;
        let later = evaluation("e1", None, 1.0, "2024-01-01T10:00:01Z");
        let earlier = evaluation("e2", Some("s1"), 0.0, "2024-01-01T10:00:00Z");
        insert_evaluation(&pool, &later).await.unwrap();
        insert_evaluation(&pool, &earlier).await.unwrap();

        let all = list_evaluations(
            &pool,
            &EvaluationFilter {
                trace_id: Some("t1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all, vec![earlier.clone(), later]);

        let on_span = list_evaluations(
            &pool,
            &EvaluationFilter {
                span_id: Some("s1".into()),
                evaluator_type: Some(EvaluatorType::Hallucination),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(on_span, vec![earlier]);

        let none = list_evaluations(
            &pool,
            &EvaluationFilter {
                evaluator_type: Some(EvaluatorType::Toxicity),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_evaluations_are_kept() {
        let pool = setup_test_pool().await;
        for i in 0..3 {
            insert_evaluation(
                &pool,
                &evaluation(&format!("e{i}"), None, 0.5, "2024-01-01T10:00:00Z"),
            )
            .await
            .unwrap();
        }
        let all = list_evaluations(&pool, &EvaluationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_score_outside_range_rejected_by_schema() {
        let pool = setup_test_pool().await;
        let result = insert_evaluation(
            &pool,
            &evaluation("bad", None, 1.4, "2024-01-01T10:00:00Z"),
        )
        .await;
        assert!(matches!(result, Err(SqliteError::Database(_))));
    }
}
