//! Trace and span repository for SQLite operations
//!
//! Timestamps are stored as microseconds since epoch; JSON values as text.

use serde_json::{Map, Value};
use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::{
    ListTracesParams, ModelCostRow, TraceRollup, TraceSummary, TraceWrite, UpsertOutcome,
};
use crate::domain::traces::{SpanRecord, SpanStatus, SpanType, TraceRecord};
use crate::utils::time::micros_to_datetime;

type TraceSummaryTuple = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    f64,
    i64,
    i64,
    i64,
    bool,
    i64,
);

type SpanTuple = (
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    bool,
);

const SUMMARY_COLUMNS: &str = "id, name, session_id, user_id, tags, ingested_at, start_time, end_time, latency_ms, total_cost_usd, total_tokens, span_count, error_count, incomplete, anomaly_count";

const SPAN_COLUMNS: &str = "id, name, span_type, parent_span_id, start_time, end_time, latency_ms, input, output, attributes, status, error_message, latency_mismatch";

/// Store a trace and replace its span set in one transaction
pub async fn upsert_trace(
    pool: &SqlitePool,
    write: &TraceWrite,
) -> Result<UpsertOutcome, SqliteError> {
    let trace = &write.trace;
    let rollup = &write.rollup;
    let tags = serde_json::to_string(&trace.tags)?;
    let metadata = encode_optional(&trace.metadata)?;
    let input = encode_optional(&trace.input)?;
    let output = encode_optional(&trace.output)?;

    let mut tx = pool.begin().await?;

    // Write first so the transaction holds the write lock from the start.
    // A replace keeps the first ingested_at.
    let updated = sqlx::query(
        "UPDATE traces SET name = ?, session_id = ?, user_id = ?, tags = ?, metadata = ?, input = ?, output = ?, start_time = ?, end_time = ?, latency_ms = ?, total_cost_usd = ?, total_tokens = ?, span_count = ?, error_count = ?, incomplete = ?, anomaly_count = ? WHERE id = ?",
    )
    .bind(&trace.name)
    .bind(&trace.session_id)
    .bind(&trace.user_id)
    .bind(&tags)
    .bind(&metadata)
    .bind(&input)
    .bind(&output)
    .bind(rollup.start_time.map(|t| t.timestamp_micros()))
    .bind(rollup.end_time.map(|t| t.timestamp_micros()))
    .bind(rollup.latency_ms)
    .bind(rollup.total_cost_usd)
    .bind(rollup.total_tokens)
    .bind(rollup.span_count as i64)
    .bind(rollup.error_count as i64)
    .bind(rollup.incomplete)
    .bind(rollup.anomaly_count as i64)
    .bind(&trace.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let outcome = if updated > 0 {
        sqlx::query("DELETE FROM spans WHERE trace_id = ?")
            .bind(&trace.id)
            .execute(&mut *tx)
            .await?;
        UpsertOutcome::Replaced
    } else {
        sqlx::query(
            "INSERT INTO traces (id, name, session_id, user_id, tags, metadata, input, output, start_time, end_time, latency_ms, total_cost_usd, total_tokens, span_count, error_count, incomplete, anomaly_count, ingested_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trace.id)
        .bind(&trace.name)
        .bind(&trace.session_id)
        .bind(&trace.user_id)
        .bind(&tags)
        .bind(&metadata)
        .bind(&input)
        .bind(&output)
        .bind(rollup.start_time.map(|t| t.timestamp_micros()))
        .bind(rollup.end_time.map(|t| t.timestamp_micros()))
        .bind(rollup.latency_ms)
        .bind(rollup.total_cost_usd)
        .bind(rollup.total_tokens)
        .bind(rollup.span_count as i64)
        .bind(rollup.error_count as i64)
        .bind(rollup.incomplete)
        .bind(rollup.anomaly_count as i64)
        .bind(trace.ingested_at.timestamp_micros())
        .execute(&mut *tx)
        .await?;
        UpsertOutcome::Created
    };

    for write in &write.spans {
        let span = &write.span;
        let usage = span.token_usage();
        sqlx::query(
            "INSERT INTO spans (trace_id, id, name, span_type, parent_span_id, start_time, end_time, latency_ms, input, output, attributes, status, error_message, latency_mismatch, model, prompt_tokens, completion_tokens, total_tokens, cost_usd) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trace.id)
        .bind(&span.id)
        .bind(&span.name)
        .bind(span.span_type.as_str())
        .bind(&span.parent_span_id)
        .bind(span.start_time.timestamp_micros())
        .bind(span.end_time.map(|t| t.timestamp_micros()))
        .bind(span.latency_ms)
        .bind(encode_optional(&span.input)?)
        .bind(encode_optional(&span.output)?)
        .bind(serde_json::to_string(&span.attributes)?)
        .bind(span.status.as_str())
        .bind(&span.error_message)
        .bind(span.latency_mismatch)
        .bind(span.model())
        .bind(usage.prompt.unwrap_or(0).max(0))
        .bind(usage.completion.unwrap_or(0).max(0))
        .bind(usage.total_tokens())
        .bind(write.cost_usd)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::trace!(
        trace_id = %trace.id,
        spans = write.spans.len(),
        outcome = ?outcome,
        "Stored trace"
    );
    Ok(outcome)
}

/// Get a trace by ID
pub async fn get_trace(
    pool: &SqlitePool,
    trace_id: &str,
) -> Result<Option<TraceRecord>, SqliteError> {
    let row = sqlx::query_as::<
        _,
        (
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            i64,
        ),
    >(
        "SELECT id, name, session_id, user_id, tags, metadata, input, output, ingested_at FROM traces WHERE id = ?",
    )
    .bind(trace_id)
    .fetch_optional(pool)
    .await?;

    row.map(
        |(id, name, session_id, user_id, tags, metadata, input, output, ingested_at)| -> Result<TraceRecord, SqliteError> {
            Ok(TraceRecord {
                id,
                name,
                metadata: decode_optional(metadata)?,
                session_id,
                user_id,
                tags: serde_json::from_str(&tags)?,
                input: decode_optional(input)?,
                output: decode_optional(output)?,
                ingested_at: micros_to_datetime(ingested_at),
            })
        },
    )
    .transpose()
}

/// List trace summaries with filters, ordering and pagination
pub async fn list_traces(
    pool: &SqlitePool,
    params: &ListTracesParams,
) -> Result<(Vec<TraceSummary>, u64), SqliteError> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(session_id) = &params.session_id {
        conditions.push("session_id = ?");
        binds.push(session_id.clone());
    }
    if let Some(user_id) = &params.user_id {
        conditions.push("user_id = ?");
        binds.push(user_id.clone());
    }
    if let Some(name) = &params.name {
        conditions.push("instr(lower(name), ?) > 0");
        binds.push(name.to_lowercase());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let column = params.order.field.column();
    let query = format!(
        "SELECT {} FROM traces {} ORDER BY {} IS NULL, {} {}, id ASC LIMIT ? OFFSET ?",
        SUMMARY_COLUMNS,
        where_clause,
        column,
        column,
        params.order.direction.as_sql()
    );

    let mut query_builder = sqlx::query_as::<_, TraceSummaryTuple>(&query);
    for value in &binds {
        query_builder = query_builder.bind(value);
    }
    let rows = query_builder
        .bind(params.limit)
        .bind(params.offset())
        .fetch_all(pool)
        .await?;

    let count_query = format!("SELECT COUNT(*) FROM traces {}", where_clause);
    let mut count_builder = sqlx::query_as::<_, (i64,)>(&count_query);
    for value in &binds {
        count_builder = count_builder.bind(value);
    }
    let total: (i64,) = count_builder.fetch_one(pool).await?;

    let summaries = rows
        .into_iter()
        .map(summary_from_tuple)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((summaries, total.0 as u64))
}

/// Spans of a trace ordered by start_time, then id
pub async fn get_spans(pool: &SqlitePool, trace_id: &str) -> Result<Vec<SpanRecord>, SqliteError> {
    let query = format!(
        "SELECT {} FROM spans WHERE trace_id = ? ORDER BY start_time ASC, id ASC",
        SPAN_COLUMNS
    );
    let rows = sqlx::query_as::<_, SpanTuple>(&query)
        .bind(trace_id)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(span_from_tuple).collect()
}

/// Trace ids that contain a span with this id
pub async fn find_span(pool: &SqlitePool, span_id: &str) -> Result<Vec<String>, SqliteError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT trace_id FROM spans WHERE id = ? ORDER BY trace_id ASC",
    )
    .bind(span_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(trace_id,)| trace_id).collect())
}

/// Cost grouped by model, most expensive first
pub async fn cost_by_model(pool: &SqlitePool) -> Result<Vec<ModelCostRow>, SqliteError> {
    let rows = sqlx::query_as::<_, (String, f64, i64, i64, i64, i64)>(
        "SELECT model, SUM(cost_usd), COUNT(*), SUM(prompt_tokens), SUM(completion_tokens), SUM(total_tokens) FROM spans WHERE model IS NOT NULL GROUP BY model ORDER BY SUM(cost_usd) DESC, model ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(model, total_cost_usd, count, prompt_tokens, completion_tokens, total_tokens)| {
                let request_count = count.max(0) as u64;
                ModelCostRow {
                    model,
                    total_cost_usd,
                    request_count,
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                    avg_cost_usd: total_cost_usd / request_count.max(1) as f64,
                }
            },
        )
        .collect())
}

fn summary_from_tuple(row: TraceSummaryTuple) -> Result<TraceSummary, SqliteError> {
    let (
        id,
        name,
        session_id,
        user_id,
        tags,
        ingested_at,
        start_time,
        end_time,
        latency_ms,
        total_cost_usd,
        total_tokens,
        span_count,
        error_count,
        incomplete,
        anomaly_count,
    ) = row;

    Ok(TraceSummary {
        id,
        name,
        session_id,
        user_id,
        tags: serde_json::from_str(&tags)?,
        ingested_at: micros_to_datetime(ingested_at),
        rollup: TraceRollup {
            start_time: start_time.map(micros_to_datetime),
            end_time: end_time.map(micros_to_datetime),
            latency_ms,
            total_cost_usd,
            total_tokens,
            span_count: span_count.max(0) as u64,
            error_count: error_count.max(0) as u64,
            incomplete,
            anomaly_count: anomaly_count.max(0) as u64,
        },
    })
}

fn span_from_tuple(row: SpanTuple) -> Result<SpanRecord, SqliteError> {
    let (
        id,
        name,
        span_type,
        parent_span_id,
        start_time,
        end_time,
        latency_ms,
        input,
        output,
        attributes,
        status,
        error_message,
        latency_mismatch,
    ) = row;

    Ok(SpanRecord {
        id,
        name,
        span_type: SpanType::parse(&span_type),
        parent_span_id,
        start_time: micros_to_datetime(start_time),
        end_time: end_time.map(micros_to_datetime),
        latency_ms,
        input: decode_optional(input)?,
        output: decode_optional(output)?,
        attributes: serde_json::from_str::<Map<String, Value>>(&attributes)?,
        status: SpanStatus::parse(&status),
        error_message,
        latency_mismatch,
    })
}

fn encode_optional(value: &Option<Value>) -> Result<Option<String>, SqliteError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn decode_optional(value: Option<String>) -> Result<Option<Value>, SqliteError> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(Into::into)
}
