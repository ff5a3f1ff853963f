//! OpenAPI document and Swagger UI

use axum::http::header;
use axum::response::{Html, IntoResponse, Json};
use utoipa::OpenApi;

use crate::api::routes::{analytics, evaluations, health, traces};
use crate::api::types::PaginationMeta;
use crate::data::types::{ModelCostRow, OrderDirection, TraceRollup, TraceSummary};
use crate::domain::evaluations::{EvaluationRecord, EvaluatorType, TargetKind};
use crate::domain::traces::{
    AnomalyKind, CostSource, IngestPayload, IssueCode, SpanNodeView, SpanPayload, SpanRecord,
    SpanStatus, SpanType, TraceDetail, TraceMetrics, TracePayload, TraceRecord, TreeAnomaly,
    ValidationIssue,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Arbor API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Trace ingestion and evaluation for LLM applications"
    ),
    tags(
        (name = "health", description = "Health check endpoint"),
        (name = "traces", description = "Trace ingestion and reads"),
        (name = "evaluations", description = "Evaluation scores on traces and spans"),
        (name = "analytics", description = "Cost analytics")
    ),
    paths(
        // Health
        health::health,
        // Traces
        traces::ingest_trace,
        traces::list_traces,
        traces::get_trace,
        traces::list_trace_spans,
        // Evaluations
        evaluations::attach_evaluation,
        evaluations::list_evaluations,
        // Analytics
        analytics::get_costs,
    ),
    components(schemas(
        // API types
        PaginationMeta,
        OrderDirection,
        // Health
        health::HealthResponse,
        // Ingestion
        IngestPayload,
        TracePayload,
        SpanPayload,
        ValidationIssue,
        IssueCode,
        traces::IngestStatus,
        traces::IngestAccepted,
        traces::IngestRejected,
        // Trace reads
        TraceRecord,
        SpanRecord,
        SpanType,
        SpanStatus,
        TraceSummary,
        TraceRollup,
        TraceDetail,
        TraceMetrics,
        SpanNodeView,
        CostSource,
        TreeAnomaly,
        AnomalyKind,
        // Evaluations
        EvaluationRecord,
        EvaluatorType,
        TargetKind,
        evaluations::AttachEvaluationRequest,
        // Analytics
        ModelCostRow,
        analytics::CostAnalyticsResponse,
    ))
)]
pub struct ApiDoc;

/// Serve the OpenAPI JSON document
pub async fn openapi_json() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(ApiDoc::openapi()),
    )
}

/// Serve Swagger UI from CDN
pub async fn swagger_ui_html() -> Html<&'static str> {
    Html(SWAGGER_UI_HTML)
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Arbor API Documentation</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; background: #fafafa; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = () => {
            window.ui = SwaggerUIBundle({
                url: "/api/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true
            });
        };
    </script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/v1/health",
            "/api/v1/traces",
            "/api/v1/traces/{trace_id}",
            "/api/v1/traces/{trace_id}/spans",
            "/api/v1/evaluations",
            "/api/v1/analytics/costs",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
