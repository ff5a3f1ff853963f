//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use super::auth::{ApiKeySet, require_auth};
use super::middleware::{self, AllowedOrigins};
use super::openapi::{openapi_json, swagger_ui_html};
use super::routes::{analytics, evaluations, health, traces};
use crate::core::CoreApp;
use crate::core::constants::{DEFAULT_BODY_LIMIT, INGEST_BODY_LIMIT};
use crate::domain::{EvaluationService, TraceService};

/// Everything the HTTP layer needs from the application
#[derive(Clone)]
pub struct ApiServices {
    pub traces: Arc<TraceService>,
    pub evaluations: Arc<EvaluationService>,
    pub api_keys: Arc<ApiKeySet>,
    /// Reported by the health endpoint
    pub storage_backend: &'static str,
}

/// Build the full HTTP router
///
/// Health and API docs are public; trace, evaluation and analytics routes
/// require an API key when auth is enabled.
pub fn router(services: ApiServices, allowed_origins: &AllowedOrigins) -> Router {
    let ApiServices {
        traces: trace_service,
        evaluations: evaluation_service,
        api_keys,
        storage_backend,
    } = services;

    let auth = axum::middleware::from_fn_with_state(api_keys, require_auth);

    // Ingestion accepts large (optionally gzipped) bodies
    let traces_routes = traces::routes(trace_service.clone())
        .layer(RequestDecompressionLayer::new())
        .layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT))
        .route_layer(auth.clone());

    let evaluations_routes = evaluations::routes(evaluation_service).route_layer(auth.clone());
    let analytics_routes = analytics::routes(trace_service).route_layer(auth);

    Router::new()
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/docs", get(swagger_ui_html))
        .route("/api/docs/", get(swagger_ui_html))
        .merge(health::routes(storage_backend))
        .merge(traces_routes)
        .merge(evaluations_routes)
        .merge(analytics_routes)
        .fallback(middleware::handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(middleware::cors(allowed_origins))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}

pub struct ApiServer {
    app: CoreApp,
    allowed_origins: AllowedOrigins,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        let allowed_origins = AllowedOrigins::new(&app.config.server.host, app.config.server.port);
        Self {
            app,
            allowed_origins,
        }
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self {
            app,
            allowed_origins,
        } = self;

        let shutdown = app.shutdown.clone();
        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let router = router(
            ApiServices {
                traces: app.traces.clone(),
                evaluations: app.evaluations.clone(),
                api_keys: app.api_keys.clone(),
                storage_backend: app.data.backend_name(),
            },
            &allowed_origins,
        );

        let listener = TcpListener::bind(addr).await?;
        tracing::debug!(%addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::core::IngestConfig;
    use crate::data::StorageService;
    use crate::domain::pricing::PricingService;

    const KEY: &str = "arb-test-key";

    fn test_router(auth_enabled: bool) -> Router {
        let repo = StorageService::memory().repository();
        let pricing = Arc::new(
            PricingService::from_json_str(
                r#"{"gpt-4o": {"input_cost_per_token": 0.0000025, "output_cost_per_token": 0.00001}}"#,
                None,
            )
            .unwrap(),
        );
        let services = ApiServices {
            traces: Arc::new(TraceService::new(
                repo.clone(),
                pricing,
                IngestConfig::default(),
            )),
            evaluations: Arc::new(EvaluationService::new(repo)),
            api_keys: Arc::new(ApiKeySet::new(&[KEY.to_string()], auth_enabled).unwrap()),
            storage_backend: "memory",
        };
        router(services, &AllowedOrigins::new("127.0.0.1", 5388))
    }

    fn trace_payload(trace_id: &str) -> Value {
        json!({
            "trace": {"id": trace_id, "name": "chat"},
            "spans": [
                {
                    "id": "s1",
                    "name": "agent",
                    "span_type": "agent",
                    "start_time": "2024-05-01T10:00:00Z",
                    "end_time": "2024-05-01T10:00:02.450Z"
                },
                {
                    "id": "s2",
                    "parent_span_id": "s1",
                    "name": "llm",
                    "span_type": "llm",
                    "model": "gpt-4o",
                    "start_time": "2024-05-01T10:00:00.100Z",
                    "end_time": "2024-05-01T10:00:01Z",
                    "cost_usd": 0.002
                },
                {
                    "id": "s3",
                    "parent_span_id": "s1",
                    "name": "tool",
                    "span_type": "tool",
                    "start_time": "2024-05-01T10:00:01.100Z",
                    "end_time": "2024-05-01T10:00:02Z",
                    "cost_usd": 0.003
                }
            ]
        })
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", KEY)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_key(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-api-key", KEY)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = test_router(true)
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_auth_required_and_invalid() {
        let app = test_router(true);

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/traces").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "AUTH_REQUIRED");

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/traces")
                    .header("x-api-key", "arb-wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "API_KEY_INVALID");

        let response = app
            .oneshot(
                Request::get("/api/v1/traces")
                    .header(header::AUTHORIZATION, format!("Bearer {KEY}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_disabled_allows_anonymous() {
        let response = test_router(false)
            .oneshot(Request::get("/api/v1/traces").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ingest_then_read_detail() {
        let app = test_router(true);

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/traces", &trace_payload("t1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["span_count"], 3);
        assert_eq!(body["replaced"], false);

        let response = app
            .clone()
            .oneshot(get_with_key("/api/v1/traces/t1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(etag.starts_with("W/\""));
        let detail = body_json(response).await;
        assert_eq!(detail["metrics"]["total_latency_ms"], 2450);
        assert!((detail["metrics"]["total_cost_usd"].as_f64().unwrap() - 0.005).abs() < 1e-9);
        assert_eq!(detail["primary_root"], "s1");
        assert_eq!(detail["roots"], json!(["s1"]));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/traces/t1")
                    .header("x-api-key", KEY)
                    .header(header::IF_NONE_MATCH, &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let response = app
            .oneshot(get_with_key("/api/v1/traces/t1/spans"))
            .await
            .unwrap();
        let spans = body_json(response).await;
        let ids: Vec<&str> = spans
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    async fn detail_etag(app: &Router, trace_id: &str) -> String {
        let response = app
            .clone()
            .oneshot(get_with_key(&format!("/api/v1/traces/{trace_id}")))
            .await
            .unwrap();
        response
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_etag_follows_content() {
        let app = test_router(true);
        let payload = trace_payload("t1");

        app.clone().oneshot(post_json("/api/v1/traces", &payload)).await.unwrap();
        let first = detail_etag(&app, "t1").await;

        let response = app.clone().oneshot(post_json("/api/v1/traces", &payload)).await.unwrap();
        assert_eq!(body_json(response).await["replaced"], true);
        assert_eq!(detail_etag(&app, "t1").await, first);

        let mut changed = payload.clone();
        changed["spans"][1]["cost_usd"] = json!(0.004);
        app.clone().oneshot(post_json("/api/v1/traces", &changed)).await.unwrap();
        assert_ne!(detail_etag(&app, "t1").await, first);
    }

    #[tokio::test]
    async fn test_ingest_rejected_stores_nothing() {
        let app = test_router(true);
        let mut payload = trace_payload("t-bad");
        payload["spans"][1]["end_time"] = json!("2024-05-01T09:00:00Z");

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/traces", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["trace_id"], "t-bad");
        assert!(!body["issues"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(get_with_key("/api/v1/traces/t-bad"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "TRACE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let response = test_router(true)
            .oneshot(
                Request::post("/api/v1/traces")
                    .header("x-api-key", KEY)
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "rejected");
    }

    #[tokio::test]
    async fn test_evaluation_score_bounds() {
        let app = test_router(true);
        app.clone()
            .oneshot(post_json("/api/v1/traces", &trace_payload("t1")))
            .await
            .unwrap();

        let evaluation = |score: f64| {
            json!({
                "target_id": "t1",
                "target_kind": "trace",
                "evaluator_type": "relevance",
                "score": score
            })
        };

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/evaluations", &evaluation(1.4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "INVALID_SCORE");

        for score in [1.0, 0.0] {
            let response = app
                .clone()
                .oneshot(post_json("/api/v1/evaluations", &evaluation(score)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
            assert_eq!(body_json(response).await["score"], score);
        }

        let response = app
            .clone()
            .oneshot(get_with_key("/api/v1/evaluations?trace_id=t1"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

        let response = app
            .oneshot(get_with_key("/api/v1/evaluations?evaluator_type=vibes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "UNKNOWN_EVALUATOR_TYPE");
    }

    #[tokio::test]
    async fn test_evaluation_ambiguous_span() {
        let app = test_router(true);
        for trace_id in ["t1", "t2"] {
            app.clone()
                .oneshot(post_json("/api/v1/traces", &trace_payload(trace_id)))
                .await
                .unwrap();
        }

        let mut request = json!({
            "target_id": "s2",
            "target_kind": "span",
            "evaluator_type": "hallucination",
            "score": 0.9
        });
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/evaluations", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "AMBIGUOUS_SPAN");

        request["trace_id"] = json!("t2");
        let response = app
            .clone()
            .oneshot(post_json("/api/v1/evaluations", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["trace_id"], "t2");
        assert_eq!(body["span_id"], "s2");

        let response = app
            .oneshot(post_json(
                "/api/v1/evaluations",
                &json!({
                    "target_id": "nope",
                    "target_kind": "span",
                    "evaluator_type": "hallucination",
                    "score": 0.5
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "TARGET_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_cost_analytics() {
        let app = test_router(true);
        app.clone()
            .oneshot(post_json("/api/v1/traces", &trace_payload("t1")))
            .await
            .unwrap();

        let response = app
            .oneshot(get_with_key("/api/v1/analytics/costs"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        // Only spans that name a model are grouped
        assert_eq!(body["request_count"], 1);
        assert_eq!(body["models"][0]["model"], "gpt-4o");
        assert!((body["total_cost_usd"].as_f64().unwrap() - 0.002).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = test_router(true)
            .oneshot(get_with_key("/api/v1/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "ROUTE_NOT_FOUND");
    }
}
