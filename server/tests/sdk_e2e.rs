//! End-to-end: the client SDK talking to a live server over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use arbor::{
    Client, ClientConfig, EvaluationRequest, IngestPayload, SpanPayload, SpanStatus, SpanType,
    TraceExporter, TracePayload,
};
use arbor_server::api::auth::ApiKeySet;
use arbor_server::api::middleware::AllowedOrigins;
use arbor_server::api::{ApiServices, router};
use arbor_server::core::IngestConfig;
use arbor_server::data::StorageService;
use arbor_server::domain::pricing::PricingService;
use arbor_server::domain::{EvaluationService, TraceService};
use chrono::{DateTime, Utc};
use serde_json::Map;
use tokio::net::TcpListener;

const API_KEY: &str = "arb-e2e-test-key";

struct TestServer {
    addr: SocketAddr,
    traces: Arc<TraceService>,
}

impl TestServer {
    async fn spawn() -> Self {
        let repo = StorageService::memory().repository();
        let pricing = Arc::new(PricingService::embedded().unwrap());
        let traces = Arc::new(TraceService::new(
            repo.clone(),
            pricing,
            IngestConfig::default(),
        ));
        let services = ApiServices {
            traces: traces.clone(),
            evaluations: Arc::new(EvaluationService::new(repo)),
            api_keys: Arc::new(ApiKeySet::new(&[API_KEY.to_string()], true).unwrap()),
            storage_backend: "memory",
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(services, &AllowedOrigins::new("127.0.0.1", addr.port()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, traces }
    }

    fn client(&self, api_key: &str) -> Client {
        Client::new(ClientConfig::new(format!("http://{}", self.addr)).with_api_key(api_key))
            .unwrap()
    }
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn span(id: &str, parent: Option<&str>, start: &str, end: &str) -> SpanPayload {
    SpanPayload {
        id: id.into(),
        name: id.into(),
        span_type: SpanType::Chain,
        parent_span_id: parent.map(String::from),
        start_time: ts(start),
        end_time: Some(ts(end)),
        input: None,
        output: None,
        attributes: Map::new(),
        status: SpanStatus::Ok,
        error_message: None,
    }
}

#[tokio::test]
async fn test_root_with_two_children_latency() {
    let server = TestServer::spawn().await;
    let client = server.client(API_KEY);

    // Children sent before their parent; arrival order must not matter
    let payload = IngestPayload {
        trace: TracePayload {
            id: "e2e-trace".into(),
            name: "e2e".into(),
            metadata: None,
            session_id: None,
            user_id: None,
            tags: vec![],
            input: None,
            output: None,
        },
        spans: vec![
            span("s3", Some("s1"), "2024-05-01T10:00:00.650Z", "2024-05-01T10:00:01.050Z"),
            span("s2", Some("s1"), "2024-05-01T10:00:00.100Z", "2024-05-01T10:00:00.600Z"),
            span("s1", None, "2024-05-01T10:00:00Z", "2024-05-01T10:00:02.450Z"),
        ],
    };

    let accepted = client.export(&payload).await.unwrap();
    assert_eq!(accepted.trace_id, "e2e-trace");
    assert_eq!(accepted.span_count, 3);
    assert!(!accepted.replaced);

    let detail = server
        .traces
        .get_detail("e2e-trace")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.metrics.total_latency_ms, Some(2450));
    assert_eq!(detail.primary_root.as_deref(), Some("s1"));
    assert_eq!(detail.roots, vec!["s1".to_string()]);
    let root = detail.nodes.iter().find(|n| n.span.id == "s1").unwrap();
    assert_eq!(root.children, vec!["s2".to_string(), "s3".to_string()]);
    assert!(detail.anomalies.is_empty());

    // Re-sending the same trace replaces it instead of duplicating spans
    let again = client.export(&payload).await.unwrap();
    assert!(again.replaced);
    assert_eq!(
        server.traces.get_spans("e2e-trace").await.unwrap().unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_recorded_trace_round_trip() {
    let server = TestServer::spawn().await;
    let client = server.client(API_KEY);

    let trace = client.start_trace("Financial Research Agent");
    trace.set_session_id("session-1");
    let root = trace.start_span("agent", SpanType::Agent, None);
    let retrieval = trace.start_span("knowledge_retrieval", SpanType::Retrieval, None);
    retrieval.set_attribute("k", 2);
    retrieval.end();
    let llm = trace.start_span("llm_response", SpanType::Llm, None);
    llm.set_llm_metadata("gpt-4o", 150, 45);
    llm.set_attribute("cost_usd", 0.003);
    llm.end();
    let _unfinished = trace.start_span("cleanup", SpanType::Tool, Some(&root));
    root.end();

    let accepted = trace.end().await.unwrap();
    assert_eq!(accepted.span_count, 4);
    assert!(matches!(
        trace.end().await,
        Err(arbor::Error::AlreadyFlushed { .. })
    ));

    let detail = server
        .traces
        .get_detail(&accepted.trace_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.roots, vec![root.id().to_string()]);
    assert!(detail.metrics.incomplete);
    assert_eq!(detail.metrics.total_tokens, 195);
    assert!((detail.metrics.total_cost_usd - 0.003).abs() < 1e-12);
    let root_node = detail.nodes.iter().find(|n| n.span.id == root.id()).unwrap();
    assert_eq!(root_node.children.len(), 3);

    // Evaluations go through the same client
    let evaluation = client
        .attach_evaluation(&EvaluationRequest::for_span(
            accepted.trace_id.clone(),
            llm.id(),
            "hallucination",
            0.0,
        ))
        .await
        .unwrap();
    assert_eq!(evaluation.span_id.as_deref(), Some(llm.id()));

    let rejected = client
        .attach_evaluation(&EvaluationRequest::for_trace(
            accepted.trace_id.clone(),
            "relevance",
            1.4,
        ))
        .await;
    assert!(matches!(rejected, Err(arbor::Error::Api { status: 400, .. })));

    let detail = server
        .traces
        .get_detail(&accepted.trace_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.evaluations.len(), 1);
}

#[tokio::test]
async fn test_wrong_key_is_refused() {
    let server = TestServer::spawn().await;
    let trace = server.client("arb-not-the-key").start_trace("t");
    trace.start_span("root", SpanType::Chain, None).end();

    match trace.end().await {
        Err(arbor::Error::Api { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {other:?}"),
    }
}
