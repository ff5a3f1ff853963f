//! # Arbor
//!
//! Client SDK for Arbor: record nested LLM, retrieval and tool spans while
//! your application runs and ship them to the server as one trace.
//!
//! ```no_run
//! use arbor::{Client, ClientConfig, EvaluationRequest, SpanType};
//! use serde_json::json;
//!
//! # async fn run() -> arbor::Result<()> {
//! let client = Client::new(ClientConfig::from_env())?;
//!
//! let trace = client.start_trace("Financial Research Agent");
//! trace.set_input(json!({"query": "How is Apple stock performing?"}));
//!
//! let root = trace.start_span("agent", SpanType::Agent, None);
//!
//! let retrieval = trace.start_span("knowledge_retrieval", SpanType::Retrieval, None);
//! retrieval.set_attribute("collection", "finance_db");
//! retrieval.end_with_output(json!({"doc_count": 2}));
//!
//! let llm = trace.start_span("llm_response", SpanType::Llm, None);
//! llm.set_llm_metadata("gpt-4-turbo", 150, 45);
//! llm.end();
//!
//! root.end();
//! let accepted = trace.end().await?;
//!
//! client
//!     .attach_evaluation(&EvaluationRequest::for_trace(accepted.trace_id, "relevance", 0.9))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Spans started without a parent nest under the most recently started span
//! that is still open. Spans recorded from other tasks should name their
//! parent explicitly.

mod client;
mod error;
mod trace;
mod types;

pub use client::{Client, ClientConfig, DEFAULT_URL, ENV_API_KEY, ENV_URL, TraceExporter};
pub use error::{Error, Result};
pub use trace::{Span, Trace};
pub use types::{
    Evaluation, EvaluationRequest, IngestPayload, IngestResponse, SpanPayload, SpanStatus,
    SpanType, TargetKind, TracePayload,
};
