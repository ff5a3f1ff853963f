//! Trace buffer and span handles
//!
//! A [`Trace`] owns every span recorded under it. Span handles only hold an
//! index into that buffer, so concurrent branches can record and end spans
//! without touching each other's data. Nothing leaves the process until
//! [`Trace::end`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::client::TraceExporter;
use crate::error::{Error, Result};
use crate::types::{IngestPayload, IngestResponse, SpanPayload, SpanStatus, SpanType, TracePayload};

fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

struct TraceState {
    trace: TracePayload,
    spans: Vec<SpanPayload>,
    /// Ids of started, not yet ended spans, most recent last
    open: Vec<String>,
    /// Frozen payload once `end()` was called
    sealed: Option<IngestPayload>,
    delivered: bool,
}

impl TraceState {
    /// Apply a mutation unless the trace is sealed
    fn mutate(&mut self, what: &str, f: impl FnOnce(&mut Self)) {
        if self.sealed.is_some() {
            tracing::warn!(trace_id = %self.trace.id, what, "Trace already ended, ignoring change");
            return;
        }
        f(self);
    }
}

struct TraceInner {
    state: Mutex<TraceState>,
    exporter: Arc<dyn TraceExporter>,
}

/// One logical execution being recorded. Cheap to clone; clones share the
/// same buffer.
#[derive(Clone)]
pub struct Trace {
    inner: Arc<TraceInner>,
}

impl Trace {
    pub fn new(name: impl Into<String>, exporter: Arc<dyn TraceExporter>) -> Self {
        Self::with_id(new_id(), name, exporter)
    }

    /// Start a trace with a caller-chosen id (the server's idempotency key)
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        exporter: Arc<dyn TraceExporter>,
    ) -> Self {
        let trace = TracePayload {
            id: id.into(),
            name: name.into(),
            metadata: None,
            session_id: None,
            user_id: None,
            tags: Vec::new(),
            input: None,
            output: None,
        };
        Self {
            inner: Arc::new(TraceInner {
                state: Mutex::new(TraceState {
                    trace,
                    spans: Vec::new(),
                    open: Vec::new(),
                    sealed: None,
                    delivered: false,
                }),
                exporter,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.state.lock().trace.id.clone()
    }

    pub fn set_metadata(&self, metadata: Value) {
        self.inner
            .state
            .lock()
            .mutate("metadata", |s| s.trace.metadata = Some(metadata));
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.inner
            .state
            .lock()
            .mutate("session_id", |s| s.trace.session_id = Some(session_id));
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.inner
            .state
            .lock()
            .mutate("user_id", |s| s.trace.user_id = Some(user_id));
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        self.inner.state.lock().mutate("tags", |s| {
            if !s.trace.tags.contains(&tag) {
                s.trace.tags.push(tag);
            }
        });
    }

    pub fn set_input(&self, input: Value) {
        self.inner
            .state
            .lock()
            .mutate("input", |s| s.trace.input = Some(input));
    }

    pub fn set_output(&self, output: Value) {
        self.inner
            .state
            .lock()
            .mutate("output", |s| s.trace.output = Some(output));
    }

    /// Start a span
    ///
    /// Without an explicit `parent` the span nests under the most recently
    /// started span that is still open. Work running on other tasks should
    /// pass its parent explicitly since the open-span stack is shared.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        span_type: SpanType,
        parent: Option<&Span>,
    ) -> Span {
        let id = new_id();
        let mut state = self.inner.state.lock();

        let parent_span_id = match parent {
            Some(p) => Some(p.id.clone()),
            None => state.open.last().cloned(),
        };

        let span = SpanPayload {
            id: id.clone(),
            name: name.into(),
            span_type,
            parent_span_id,
            start_time: Utc::now(),
            end_time: None,
            input: None,
            output: None,
            attributes: Map::new(),
            status: SpanStatus::Ok,
            error_message: None,
        };

        // Spans started after end() are still handed out, but never recorded
        let index = state.spans.len();
        state.mutate("new span", |s| {
            s.spans.push(span);
            s.open.push(id.clone());
        });

        Span {
            trace: Arc::clone(&self.inner),
            index,
            id,
        }
    }

    /// Payload as it would be sent now
    pub fn to_payload(&self) -> IngestPayload {
        let state = self.inner.state.lock();
        match &state.sealed {
            Some(sealed) => sealed.clone(),
            None => IngestPayload {
                trace: state.trace.clone(),
                spans: state.spans.clone(),
            },
        }
    }

    /// Seal the trace and deliver every recorded span, ended or not
    ///
    /// The first call freezes the payload. If delivery fails the error is
    /// returned and calling `end()` again resends the same payload; the
    /// server treats the repeat as a replacement of the same trace id.
    pub async fn end(&self) -> Result<IngestResponse> {
        let payload = {
            let mut state = self.inner.state.lock();
            if state.delivered {
                return Err(Error::AlreadyFlushed {
                    trace_id: state.trace.id.clone(),
                });
            }
            match state.sealed.clone() {
                Some(sealed) => sealed,
                None => {
                    let open = state.open.len();
                    if open > 0 {
                        tracing::debug!(
                            trace_id = %state.trace.id,
                            open,
                            "Sending trace with spans that were never ended"
                        );
                    }
                    let sealed = IngestPayload {
                        trace: state.trace.clone(),
                        spans: state.spans.clone(),
                    };
                    state.sealed = Some(sealed.clone());
                    sealed
                }
            }
        };

        let response = self.inner.exporter.export(&payload).await?;
        self.inner.state.lock().delivered = true;
        Ok(response)
    }
}

/// Handle to one recorded span. Cheap to clone and safe to move across tasks.
#[derive(Clone)]
pub struct Span {
    trace: Arc<TraceInner>,
    index: usize,
    id: String,
}

impl Span {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn update(&self, what: &str, f: impl FnOnce(&mut SpanPayload)) {
        let mut state = self.trace.state.lock();
        let index = self.index;
        state.mutate(what, |s| {
            if let Some(span) = s.spans.get_mut(index) {
                f(span);
            }
        });
    }

    pub fn log_input(&self, data: Value) {
        self.update("input", |s| s.input = Some(data));
    }

    pub fn log_output(&self, data: Value) {
        self.update("output", |s| s.output = Some(data));
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.update("attribute", |s| {
            s.attributes.insert(key, value);
        });
    }

    /// Record the model and token counts used for cost roll-up
    pub fn set_llm_metadata(&self, model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) {
        let model = model.into();
        self.update("llm metadata", |s| {
            s.attributes.insert("model".into(), Value::from(model));
            s.attributes.insert("prompt_tokens".into(), Value::from(prompt_tokens));
            s.attributes.insert("completion_tokens".into(), Value::from(completion_tokens));
            s.attributes.insert(
                "total_tokens".into(),
                Value::from(prompt_tokens.saturating_add(completion_tokens)),
            );
        });
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update("error", |s| {
            s.status = SpanStatus::Error;
            s.error_message = Some(message);
        });
    }

    pub fn start_child(&self, name: impl Into<String>, span_type: SpanType) -> Span {
        let trace = Trace {
            inner: Arc::clone(&self.trace),
        };
        trace.start_span(name, span_type, Some(self))
    }

    /// End the span now. Ending twice keeps the first end time.
    pub fn end(&self) {
        self.finish(Utc::now(), None);
    }

    pub fn end_with_output(&self, output: Value) {
        self.finish(Utc::now(), Some(output));
    }

    fn finish(&self, at: DateTime<Utc>, output: Option<Value>) {
        let mut state = self.trace.state.lock();
        let index = self.index;
        let id = self.id.clone();
        state.mutate("end", |s| {
            if let Some(span) = s.spans.get_mut(index) {
                if span.end_time.is_none() {
                    span.end_time = Some(at.max(span.start_time));
                }
                if output.is_some() {
                    span.output = output;
                }
            }
            s.open.retain(|open| *open != id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records payloads; fails the first `failures` exports
    struct RecordingExporter {
        payloads: Mutex<Vec<IngestPayload>>,
        failures: AtomicUsize,
    }

    impl RecordingExporter {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                payloads: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(failures),
            })
        }
    }

    #[async_trait]
    impl TraceExporter for RecordingExporter {
        async fn export(&self, payload: &IngestPayload) -> Result<IngestResponse> {
            self.payloads.lock().push(payload.clone());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Api {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(IngestResponse {
                trace_id: payload.trace.id.clone(),
                status: "accepted".into(),
                replaced: false,
                span_count: payload.spans.len(),
                warnings: vec![],
            })
        }
    }

    fn span<'a>(payload: &'a IngestPayload, name: &str) -> &'a SpanPayload {
        payload.spans.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_default_parent_follows_open_spans() {
        let trace = Trace::new("t", RecordingExporter::new(0));
        let root = trace.start_span("root", SpanType::Agent, None);
        let retrieval = trace.start_span("retrieval", SpanType::Retrieval, None);
        retrieval.end();
        let llm = trace.start_span("llm", SpanType::Llm, None);
        llm.end();
        root.end();
        let after = trace.start_span("after", SpanType::Tool, None);

        let payload = trace.to_payload();
        assert_eq!(span(&payload, "root").parent_span_id, None);
        assert_eq!(span(&payload, "retrieval").parent_span_id.as_deref(), Some(root.id()));
        assert_eq!(span(&payload, "llm").parent_span_id.as_deref(), Some(root.id()));
        assert_eq!(span(&payload, "after").parent_span_id, None);
        assert!(span(&payload, "after").end_time.is_none());
        assert_eq!(after.id(), span(&payload, "after").id);
    }

    #[test]
    fn test_explicit_parent_overrides_stack() {
        let trace = Trace::new("t", RecordingExporter::new(0));
        let a = trace.start_span("a", SpanType::Chain, None);
        let _b = trace.start_span("b", SpanType::Chain, None);
        let c = trace.start_span("c", SpanType::Tool, Some(&a));
        let d = c.start_child("d", SpanType::Llm);

        let payload = trace.to_payload();
        assert_eq!(span(&payload, "c").parent_span_id.as_deref(), Some(a.id()));
        assert_eq!(span(&payload, "d").parent_span_id.as_deref(), Some(c.id()));
        assert_ne!(d.id(), c.id());
    }

    #[test]
    fn test_span_fields_and_double_end() {
        let trace = Trace::new("t", RecordingExporter::new(0));
        let s = trace.start_span("llm", SpanType::Llm, None);
        s.log_input(json!({"prompt": "hi"}));
        s.set_llm_metadata("gpt-4o", 150, 45);
        s.set_attribute("temperature", 0.2);
        s.set_error("rate limited");
        s.end_with_output(json!({"answer": "hello"}));
        let first_end = trace.to_payload().spans[0].end_time;
        s.end();

        let payload = trace.to_payload();
        let recorded = &payload.spans[0];
        assert_eq!(recorded.end_time, first_end);
        assert_eq!(recorded.attributes["total_tokens"], 195);
        assert_eq!(recorded.attributes["model"], "gpt-4o");
        assert_eq!(recorded.status, SpanStatus::Error);
        assert_eq!(recorded.output, Some(json!({"answer": "hello"})));
    }

    #[test]
    fn test_token_total_saturates() {
        let trace = Trace::new("t", RecordingExporter::new(0));
        let s = trace.start_span("llm", SpanType::Llm, None);
        s.set_llm_metadata("gpt-4o", u64::MAX, 1);

        let payload = trace.to_payload();
        assert_eq!(payload.spans[0].attributes["total_tokens"], u64::MAX);
    }

    #[test]
    fn test_trace_fields() {
        let trace = Trace::with_id("trace-1", "chat", RecordingExporter::new(0));
        trace.set_metadata(json!({"env": "test"}));
        trace.set_user_id("user-7");
        trace.add_tag("beta");
        trace.add_tag("beta");
        trace.set_input(json!("question"));
        trace.set_output(json!("answer"));

        let payload = trace.to_payload();
        assert_eq!(trace.id(), "trace-1");
        assert_eq!(payload.trace.metadata, Some(json!({"env": "test"})));
        assert_eq!(payload.trace.user_id.as_deref(), Some("user-7"));
        assert_eq!(payload.trace.tags, vec!["beta".to_string()]);
        assert_eq!(payload.trace.output, Some(json!("answer")));
    }

    #[tokio::test]
    async fn test_concurrent_branches_keep_their_data() {
        let trace = Trace::new("fan-out", RecordingExporter::new(0));
        let root = trace.start_span("root", SpanType::Agent, None);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let trace = trace.clone();
                let root = root.clone();
                tokio::spawn(async move {
                    let s = trace.start_span(format!("tool-{i}"), SpanType::Tool, Some(&root));
                    s.set_attribute("branch", i);
                    tokio::task::yield_now().await;
                    s.end_with_output(json!({ "branch": i }));
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        root.end();

        let payload = trace.to_payload();
        assert_eq!(payload.spans.len(), 17);
        for i in 0..16 {
            let s = span(&payload, &format!("tool-{i}"));
            assert_eq!(s.parent_span_id.as_deref(), Some(root.id()));
            assert_eq!(s.attributes["branch"], i);
            assert_eq!(s.output, Some(json!({ "branch": i })));
            assert!(s.end_time.is_some());
        }
    }

    #[tokio::test]
    async fn test_end_includes_open_spans_and_seals() {
        let exporter = RecordingExporter::new(0);
        let trace = Trace::new("t", exporter.clone());
        let root = trace.start_span("root", SpanType::Agent, None);
        let _never_ended = trace.start_span("dangling", SpanType::Tool, None);
        root.end();

        let response = trace.end().await.unwrap();
        assert_eq!(response.span_count, 2);

        // Changes after end() are ignored
        root.log_output(json!("late"));
        trace.set_user_id("u1");
        trace.start_span("late", SpanType::Tool, None);
        let payload = trace.to_payload();
        assert_eq!(payload.spans.len(), 2);
        assert_eq!(payload.trace.user_id, None);
        assert!(span(&payload, "dangling").end_time.is_none());

        assert!(matches!(
            trace.end().await,
            Err(Error::AlreadyFlushed { .. })
        ));
        assert_eq!(exporter.payloads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_can_be_retried() {
        let exporter = RecordingExporter::new(1);
        let trace = Trace::with_id("trace-1", "t", exporter.clone());
        trace.start_span("root", SpanType::Chain, None).end();

        assert!(matches!(trace.end().await, Err(Error::Api { status: 503, .. })));
        let response = trace.end().await.unwrap();
        assert_eq!(response.trace_id, "trace-1");

        let payloads = exporter.payloads.lock();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], payloads[1]);
    }
}
