//! HTTP client for the Arbor server

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::trace::Trace;
use crate::types::{ErrorBody, Evaluation, EvaluationRequest, IngestPayload, IngestResponse, RejectedResponse};

/// Server URL used when none is configured
pub const DEFAULT_URL: &str = "http://127.0.0.1:5390";
pub const ENV_URL: &str = "ARBOR_URL";
pub const ENV_API_KEY: &str = "ARBOR_API_KEY";

const API_KEY_HEADER: &str = "x-api-key";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Arbor server
    pub base_url: String,
    /// Sent as `X-API-KEY` on every request
    pub api_key: Option<String>,
    /// Request timeout (default: 30 seconds)
    pub timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("arbor-rust/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Read `ARBOR_URL` and `ARBOR_API_KEY`
    pub fn from_env() -> Self {
        let base_url = std::env::var(ENV_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let config = Self::new(base_url);
        match std::env::var(ENV_API_KEY) {
            Ok(key) if !key.trim().is_empty() => config.with_api_key(key.trim()),
            _ => config,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Destination for finished traces
///
/// [`Client`] posts them to the server; tests and custom transports can
/// provide their own implementation.
#[async_trait]
pub trait TraceExporter: Send + Sync {
    async fn export(&self, payload: &IngestPayload) -> Result<IngestResponse>;
}

struct ClientInner {
    config: ClientConfig,
    http: HttpClient,
}

/// Arbor client. Cheap to clone.
///
/// ```no_run
/// use arbor::{Client, ClientConfig, SpanType};
///
/// # async fn run() -> arbor::Result<()> {
/// let client = Client::new(ClientConfig::new("http://127.0.0.1:5390").with_api_key("arb-..."))?;
///
/// let trace = client.start_trace("Financial Research Agent");
/// let retrieval = trace.start_span("knowledge_retrieval", SpanType::Retrieval, None);
/// retrieval.log_input(serde_json::json!({"search_term": "AAPL"}));
/// retrieval.end();
///
/// let response = trace.end().await?;
/// println!("stored {} spans", response.span_count);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            inner: Arc::new(ClientInner { config, http }),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Begin a new trace whose spans will be delivered through this client
    pub fn start_trace(&self, name: impl Into<String>) -> Trace {
        Trace::new(name, Arc::new(self.clone()))
    }

    /// Attach an evaluation score to a stored trace or span
    pub async fn attach_evaluation(&self, request: &EvaluationRequest) -> Result<Evaluation> {
        let response = self
            .request(self.inner.http.post(self.url("/api/v1/evaluations")))
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.inner.config.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::api_error(status, response).await)
    }

    async fn api_error(status: StatusCode, response: Response) -> Error {
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => format!("{}: {}", body.code, body.message),
            Err(_) => text,
        };
        Error::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl TraceExporter for Client {
    async fn export(&self, payload: &IngestPayload) -> Result<IngestResponse> {
        let response = self
            .request(self.inner.http.post(self.url("/api/v1/traces")))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<RejectedResponse>(&text) {
                Ok(rejected) => Error::Rejected {
                    trace_id: rejected.trace_id,
                    errors: rejected.errors,
                },
                Err(_) => Error::Api {
                    status: status.as_u16(),
                    message: text,
                },
            });
        }

        let accepted: IngestResponse = Self::parse(response).await?;
        tracing::debug!(
            trace_id = %accepted.trace_id,
            spans = accepted.span_count,
            replaced = accepted.replaced,
            "Trace delivered"
        );
        Ok(accepted)
    }
}
