//! Anthropic Messages API client
//!
//! Talks to either the direct Anthropic API or Claude on Vertex AI. Both
//! speak the same Messages wire format; Vertex moves the model into the URL,
//! authenticates with a Google access token and expects an
//! `anthropic_version` field in the body.
//!
//! ```ignore
//! // Direct API
//! let llm = AnthropicProvider::new("sk-ant-...")?.with_model("claude-3-5-sonnet-20240620");
//!
//! // Vertex AI
//! let llm = AnthropicProvider::vertex("my-project", "us-east5", gcloud_access_token())?;
//! ```

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use super::auth::{AuthConfig, AuthProvider, AuthSource};
use super::provider::{ChatRequest, EventStream, LlmProvider};
use super::sse;
use super::types::{ApiError, MessageRequest, MessageResponse, RawStreamEvent, StreamEvent};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const DEFAULT_VERTEX_MODEL: &str = "claude-3-5-sonnet@20240620";
const DEFAULT_VERTEX_REGION: &str = "us-east5";

#[derive(Debug, Clone)]
enum Endpoint {
    Direct,
    Vertex { project_id: String, region: String },
}

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: Client,
    auth: AuthSource,
    endpoint: Endpoint,
    model: String,
}

impl AnthropicProvider {
    /// Create a provider from environment variables
    ///
    /// Vertex AI is used when `VERTEX_PROJECT_ID` is set:
    /// - `VERTEX_REGION` (optional, defaults to us-east5)
    /// - `VERTEX_ACCESS_TOKEN` (optional, otherwise `gcloud auth print-access-token` per request)
    ///
    /// Otherwise the direct API:
    /// - `ANTHROPIC_API_KEY` (required)
    /// - `ANTHROPIC_BASE_URL` (optional)
    ///
    /// `ANTHROPIC_MODEL` overrides the model in both cases.
    pub fn from_env() -> Result<Self> {
        tracing::info!("Creating Anthropic provider from environment");

        let provider = if let Ok(project_id) = env::var("VERTEX_PROJECT_ID") {
            let region =
                env::var("VERTEX_REGION").unwrap_or_else(|_| DEFAULT_VERTEX_REGION.to_string());
            let auth = match env::var("VERTEX_ACCESS_TOKEN") {
                Ok(token) => AuthSource::Static(AuthConfig::new(token)),
                Err(_) => AuthSource::Dynamic(Arc::new(super::auth::gcloud_access_token())),
            };
            Self::build(
                auth,
                Endpoint::Vertex { project_id, region },
                DEFAULT_VERTEX_MODEL,
            )?
        } else {
            let api_key = env::var("ANTHROPIC_API_KEY").context(
                "ANTHROPIC_API_KEY environment variable not set (or set VERTEX_PROJECT_ID for Vertex AI)",
            )?;
            let auth = match env::var("ANTHROPIC_BASE_URL") {
                Ok(base) => AuthConfig::with_base_url(api_key, base),
                Err(_) => AuthConfig::new(api_key),
            };
            Self::build(AuthSource::Static(auth), Endpoint::Direct, DEFAULT_MODEL)?
        };

        let provider = match env::var("ANTHROPIC_MODEL") {
            Ok(model) => provider.with_model(model),
            Err(_) => provider,
        };

        tracing::info!(
            "Using {} model: {}",
            provider.provider_name(),
            provider.model
        );

        Ok(provider)
    }

    /// Create a provider for the direct API with a static key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            AuthSource::Static(AuthConfig::new(api_key)),
            Endpoint::Direct,
            DEFAULT_MODEL,
        )
    }

    /// Create a provider for the direct API with explicit credentials
    pub fn with_auth(auth: AuthConfig) -> Result<Self> {
        Self::build(AuthSource::Static(auth), Endpoint::Direct, DEFAULT_MODEL)
    }

    /// Create a provider for Claude on Vertex AI
    pub fn vertex(
        project_id: impl Into<String>,
        region: impl Into<String>,
        auth: impl AuthProvider + 'static,
    ) -> Result<Self> {
        Self::build(
            AuthSource::Dynamic(Arc::new(auth)),
            Endpoint::Vertex {
                project_id: project_id.into(),
                region: region.into(),
            },
            DEFAULT_VERTEX_MODEL,
        )
    }

    fn build(auth: AuthSource, endpoint: Endpoint, model: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            auth,
            endpoint,
            model: model.to_string(),
        })
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn url(&self, auth: &AuthConfig, streaming: bool) -> String {
        match &self.endpoint {
            Endpoint::Direct => {
                let base = auth.base_url.as_deref().unwrap_or(DEFAULT_API_BASE);
                format!("{}/v1/messages", base.trim_end_matches('/'))
            }
            Endpoint::Vertex { project_id, region } => {
                let default_base = format!("https://{}-aiplatform.googleapis.com", region);
                let base = auth.base_url.as_deref().unwrap_or(&default_base);
                let operation = if streaming { "streamRawPredict" } else { "rawPredict" };
                format!(
                    "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:{}",
                    base.trim_end_matches('/'),
                    project_id,
                    region,
                    self.model,
                    operation
                )
            }
        }
    }

    fn body(&self, request: ChatRequest, streaming: bool) -> MessageRequest {
        let (model, anthropic_version) = match self.endpoint {
            Endpoint::Direct => (Some(self.model.clone()), None),
            Endpoint::Vertex { .. } => (None, Some(VERTEX_ANTHROPIC_VERSION.to_string())),
        };

        // tool_choice is rejected by the API unless tools are present
        let (tools, tool_choice) = if request.tools.is_empty() {
            (None, None)
        } else {
            (Some(request.tools), request.tool_choice)
        };

        MessageRequest {
            model,
            anthropic_version,
            max_tokens: request.max_tokens,
            messages: request.messages,
            system: request.system,
            tools,
            tool_choice,
            stream: if streaming { Some(true) } else { None },
        }
    }

    async fn post(&self, request: ChatRequest, streaming: bool) -> Result<Response> {
        let auth = self
            .auth
            .get_auth()
            .await
            .context("Failed to get authentication credentials")?;
        let url = self.url(&auth, streaming);
        let body = self.body(request, streaming);

        tracing::debug!(
            "[Anthropic] POST {} ({} messages, {} tools)",
            url,
            body.messages.len(),
            body.tools.as_ref().map(|t| t.len()).unwrap_or(0)
        );

        let builder: RequestBuilder = match self.endpoint {
            Endpoint::Direct => self
                .client
                .post(&url)
                .header("x-api-key", &auth.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            Endpoint::Vertex { .. } => self.client.post(&url).bearer_auth(&auth.api_key),
        };

        let response = builder
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
                .unwrap_or(error_text);
            tracing::error!("[Anthropic] API error: {} - {}", status, message);
            anyhow::bail!("Anthropic API error ({}): {}", status, message);
        }

        Ok(response)
    }
}

/// Turn an SSE response body into parsed stream events
fn sse_event_stream(response: Response) -> EventStream {
    let mut data = sse::data_stream(response);

    let stream = async_stream::try_stream! {
        while let Some(payload) = data.next().await {
            let payload = payload?;

            let raw: RawStreamEvent = match serde_json::from_str(&payload) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("[Anthropic] Failed to parse stream event: {}", e);
                    continue;
                }
            };

            let event = StreamEvent::from(raw);
            let done = matches!(event, StreamEvent::MessageStop);
            yield event;

            if done {
                break;
            }
        }
    };

    Box::pin(stream)
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn send_with_tools_and_system(&self, request: ChatRequest) -> Result<MessageResponse> {
        tracing::info!("[Anthropic] Sending message with tools");

        let response = self.post(request, false).await?;
        let text = response
            .text()
            .await
            .context("Failed to read Anthropic response body")?;
        tracing::debug!("[Anthropic] Response body: {}", text);

        serde_json::from_str(&text).context("Failed to parse Anthropic API response")
    }

    async fn stream_with_tools_and_system(&self, request: ChatRequest) -> Result<EventStream> {
        tracing::info!("[Anthropic] Streaming message with tools");

        let response = self.post(request, true).await?;
        Ok(sse_event_stream(response))
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn provider_name(&self) -> &str {
        match self.endpoint {
            Endpoint::Direct => "anthropic",
            Endpoint::Vertex { .. } => "vertex",
        }
    }
}
