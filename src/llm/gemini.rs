//! Gemini client for search-grounded generation
//!
//! Sends a single prompt with Google Search grounding enabled and returns the
//! answer together with the search entry point HTML that Google requires to
//! be shown next to grounded results.
//!
//! # Authentication
//!
//! Either a Gemini API key (`GEMINI_API_KEY`, generativelanguage endpoint) or
//! Vertex AI (`VERTEX_PROJECT_ID`, bearer token).
//!
//! ```ignore
//! let gemini = GeminiProvider::from_env()?;
//! let grounded = gemini.generate_grounded("Who won the 2024 Miami Grand Prix?").await?;
//! println!("{}", grounded.text);
//! ```

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use super::auth::{AuthConfig, AuthProvider, AuthSource};
use super::sse;
use crate::core::TextSink;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash-001";
const DEFAULT_VERTEX_REGION: &str = "us-central1";
const TEMPERATURE: f32 = 0.0;

// ============================================================================
// Gemini-specific request/response types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    tools: Vec<GeminiTool>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Grounding tool. Gemini 1.x models use search retrieval, newer ones plain search.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum GeminiTool {
    GoogleSearchRetrieval {},
    GoogleSearch {},
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    search_entry_point: Option<SearchEntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntryPoint {
    rendered_content: Option<String>,
}

/// What one response chunk carried
#[derive(Debug, PartialEq)]
enum ChunkKind {
    Text(String),
    Grounding(String),
    Usage,
    Unknown,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn rendered_content(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .and_then(|g| g.search_entry_point.as_ref())
            .and_then(|s| s.rendered_content.clone())
    }

    /// Kinds carried by one chunk; a chunk with both text and grounding yields both, text first
    fn classify(&self) -> Vec<ChunkKind> {
        let mut kinds = Vec::new();
        if let Some(candidate) = self.candidates.first() {
            if candidate.content.is_some() {
                kinds.push(ChunkKind::Text(self.text()));
            }
            if let Some(rendered) = self.rendered_content() {
                kinds.push(ChunkKind::Grounding(rendered));
            }
        } else if self.usage_metadata.is_some() {
            kinds.push(ChunkKind::Usage);
        }
        if kinds.is_empty() {
            kinds.push(ChunkKind::Unknown);
        }
        kinds
    }
}

/// Result of a grounded generation
#[derive(Debug, Clone, Default)]
pub struct GroundedResponse {
    /// The model's answer
    pub text: String,
    /// Search entry point HTML supplied by Google, if grounding happened
    pub rendered_content: Option<String>,
    /// Raw response objects (one per streamed chunk, or one for a plain call)
    pub raw: Vec<Value>,
}

// ============================================================================
// GeminiProvider
// ============================================================================

#[derive(Debug, Clone)]
enum Endpoint {
    Direct,
    Vertex { project_id: String, region: String },
}

/// Google Gemini provider with search grounding
pub struct GeminiProvider {
    client: Client,
    auth: AuthSource,
    endpoint: Endpoint,
    model: String,
}

impl GeminiProvider {
    /// Create a provider from environment variables
    ///
    /// Vertex AI when `VERTEX_PROJECT_ID` is set (`GEMINI_REGION` defaults to
    /// us-central1, token from `VERTEX_ACCESS_TOKEN` or gcloud). Otherwise
    /// `GEMINI_API_KEY` is required and `GEMINI_API_BASE` may override the
    /// endpoint. `GEMINI_MODEL` overrides the model.
    pub fn from_env() -> Result<Self> {
        tracing::info!("Creating Gemini provider from environment");

        let provider = if let Ok(project_id) = env::var("VERTEX_PROJECT_ID") {
            let region =
                env::var("GEMINI_REGION").unwrap_or_else(|_| DEFAULT_VERTEX_REGION.to_string());
            let auth = match env::var("VERTEX_ACCESS_TOKEN") {
                Ok(token) => AuthSource::Static(AuthConfig::new(token)),
                Err(_) => AuthSource::Dynamic(Arc::new(super::auth::gcloud_access_token())),
            };
            Self::build(auth, Endpoint::Vertex { project_id, region })?
        } else {
            let api_key = env::var("GEMINI_API_KEY").context(
                "GEMINI_API_KEY environment variable not set (or set VERTEX_PROJECT_ID for Vertex AI)",
            )?;
            let auth = match env::var("GEMINI_API_BASE") {
                Ok(base) => AuthConfig::with_base_url(api_key, base),
                Err(_) => AuthConfig::new(api_key),
            };
            Self::build(AuthSource::Static(auth), Endpoint::Direct)?
        };

        let provider = match env::var("GEMINI_MODEL") {
            Ok(model) => provider.with_model(model),
            Err(_) => provider,
        };

        tracing::info!("Using model: {}", provider.model);
        Ok(provider)
    }

    /// Create a provider with explicit credentials for the generativelanguage API
    pub fn with_auth(auth: AuthConfig) -> Result<Self> {
        Self::build(AuthSource::Static(auth), Endpoint::Direct)
    }

    /// Create a provider for Gemini on Vertex AI
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
        )
    }

    fn build(auth: AuthSource, endpoint: Endpoint) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            auth,
            endpoint,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Get the current model name
    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, auth: &AuthConfig, operation: &str) -> String {
        match &self.endpoint {
            Endpoint::Direct => {
                let base = auth.base_url.as_deref().unwrap_or(DEFAULT_API_BASE);
                format!("{}/models/{}:{}", base.trim_end_matches('/'), self.model, operation)
            }
            Endpoint::Vertex { project_id, region } => {
                let default_base = format!("https://{}-aiplatform.googleapis.com", region);
                let base = auth.base_url.as_deref().unwrap_or(&default_base);
                format!(
                    "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
                    base.trim_end_matches('/'),
                    project_id,
                    region,
                    self.model,
                    operation
                )
            }
        }
    }

    fn build_request(&self, prompt: &str) -> GeminiRequest {
        let tool = if self.model.starts_with("gemini-1") {
            GeminiTool::GoogleSearchRetrieval {}
        } else {
            GeminiTool::GoogleSearch {}
        };

        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            tools: vec![tool],
            generation_config: GeminiGenerationConfig {
                temperature: TEMPERATURE,
            },
        }
    }

    async fn post(&self, prompt: &str, operation: &str) -> Result<Response> {
        let auth = self
            .auth
            .get_auth()
            .await
            .context("Failed to get authentication credentials")?;
        let mut url = self.url(&auth, operation);
        if operation == "streamGenerateContent" {
            url.push_str("?alt=sse");
        }

        let request = self.build_request(prompt);
        tracing::debug!("[Gemini] POST {}", url);

        let builder: RequestBuilder = match self.endpoint {
            Endpoint::Direct => self.client.post(&url).header("x-goog-api-key", &auth.api_key),
            Endpoint::Vertex { .. } => self.client.post(&url).bearer_auth(&auth.api_key),
        };

        let response = builder
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            tracing::error!("[Gemini] API error: {} - {}", status, error_text);
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        Ok(response)
    }

    /// Generate a grounded answer in one request
    pub async fn generate_grounded(&self, prompt: &str) -> Result<GroundedResponse> {
        tracing::info!("[Gemini] Generating grounded response");

        let response = self.post(prompt, "generateContent").await?;
        let raw: Value = response
            .json()
            .await
            .context("Failed to read Gemini response body")?;
        let parsed: GeminiResponse = serde_json::from_value(raw.clone())
            .context("Failed to parse Gemini API response")?;

        let rendered_content = parsed.rendered_content();
        if rendered_content.is_none() {
            tracing::warn!("[Gemini] Response carried no search entry point");
        }

        Ok(GroundedResponse {
            text: parsed.text(),
            rendered_content,
            raw: vec![raw],
        })
    }

    /// Generate a grounded answer, forwarding text to `sink` as it arrives.
    ///
    /// Every raw chunk is passed to `on_chunk` before it is classified, so
    /// callers can keep a line-per-chunk record of the stream.
    pub async fn generate_grounded_stream<F>(
        &self,
        prompt: &str,
        sink: &mut dyn TextSink,
        mut on_chunk: F,
    ) -> Result<GroundedResponse>
    where
        F: FnMut(&Value) -> Result<()>,
    {
        tracing::info!("[Gemini] Streaming grounded response");

        let response = self.post(prompt, "streamGenerateContent").await?;
        let mut data = sse::data_stream(response);
        let mut grounded = GroundedResponse::default();

        while let Some(payload) = data.next().await {
            let payload = payload?;
            let raw: Value = match serde_json::from_str(&payload) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("[Gemini] Failed to parse streaming chunk: {}", e);
                    continue;
                }
            };
            on_chunk(&raw)?;

            let chunk: GeminiResponse = serde_json::from_value(raw.clone())
                .context("Failed to decode Gemini streaming chunk")?;

            for kind in chunk.classify() {
                match kind {
                    ChunkKind::Text(text) => {
                        if !text.is_empty() {
                            sink.send_text(&text)?;
                            grounded.text.push_str(&text);
                        }
                    }
                    ChunkKind::Grounding(rendered) => {
                        grounded.rendered_content = Some(rendered);
                    }
                    ChunkKind::Usage => {}
                    ChunkKind::Unknown => {
                        tracing::warn!("[Gemini] Unknown chunk: {}", raw);
                    }
                }
            }

            grounded.raw.push(raw);
        }

        tracing::info!("[Gemini] Stream complete after {} chunks", grounded.raw.len());
        Ok(grounded)
    }
}
