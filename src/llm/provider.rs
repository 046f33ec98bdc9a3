//! LLM Provider trait
//!
//! Abstracts the model endpoint so the round-trip controller can run against
//! the direct Anthropic API, Vertex AI, or a scripted test double.

use anyhow::Result;
use futures::stream::Stream;
use std::pin::Pin;

use super::types::{Message, MessageResponse, StreamEvent, ToolChoice, ToolDefinition};

/// Boxed stream of parsed server-sent events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Everything sent to the model for one round
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System instructions
    pub system: Option<String>,
    /// The conversation so far
    pub messages: Vec<Message>,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
    /// Tool selection mode
    pub tool_choice: Option<ToolChoice>,
    /// Generation limit
    pub max_tokens: u32,
}

/// A hosted chat-completion endpoint with tool use
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the complete response
    async fn send_with_tools_and_system(&self, request: ChatRequest) -> Result<MessageResponse>;

    /// Send a request and receive the response incrementally.
    ///
    /// Dropping the returned stream releases the underlying connection.
    async fn stream_with_tools_and_system(&self, request: ChatRequest) -> Result<EventStream>;

    /// Get the current model name
    fn model(&self) -> String;

    /// Get the provider name (e.g. "anthropic", "vertex")
    fn provider_name(&self) -> &str;
}
