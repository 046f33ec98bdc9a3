pub mod anthropic;
pub mod auth;
pub mod gemini;
pub mod provider;
mod sse;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use auth::{auth_provider, gcloud_access_token, AuthConfig, AuthProvider};
pub use gemini::{GeminiProvider, GroundedResponse};
pub use provider::{ChatRequest, EventStream, LlmProvider};
pub use types::{
    ContentBlock, ContentBlockStart, ContentDelta, Message, MessageDeltaData, MessageResponse,
    Role, StopReason, StreamEvent, ToolChoice, ToolDefinition, ToolInputSchema, Usage,
};
