//! Controller configuration
//!
//! Configuration options for the `RoundTripController`.

use std::time::Duration;

use chrono::NaiveDate;

use crate::llm::ToolChoice;

const DEFAULT_MAX_ROUNDS: usize = 8;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_STREAMING_MAX_TOKENS: u32 = 4096;
const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(120);

/// System instructions used by the chat demo, stamped with today's date
pub fn default_system_prompt(today: NaiveDate) -> String {
    format!(
        "Answer as many questions as you can using your existing knowledge.\n\
         Only search the web for queries that you can not confidently answer.\n\
         Today's date is {}\n\
         If you think a user's question involves something in the future that hasn't happened yet, use the search tool.\n\
         The Wolfram Alpha tool is available for advanced calculations and analysis. \
         If any math expression or question is detected, the tool should be called.",
        today.format("%B %d %Y")
    )
}

/// Configuration for a RoundTripController
///
/// Use the builder pattern to configure the controller:
///
/// ```ignore
/// let config = AgentConfig::new(default_system_prompt(Local::now().date_naive()))
///     .with_max_rounds(4)
///     .with_round_timeout(Duration::from_secs(30))
///     .with_streaming(true);
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt for the LLM
    pub system_prompt: String,

    /// Default model-call budget per user message
    pub max_rounds: usize,

    /// Token limit per model call
    pub max_tokens: u32,

    pub tool_choice: ToolChoice,

    /// Deadline for a single model call (including the whole stream)
    pub round_timeout: Duration,

    /// Whether to stream responses from the LLM
    pub streaming_enabled: bool,
}

impl AgentConfig {
    /// Create a new configuration with a system prompt
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_tokens: DEFAULT_MAX_TOKENS,
            tool_choice: ToolChoice::Auto,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            streaming_enabled: false,
        }
    }

    /// Set the model-call budget
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    /// Set the per-round deadline
    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }

    /// Enable or disable streaming responses.
    ///
    /// Enabling streaming raises the token limit to the streaming default
    /// unless a larger limit was already set.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = enabled;
        if enabled && self.max_tokens < DEFAULT_STREAMING_MAX_TOKENS {
            self.max_tokens = DEFAULT_STREAMING_MAX_TOKENS;
        }
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("You are a helpful assistant.")
    }
}
