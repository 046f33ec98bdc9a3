//! Round-trip error types

use thiserror::Error;

/// Errors surfaced by the tool registry and the round-trip controller
#[derive(Error, Debug)]
pub enum RoundTripError {
    /// The model (or a caller) asked for a tool that is not registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with the same name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// The model kept requesting tools past the round budget
    #[error("Round budget exceeded after {0} model calls")]
    RoundBudgetExceeded(usize),

    /// The model stopped for a reason that is neither a final answer nor a tool call
    #[error("Unexpected stop reason: {0}")]
    UnexpectedStopReason(String),

    /// A tool handler failed.
    ///
    /// Never returned from `dispatch`; its text is sent back to the model
    /// as an error tool result instead.
    #[error("{tool} error: {message}")]
    ToolExecution { tool: String, message: String },

    /// A tool result referenced a tool-use id the model never emitted
    #[error("Tool result references unknown tool use id: {0}")]
    InvalidToolResult(String),

    /// The model call did not finish within the per-round deadline
    #[error("Model call timed out after {0:?}")]
    RoundTimeout(std::time::Duration),

    /// The output sink went away while streaming
    #[error("Output sink closed")]
    SinkClosed,

    /// The caller cancelled the round
    #[error("Round cancelled")]
    Cancelled,

    /// The model endpoint failed (transport, HTTP status, decoding)
    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),
}

impl RoundTripError {
    /// Create a tool execution error
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        RoundTripError::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for round-trip operations
pub type RoundTripResult<T> = Result<T, RoundTripError>;
