use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::{RoundTripError, RoundTripResult};
use crate::llm::{ContentBlock, Message, Role};

/// Ordered, append-only message history for one user session
///
/// Messages are never edited or reordered once pushed. The whole history is
/// sent to the model on every round.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    id: String,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,

    /// Tool-use ids the model has emitted so far
    #[serde(skip)]
    tool_use_ids: HashSet<String>,
}

impl Conversation {
    /// Create a new empty conversation
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        tracing::info!("Creating new conversation with ID: {}", id);

        Self {
            id,
            created_at: Utc::now(),
            messages: Vec::new(),
            tool_use_ids: HashSet::new(),
        }
    }

    /// Create a conversation seeded with one user message
    pub fn with_user_message(text: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.messages.push(Message::user(text));
        conversation
    }

    /// Get conversation ID
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Append a message.
    ///
    /// Tool results must answer a tool use the model emitted earlier in this
    /// conversation, and only the assistant may emit tool uses.
    pub fn push(&mut self, message: Message) -> RoundTripResult<()> {
        for block in &message.content {
            match block {
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    if message.role != Role::User || !self.tool_use_ids.contains(tool_use_id) {
                        tracing::warn!(
                            "Rejecting tool result for unknown id {} in conversation {}",
                            tool_use_id,
                            self.id
                        );
                        return Err(RoundTripError::InvalidToolResult(tool_use_id.clone()));
                    }
                }
                ContentBlock::ToolUse { id, .. } if message.role == Role::User => {
                    return Err(RoundTripError::InvalidToolResult(id.clone()));
                }
                _ => {}
            }
        }

        for block in &message.content {
            if let ContentBlock::ToolUse { id, .. } = block {
                self.tool_use_ids.insert(id.clone());
            }
        }

        tracing::debug!(
            "Adding {} message to conversation {}",
            message.role,
            self.id
        );
        self.messages.push(message);
        Ok(())
    }

    /// Add a user text message
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// All messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
