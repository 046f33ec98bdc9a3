//! Tool trait definition
//!
//! All tools implement this trait to provide a consistent interface.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ToolDefinition, ToolInputSchema};

/// Result of executing a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The output of the tool
    pub output: String,
    /// Whether the tool execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
        }
    }
}

/// Name, description and input schema of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: ToolInputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Get the tool definition for the Messages API
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Trait for tools the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Describe this tool to the model
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with the given input
    ///
    /// The input is a JSON value that should match the tool's input schema.
    async fn execute(&self, input: &Value) -> Result<ToolResult>;

    /// Get the name of this tool
    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// A tool backed by a synchronous closure
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(&Value) -> Result<String> + Send + Sync,
{
    pub fn new(descriptor: ToolDescriptor, handler: F) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&Value) -> Result<String> + Send + Sync,
{
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &Value) -> Result<ToolResult> {
        (self.handler)(input).map(ToolResult::success)
    }
}

/// Read a required string parameter from tool input
pub fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .with_context(|| format!("Missing required string parameter '{}'", key))
}
