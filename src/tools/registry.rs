//! Tool registry for managing available tools
//!
//! The registry is filled once at startup and then shared read-only (behind
//! an `Arc`) by every conversation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use serde_json::Value;

use super::tool::{FnTool, Tool, ToolDescriptor, ToolResult};
use crate::core::{RoundTripError, RoundTripResult};
use crate::llm::ToolDefinition;

/// Registry that maps tool names to tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,

    /// Registration order, so definitions are sent to the model deterministically
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a closure as a tool
    pub fn register<F>(&mut self, descriptor: ToolDescriptor, handler: F) -> RoundTripResult<()>
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        self.register_tool(FnTool::new(descriptor, handler))
    }

    /// Register a tool, rejecting duplicate names
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> RoundTripResult<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!("[ToolRegistry] Duplicate tool: {}", name);
            return Err(RoundTripError::DuplicateTool(name));
        }

        tracing::info!("[ToolRegistry] Registering tool: {}", name);
        self.order.push(name.clone());
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Execute a tool by name.
    ///
    /// Fails only for unknown names. A handler that errors or panics yields an
    /// error `ToolResult` describing the failure, so the model can read it and
    /// recover.
    pub async fn dispatch(&self, name: &str, input: &Value) -> RoundTripResult<ToolResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RoundTripError::UnknownTool(name.to_string()))?;

        tracing::info!("[ToolRegistry] Executing tool: {}", name);
        tracing::debug!("[ToolRegistry] Input: {}", input);

        let outcome = AssertUnwindSafe(tool.execute(input)).catch_unwind().await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                let err = RoundTripError::tool_execution(name, format!("{:#}", e));
                tracing::warn!("[ToolRegistry] {}", err);
                ToolResult::error(err.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                let err = RoundTripError::tool_execution(name, message);
                tracing::error!("[ToolRegistry] {}", err);
                ToolResult::error(err.to_string())
            }
        };

        tracing::debug!(
            "[ToolRegistry] Tool {} completed. Is error: {}",
            name,
            result.is_error
        );

        Ok(result)
    }

    /// Tool definitions for the Messages API, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor().definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolInputSchema;
    use serde_json::json;

    impl ToolRegistry {
        /// Test-only lookup by name
        fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
            self.tools.get(name)
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "test tool", ToolInputSchema::single_string("query", "q"))
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("wolfram_alpha"), |_| Ok("2".to_string()))
            .unwrap();
        let err = registry
            .register(descriptor("wolfram_alpha"), |_| Ok("3".to_string()))
            .unwrap_err();
        assert!(matches!(err, RoundTripError::DuplicateTool(name) if name == "wolfram_alpha"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["web_search", "wolfram_alpha", "alpha"] {
            registry.register(descriptor(name), |_| Ok(String::new())).unwrap();
        }
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["web_search", "wolfram_alpha", "alpha"]);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("calculator", &json!({})).await.unwrap_err();
        assert!(matches!(err, RoundTripError::UnknownTool(name) if name == "calculator"));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("wolfram_alpha"), |_| Ok("2".to_string()))
            .unwrap();
        let result = registry
            .dispatch("wolfram_alpha", &json!({"query": "1+1"}))
            .await
            .unwrap();
        assert_eq!(result, ToolResult::success("2"));
    }

    #[tokio::test]
    async fn test_dispatch_converts_handler_error() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("web_search"), |_| anyhow::bail!("rate limited"))
            .unwrap();
        let result = registry
            .dispatch("web_search", &json!({"query": "x"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("web_search error"));
        assert!(result.output.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_dispatch_converts_panic() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("flaky"), |_| panic!("index out of bounds"))
            .unwrap();
        let result = registry.dispatch("flaky", &json!({})).await.unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("index out of bounds"));
    }
}
