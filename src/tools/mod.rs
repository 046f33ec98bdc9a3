//! Tool system
//!
//! This module provides:
//! - `Tool` trait - Interface for implementing tools
//! - `ToolResult` - Result type for tool execution
//! - `ToolRegistry` - Name-keyed registry with failure-tolerant dispatch
//! - `common` - Built-in tools (web search, Wolfram Alpha)

mod registry;
mod tool;

/// Common/built-in tools
pub mod common;

pub use registry::ToolRegistry;
pub use tool::{required_str, FnTool, Tool, ToolDescriptor, ToolResult};

pub use common::{WebSearchTool, WolframAlphaTool};
