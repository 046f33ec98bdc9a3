//! Built-in tools
//!
//! - `WebSearchTool` - DuckDuckGo web search
//! - `WolframAlphaTool` - Calculations and analysis via Wolfram Alpha

pub mod web_search;
pub mod wolfram_alpha;

pub use web_search::WebSearchTool;
pub use wolfram_alpha::WolframAlphaTool;
