//! Web search tool backed by DuckDuckGo's HTML endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use crate::llm::ToolInputSchema;
use crate::tools::{required_str, Tool, ToolDescriptor, ToolResult};

const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const DEFAULT_MAX_RESULTS: usize = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl SearchHit {
    fn render(&self) -> String {
        format!(
            "snippet: {}, title: {}, link: {}",
            self.snippet, self.title, self.link
        )
    }
}

/// Performs a web search with DuckDuckGo
pub struct WebSearchTool {
    descriptor: ToolDescriptor,
    client: Client,
    endpoint: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "web_search",
                "Performs a web search with the specified query using DuckDuckGo",
                ToolInputSchema::single_string("query", "the query to look up"),
            ),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Point the tool at a different search endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Limit the number of hits returned to the model
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Run a search and return the parsed hits
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .header("User-Agent", "Mozilla/5.0 (compatible; chat-roundtrip)")
            .send()
            .await
            .context("Failed to reach DuckDuckGo")?
            .error_for_status()
            .context("DuckDuckGo returned an error status")?;

        let html = response
            .text()
            .await
            .context("Failed to read DuckDuckGo response")?;

        let mut hits = parse_results(&html);
        hits.truncate(self.max_results);
        tracing::debug!("[WebSearch] {} hits for '{}'", hits.len(), query);
        Ok(hits)
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

fn selector(cell: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("valid selector"))
}

fn result_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    selector(&SELECTOR, "div.result")
}

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    selector(&SELECTOR, "a.result__a")
}

fn snippet_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    selector(&SELECTOR, ".result__snippet")
}

/// Decoded text of an element with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// DuckDuckGo wraps result links in a redirect carrying the target in `uddg`
fn resolve_link(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };

    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| href.to_string())
}

/// Extract hits from a DuckDuckGo HTML results page.
///
/// Each result block yields at most one hit; its snippet is empty when the
/// block has none.
pub fn parse_results(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);

    document
        .select(result_selector())
        .filter_map(|result| {
            let title = result.select(title_selector()).next()?;
            let snippet = result
                .select(snippet_selector())
                .next()
                .map(element_text)
                .unwrap_or_default();

            Some(SearchHit {
                title: element_text(title),
                link: resolve_link(title.value().attr("href").unwrap_or_default()),
                snippet,
            })
        })
        .collect()
}

#[async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &Value) -> Result<ToolResult> {
        let query = required_str(input, "query")?;

        let hits = self.search(query).await?;
        if hits.is_empty() {
            return Ok(ToolResult::success("No good DuckDuckGo Search Result was found"));
        }

        let rendered = hits
            .iter()
            .map(SearchHit::render)
            .collect::<Vec<_>>()
            .join(", ");
        Ok(ToolResult::success(rendered))
    }
}
