//! Wolfram Alpha tool for calculations and analysis

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::time::Duration;

use crate::llm::ToolInputSchema;
use crate::tools::{required_str, Tool, ToolDescriptor, ToolResult};

const DEFAULT_ENDPOINT: &str = "https://api.wolframalpha.com/v2/query";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct QueryResponse {
    queryresult: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    pods: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    title: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    subpods: Vec<SubPod>,
}

#[derive(Debug, Deserialize)]
struct SubPod {
    #[serde(default)]
    plaintext: String,
}

impl Pod {
    fn text(&self) -> &str {
        self.subpods
            .first()
            .map(|s| s.plaintext.as_str())
            .unwrap_or("")
    }

    fn is_result(&self) -> bool {
        self.primary || self.title == "Result"
    }
}

/// Summarize a query result as "Assumption: ... Answer: ..."
fn summarize(result: &QueryResult) -> String {
    if !result.success {
        return "Wolfram Alpha wasn't able to answer it".to_string();
    }

    let Some(assumption) = result.pods.first() else {
        return "Wolfram Alpha wasn't able to answer it".to_string();
    };
    let Some(answer) = result.pods.iter().find(|p| p.is_result()) else {
        return "Wolfram Alpha wasn't able to answer it".to_string();
    };

    if answer.text().is_empty() {
        "No good Wolfram Alpha Result was found".to_string()
    } else {
        format!("Assumption: {} \nAnswer: {}", assumption.text(), answer.text())
    }
}

/// Performs advanced calculations and analysis using Wolfram Alpha
pub struct WolframAlphaTool {
    descriptor: ToolDescriptor,
    client: Client,
    app_id: Option<String>,
    endpoint: String,
}

impl WolframAlphaTool {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self::build(Some(app_id.into()))
    }

    /// Read the app id from `WOLFRAM_ALPHA_APPID`.
    ///
    /// A missing id is not fatal here; each call then reports it to the model.
    pub fn from_env() -> Self {
        let app_id = env::var("WOLFRAM_ALPHA_APPID").ok().filter(|id| !id.is_empty());
        if app_id.is_none() {
            tracing::warn!("[WolframAlpha] WOLFRAM_ALPHA_APPID is not set");
        }
        Self::build(app_id)
    }

    fn build(app_id: Option<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "wolfram_alpha",
                "Performs advanced calculations and analysis using Wolfram Alpha",
                ToolInputSchema::single_string(
                    "query",
                    "the mathematical expression or question to calculate or analyze",
                ),
            ),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            app_id,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point the tool at a different API endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Run a query and summarize the primary result
    pub async fn query(&self, query: &str) -> Result<String> {
        let app_id = self
            .app_id
            .as_deref()
            .context("WOLFRAM_ALPHA_APPID is not set")?;

        let response: QueryResponse = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("input", query),
                ("appid", app_id),
                ("output", "json"),
                ("format", "plaintext"),
            ])
            .send()
            .await
            .context("Failed to reach Wolfram Alpha")?
            .error_for_status()
            .context("Wolfram Alpha returned an error status")?
            .json()
            .await
            .context("Failed to parse Wolfram Alpha response")?;

        Ok(summarize(&response.queryresult))
    }
}

#[async_trait]
impl Tool for WolframAlphaTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, input: &Value) -> Result<ToolResult> {
        let query = required_str(input, "query")?;

        match self.query(query).await {
            Ok(answer) => Ok(ToolResult::success(answer)),
            Err(e) => {
                tracing::warn!("[WolframAlpha] Query failed: {:#}", e);
                Ok(ToolResult::error(format!(
                    "Wolfram Alpha error: {:#}. Try simplifying the question.",
                    e
                )))
            }
        }
    }
}
