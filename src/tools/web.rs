//! Web search and fetch tools.

use crate::llm::ToolDefinition;
use crate::tools::Tool;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const FETCH_MAX_CHARS: usize = 15_000;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct WebToolError(String);

/// Search the web via the Brave Search API.
#[derive(Clone)]
pub struct WebSearchTool {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

impl Tool for WebSearchTool {
    const NAME: &'static str = "web_search";

    type Error = WebToolError;
    type Args = WebSearchArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search the web for information. Returns a summary of search results."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "max_results": {"type": "integer", "description": "Number of results, default 5"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let Some(api_key) = &self.api_key else {
            return Err(WebToolError(
                "Web search is not configured (missing Brave API key).".to_string(),
            ));
        };

        let response = self
            .http
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[
                ("q", args.query.clone()),
                ("count", args.max_results.to_string()),
            ])
            .header("X-Subscription-Token", api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|error| WebToolError(format!("Search request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(WebToolError(format!(
                "Search failed with HTTP {}",
                response.status().as_u16()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| WebToolError(format!("Search response unreadable: {error}")))?;
        Ok(format_brave_results(&payload, args.max_results))
    }
}

fn format_brave_results(payload: &Value, max_results: usize) -> String {
    let results: Vec<String> = payload
        .pointer("/web/results")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .take(max_results)
                .filter_map(|item| {
                    let title = item.get("title")?.as_str()?;
                    let url = item.get("url")?.as_str()?;
                    let description = item
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    Some(format!("**{title}**\n{url}\n{description}"))
                })
                .collect()
        })
        .unwrap_or_default();

    if results.is_empty() {
        "No results found.".to_string()
    } else {
        results.join("\n\n---\n\n")
    }
}

/// Fetch a URL and return its textual content, capped.
#[derive(Clone)]
pub struct WebFetchTool {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebFetchTool {
    pub fn new(fetch_timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(fetch_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebFetchArgs {
    pub url: String,
}

impl Tool for WebFetchTool {
    const NAME: &'static str = "web_fetch";

    type Error = WebToolError;
    type Args = WebFetchArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Fetch a URL and return its content as text.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let response = self
            .http
            .get(&args.url)
            .header("User-Agent", "Ciana/0.1")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| WebToolError(format!("Error fetching {}: {error}", args.url)))?;

        if !response.status().is_success() {
            return Err(WebToolError(format!(
                "Error fetching {}: HTTP {}",
                args.url,
                response.status().as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|error| WebToolError(format!("Error reading {}: {error}", args.url)))?;
        Ok(cap_content(&body))
    }
}

fn cap_content(body: &str) -> String {
    if body.chars().count() <= FETCH_MAX_CHARS {
        return body.to_string();
    }
    let cap = body
        .char_indices()
        .nth(FETCH_MAX_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(body.len());
    format!("{}\n\n... (truncated)", &body[..cap])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[tokio::test]
    async fn search_without_key_is_an_error_string() {
        let mut registry = ToolRegistry::new();
        registry.register(WebSearchTool::new(None));

        let outcome = registry
            .call("web_search", json!({"query": "rust"}))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("not configured"));
    }

    #[test]
    fn formats_brave_results() {
        let payload = json!({
            "web": {"results": [
                {"title": "Rust", "url": "https://rust-lang.org", "description": "A language"},
                {"title": "Crates", "url": "https://crates.io", "description": ""}
            ]}
        });
        let formatted = format_brave_results(&payload, 5);
        assert!(formatted.contains("**Rust**"));
        assert!(formatted.contains("https://crates.io"));
        assert!(formatted.contains("---"));

        assert_eq!(format_brave_results(&json!({}), 5), "No results found.");
    }

    #[test]
    fn brave_results_respect_the_cap() {
        let payload = json!({
            "web": {"results": [
                {"title": "a", "url": "u1"},
                {"title": "b", "url": "u2"},
                {"title": "c", "url": "u3"}
            ]}
        });
        let formatted = format_brave_results(&payload, 2);
        assert!(formatted.contains("**a**"));
        assert!(formatted.contains("**b**"));
        assert!(!formatted.contains("**c**"));
    }

    #[test]
    fn long_fetches_are_truncated() {
        let body = "x".repeat(FETCH_MAX_CHARS + 10);
        let capped = cap_content(&body);
        assert!(capped.ends_with("... (truncated)"));
        assert!(capped.len() < body.len() + 20);
    }
}
