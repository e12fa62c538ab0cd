//! Tavily web search adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{ManagedProvider, ProviderError, ProviderKind, SEARCH_TIMEOUT};

use super::{SearchProvider, SearchResult};

/// Tavily API base URL.
pub const TAVILY_API_URL: &str = "https://api.tavily.com";

pub struct TavilySearch {
    api_key: String,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, priority: u32) -> Self {
        Self::with_base_url(api_key, priority, TAVILY_API_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        priority: u32,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            priority,
            client: reqwest::Client::new(),
            circuit: CircuitBreaker::new("search_tavily"),
        }
    }
}

#[async_trait]
impl ManagedProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Search
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    async fn health_check(&self) -> bool {
        // Tavily has no free liveness endpoint; report configured state.
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        if self.api_key.is_empty() {
            warn!("tavily api key not set, skipping search");
            return Ok(Vec::new());
        }

        let payload = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": max_results,
            "include_answer": true,
            "include_raw_content": false,
        });

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .timeout(SEARCH_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: TavilyResponse = response.json().await?;
        let results: Vec<SearchResult> = parsed
            .results
            .into_iter()
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                content: r.content,
                score: r.score,
            })
            .collect();

        info!(query = %truncate(query, 50), count = results.len(), "tavily search complete");
        Ok(results)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tavily_response() {
        let json = r#"{
            "results": [
                {"title": "Mars news", "url": "https://space.com/x", "content": "...", "score": 0.97},
                {"title": "More Mars", "url": "https://nytimes.com/y", "content": "...", "score": 0.91}
            ],
            "answer": "ignored"
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].title, "Mars news");
    }

    #[tokio::test]
    async fn test_keyless_search_returns_empty() {
        let search = TavilySearch::new("", 0);
        let results = search.search("anything", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
