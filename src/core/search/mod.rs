//! Web-search provider family.
//!
//! One adapter (`"tavily"`) plus the formatters that turn raw results into
//! an LLM context block and a voice-friendly citation string.

pub mod tavily;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider::{ManagedProvider, ProviderError};

pub use tavily::TavilySearch;

/// A single web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Web search capability.
#[async_trait]
pub trait SearchProvider: ManagedProvider {
    /// Run a search, returning up to `max_results` results ordered by
    /// relevance. An unavailable or keyless provider returns an empty list.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Format search results as context for the LLM system prompt.
pub fn format_results_for_llm(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut formatted = String::from("Web Search Results:\n\n");
    for (i, result) in results.iter().enumerate() {
        let snippet: String = result.content.chars().take(300).collect();
        formatted.push_str(&format!(
            "[{}] {}\nSource: {}\n{}...\n\n",
            i + 1,
            result.title,
            result.url,
            snippet
        ));
    }
    formatted
}

/// Format source citations for a voice response.
///
/// One source reads "According to X"; several read "Based on sources
/// including X and Y" (limited to the top two).
pub fn format_citations(results: &[SearchResult]) -> String {
    match results {
        [] => String::new(),
        [only] => format!("According to {}", domain_from_url(&only.url)),
        _ => {
            let sources: Vec<String> = results
                .iter()
                .take(2)
                .map(|r| domain_from_url(&r.url))
                .collect();
            format!("Based on sources including {}", sources.join(" and "))
        }
    }
}

/// Extract a speakable domain name ("Nytimes" from
/// "https://www.nytimes.com/..."), falling back to "web sources".
fn domain_from_url(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw) else {
        return "web sources".to_string();
    };
    let Some(host) = parsed.host_str() else {
        return "web sources".to_string();
    };

    let host = host.strip_prefix("www.").unwrap_or(host);
    let parts: Vec<&str> = host.split('.').collect();
    let name = if parts.len() >= 2 {
        parts[parts.len() - 2]
    } else {
        host
    };

    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "web sources".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> SearchResult {
        SearchResult {
            title: "title".to_string(),
            url: url.to_string(),
            content: "content".to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_domain_from_url() {
        assert_eq!(domain_from_url("https://www.nytimes.com/2026/mars"), "Nytimes");
        assert_eq!(domain_from_url("https://space.com/article"), "Space");
        assert_eq!(domain_from_url("https://news.bbc.co.uk/x"), "Co");
        assert_eq!(domain_from_url("not a url"), "web sources");
    }

    #[test]
    fn test_single_citation() {
        let citations = format_citations(&[result("https://www.nytimes.com/a")]);
        assert_eq!(citations, "According to Nytimes");
    }

    #[test]
    fn test_multi_citation_limited_to_two() {
        let citations = format_citations(&[
            result("https://www.nytimes.com/a"),
            result("https://space.com/b"),
            result("https://example.com/c"),
        ]);
        assert_eq!(citations, "Based on sources including Nytimes and Space");
    }

    #[test]
    fn test_empty_citations() {
        assert_eq!(format_citations(&[]), "");
    }

    #[test]
    fn test_format_results_for_llm() {
        let formatted = format_results_for_llm(&[
            result("https://www.nytimes.com/a"),
            result("https://space.com/b"),
        ]);
        assert!(formatted.starts_with("Web Search Results:"));
        assert!(formatted.contains("[1] title"));
        assert!(formatted.contains("[2] title"));
        assert!(formatted.contains("Source: https://www.nytimes.com/a"));
    }

    #[test]
    fn test_format_results_empty() {
        assert_eq!(format_results_for_llm(&[]), "");
    }
}
