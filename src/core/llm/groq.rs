//! Groq LLM adapter (primary provider).
//!
//! Runs llama-3.1-8b-instant by default: the smaller model keeps first-token
//! latency low enough for voice turns.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind};

use super::chat;
use super::{
    ChatMessage, LlmProvider, SearchDecision, TokenStream, VOICE_SYSTEM_PROMPT,
    matches_search_keywords, parse_search_decision, search_context_system_prompt,
    search_decision_messages, with_system_prompt,
};

/// Groq OpenAI-compatible API base URL.
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

/// Low-latency default model.
const FAST_MODEL: &str = "llama-3.1-8b-instant";
/// Larger model used when fast mode is disabled.
const VERSATILE_MODEL: &str = "llama-3.3-70b-versatile";

pub struct GroqLlm {
    api_key: String,
    base_url: String,
    model: &'static str,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

impl GroqLlm {
    pub fn new(api_key: impl Into<String>, priority: u32) -> Self {
        Self::with_base_url(api_key, priority, GROQ_API_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        priority: u32,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: FAST_MODEL,
            priority,
            client: reqwest::Client::new(),
            circuit: CircuitBreaker::new("llm_groq"),
        }
    }

    /// Switch to the larger model at the cost of latency.
    pub fn versatile(mut self) -> Self {
        self.model = VERSATILE_MODEL;
        self
    }
}

#[async_trait]
impl ManagedProvider for GroqLlm {
    fn name(&self) -> &str {
        "groq"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Llm
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(resp) if resp.status().is_success())
    }
}

#[async_trait]
impl LlmProvider for GroqLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let messages = with_system_prompt(messages, VOICE_SYSTEM_PROMPT);
        chat::complete(
            &self.client,
            &self.base_url,
            &self.api_key,
            self.model,
            &messages,
            false,
        )
        .await
    }

    async fn stream_complete(
        &self,
        messages: &[ChatMessage],
    ) -> Result<TokenStream, ProviderError> {
        let messages = with_system_prompt(messages, VOICE_SYSTEM_PROMPT);
        chat::stream_complete(
            &self.client,
            &self.base_url,
            &self.api_key,
            self.model,
            &messages,
        )
        .await
    }

    async fn stream_complete_with_context(
        &self,
        messages: &[ChatMessage],
        search_context: &str,
        citation: &str,
    ) -> Result<TokenStream, ProviderError> {
        let system = search_context_system_prompt(search_context, citation);
        let messages = with_system_prompt(messages, &system);
        chat::stream_complete(
            &self.client,
            &self.base_url,
            &self.api_key,
            self.model,
            &messages,
        )
        .await
    }

    async fn detect_search_needed(
        &self,
        user_message: &str,
    ) -> Result<SearchDecision, ProviderError> {
        if !matches_search_keywords(user_message) {
            debug!("no search keywords, answering from knowledge");
            return Ok(SearchDecision::no());
        }

        let messages = search_decision_messages(user_message);
        match chat::complete(
            &self.client,
            &self.base_url,
            &self.api_key,
            self.model,
            &messages,
            true,
        )
        .await
        {
            Ok(content) => {
                let decision = parse_search_decision(&content, user_message);
                if decision.needs_search {
                    info!(query = decision.query.as_deref().unwrap_or(""), "search needed");
                }
                Ok(decision)
            }
            Err(e) => {
                // The keyword pre-filter already matched; fall back to
                // searching with the raw message rather than dropping search.
                warn!("search detection failed, falling back to keyword match: {e}");
                Ok(SearchDecision {
                    needs_search: true,
                    query: Some(user_message.to_string()),
                })
            }
        }
    }
}
