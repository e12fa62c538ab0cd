//! OpenAI LLM adapter (backup provider).

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind};

use super::chat;
use super::{
    ChatMessage, LlmProvider, SearchDecision, TokenStream, VOICE_SYSTEM_PROMPT,
    matches_search_keywords, parse_search_decision, search_context_system_prompt,
    search_decision_messages, with_system_prompt,
};

/// OpenAI API base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Fast, cost-effective backup model.
const MODEL: &str = "gpt-4o-mini";

pub struct OpenAiLlm {
    api_key: String,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

impl OpenAiLlm {
    pub fn new(api_key: impl Into<String>, priority: u32) -> Self {
        Self::with_base_url(api_key, priority, OPENAI_API_URL)
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
            circuit: CircuitBreaker::new("llm_openai"),
        }
    }
}

#[async_trait]
impl ManagedProvider for OpenAiLlm {
    fn name(&self) -> &str {
        "openai"
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
impl LlmProvider for OpenAiLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let messages = with_system_prompt(messages, VOICE_SYSTEM_PROMPT);
        chat::complete(
            &self.client,
            &self.base_url,
            &self.api_key,
            MODEL,
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
        chat::stream_complete(&self.client, &self.base_url, &self.api_key, MODEL, &messages).await
    }

    async fn stream_complete_with_context(
        &self,
        messages: &[ChatMessage],
        search_context: &str,
        citation: &str,
    ) -> Result<TokenStream, ProviderError> {
        let system = search_context_system_prompt(search_context, citation);
        let messages = with_system_prompt(messages, &system);
        chat::stream_complete(&self.client, &self.base_url, &self.api_key, MODEL, &messages).await
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
            MODEL,
            &messages,
            true,
        )
        .await
        {
            Ok(content) => Ok(parse_search_decision(&content, user_message)),
            Err(e) => {
                warn!("search detection failed, falling back to keyword match: {e}");
                Ok(SearchDecision {
                    needs_search: true,
                    query: Some(user_message.to_string()),
                })
            }
        }
    }
}
