//! OpenAI TTS adapter (backup provider).

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{
    HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind, TTS_TIMEOUT,
};

use super::TtsProvider;

/// OpenAI API base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Standard-quality model; faster than tts-1-hd.
const MODEL: &str = "tts-1";

/// Neutral voice, a good fit for an assistant.
const VOICE: &str = "alloy";

pub struct OpenAiTts {
    api_key: String,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

impl OpenAiTts {
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
            circuit: CircuitBreaker::new("tts_openai"),
        }
    }
}

#[async_trait]
impl ManagedProvider for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Tts
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
impl TtsProvider for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError> {
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }
        debug!(chars = text.len(), "openai synthesis request");

        let payload = json!({
            "model": MODEL,
            "input": text,
            "voice": VOICE,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(TTS_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), "openai synthesis complete");
        Ok(audio)
    }
}
