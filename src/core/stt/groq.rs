//! Groq Whisper STT adapter (backup provider).
//!
//! Groq serves Whisper over an OpenAI-compatible transcription endpoint; the
//! audio blob is uploaded as a multipart file part.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{
    HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind, STT_TIMEOUT,
};

use super::{SttProvider, sniff_content_type};

/// Groq OpenAI-compatible API base URL.
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

/// Whisper model served by Groq.
const WHISPER_MODEL: &str = "whisper-large-v3-turbo";

pub struct GroqWhisperStt {
    api_key: String,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl GroqWhisperStt {
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
            priority,
            client: reqwest::Client::new(),
            circuit: CircuitBreaker::new("stt_groq-whisper"),
        }
    }
}

#[async_trait]
impl ManagedProvider for GroqWhisperStt {
    fn name(&self) -> &str {
        "groq-whisper"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Stt
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
impl SttProvider for GroqWhisperStt {
    async fn transcribe(&self, audio: Bytes) -> Result<String, ProviderError> {
        debug!(bytes = audio.len(), "groq whisper transcription request");

        let content_type = sniff_content_type(&audio);
        let file_name = match content_type {
            "audio/wav" => "audio.wav",
            "audio/ogg" => "audio.ogg",
            _ => "audio.webm",
        };

        let part = Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", WHISPER_MODEL)
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(STT_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: TranscriptionResponse = response.json().await?;
        let transcript = parsed.text.trim().to_string();
        debug!(transcript = %transcript, "groq whisper transcript");
        Ok(transcript)
    }
}
