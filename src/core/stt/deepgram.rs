//! Deepgram batch STT adapter.
//!
//! Uses the pre-recorded audio endpoint (`POST /v1/listen`) with the nova-2
//! model and smart formatting. The transcript is read from
//! `results.channels[0].alternatives[0].transcript`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{
    HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind, STT_TIMEOUT,
};

use super::{SttProvider, sniff_content_type};

/// Deepgram API base URL.
pub const DEEPGRAM_API_URL: &str = "https://api.deepgram.com/v1";

/// Deepgram speech-to-text provider.
pub struct DeepgramStt {
    api_key: String,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

#[derive(Deserialize)]
struct ListenResponse {
    #[serde(default)]
    results: ListenResults,
}

#[derive(Deserialize, Default)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

impl DeepgramStt {
    pub fn new(api_key: impl Into<String>, priority: u32) -> Self {
        Self::with_base_url(api_key, priority, DEEPGRAM_API_URL)
    }

    /// Construct against a custom endpoint (used by tests with mock servers).
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
            circuit: CircuitBreaker::new("stt_deepgram"),
        }
    }
}

#[async_trait]
impl ManagedProvider for DeepgramStt {
    fn name(&self) -> &str {
        "deepgram"
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
            .get(format!("{}/projects", self.base_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(resp) if resp.status().is_success())
    }
}

#[async_trait]
impl SttProvider for DeepgramStt {
    async fn transcribe(&self, audio: Bytes) -> Result<String, ProviderError> {
        debug!(bytes = audio.len(), "deepgram transcription request");

        let content_type = sniff_content_type(&audio);
        let response = self
            .client
            .post(format!("{}/listen", self.base_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", content_type)
            .query(&[("model", "nova-2"), ("smart_format", "true")])
            .timeout(STT_TIMEOUT)
            .body(audio)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: ListenResponse = response.json().await?;
        let transcript = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();

        debug!(transcript = %transcript, "deepgram transcript");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_response() {
        let json = r#"{
            "results": {
                "channels": [
                    {"alternatives": [{"transcript": " what time is it ", "confidence": 0.98}]}
                ]
            }
        }"#;
        let parsed: ListenResponse = serde_json::from_str(json).unwrap();
        let transcript = parsed.results.channels[0].alternatives[0].transcript.trim();
        assert_eq!(transcript, "what time is it");
    }

    #[test]
    fn test_parse_empty_response() {
        let parsed: ListenResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.channels.is_empty());
    }
}
