//! Cartesia TTS adapter (primary provider).
//!
//! Requests raw PCM from the Sonic model and wraps it into a WAV container
//! so every TTS provider hands the pipeline a self-describing blob.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use crate::core::circuit::CircuitBreaker;
use crate::core::provider::{
    HEALTH_CHECK_TIMEOUT, ManagedProvider, ProviderError, ProviderKind, TTS_TIMEOUT,
};

use super::{TtsProvider, pcm_to_wav};

/// Cartesia API base URL.
pub const CARTESIA_API_URL: &str = "https://api.cartesia.ai";

/// API version header required by Cartesia.
const CARTESIA_VERSION: &str = "2024-06-10";

/// Default Sonic voice.
const DEFAULT_VOICE_ID: &str = "a0e99841-438c-4a64-b679-ae501e7d6091";

/// PCM sample rate requested from the API.
const OUTPUT_SAMPLE_RATE: u32 = 24000;

pub struct CartesiaTts {
    api_key: String,
    base_url: String,
    voice_id: String,
    priority: u32,
    client: reqwest::Client,
    circuit: CircuitBreaker,
}

impl CartesiaTts {
    pub fn new(api_key: impl Into<String>, priority: u32) -> Self {
        Self::with_base_url(api_key, priority, CARTESIA_API_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        priority: u32,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            priority,
            client: reqwest::Client::new(),
            circuit: CircuitBreaker::new("tts_cartesia"),
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }
}

#[async_trait]
impl ManagedProvider for CartesiaTts {
    fn name(&self) -> &str {
        "cartesia"
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
            .get(format!("{}/voices", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(resp) if resp.status().is_success())
    }
}

#[async_trait]
impl TtsProvider for CartesiaTts {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError> {
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }
        debug!(chars = text.len(), "cartesia synthesis request");

        let payload = json!({
            "model_id": "sonic-english",
            "transcript": text,
            "voice": { "mode": "id", "id": self.voice_id },
            "output_format": {
                "container": "raw",
                "encoding": "pcm_s16le",
                "sample_rate": OUTPUT_SAMPLE_RATE,
            },
        });

        let response = self
            .client
            .post(format!("{}/tts/bytes", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .timeout(TTS_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let pcm = response.bytes().await?;
        debug!(pcm_bytes = pcm.len(), "cartesia synthesis complete");
        pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE)
    }
}
