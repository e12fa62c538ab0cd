//! Provider abstraction shared by the STT, LLM, TTS and search adapter
//! families.
//!
//! Every remote vendor is wrapped by an adapter implementing one of the
//! family traits ([`crate::core::stt::SttProvider`],
//! [`crate::core::llm::LlmProvider`], [`crate::core::tts::TtsProvider`],
//! [`crate::core::search::SearchProvider`]). All of them share the
//! [`ManagedProvider`] supertrait, which is what the
//! [`manager::ProviderManager`] needs for priority ordering, circuit gating
//! and health monitoring.

pub mod manager;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::core::circuit::CircuitBreaker;

/// Per-call timeout for LLM prose completions.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-call timeout for TTS synthesis.
pub const TTS_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-call timeout for batch STT transcription.
pub const STT_TIMEOUT: Duration = Duration::from_secs(60);
/// Per-call timeout for web search.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-call timeout for provider health checks.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Families of AI service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stt,
    Llm,
    Tts,
    Search,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Stt => write!(f, "stt"),
            ProviderKind::Llm => write!(f, "llm"),
            ProviderKind::Tts => write!(f, "tts"),
            ProviderKind::Search => write!(f, "search"),
        }
    }
}

/// Errors raised by provider adapters and the manager layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider '{0}' not found")]
    NotFound(String),

    #[error("provider '{0}' is unavailable")]
    Unavailable(String),

    #[error("all {kind} providers failed: {summary}")]
    AllProvidersFailed { kind: ProviderKind, summary: String },
}

impl ProviderError {
    /// Build an API error from a non-success response, consuming its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(200).collect();
        ProviderError::Api { status, body }
    }
}

/// Capabilities shared by every provider adapter: identity, priority,
/// circuit ownership and a cheap health probe.
#[async_trait]
pub trait ManagedProvider: Send + Sync {
    /// Stable provider name used in logs, status output and circuit naming.
    fn name(&self) -> &str;

    /// Provider family.
    fn kind(&self) -> ProviderKind;

    /// Lower is preferred; 0 is the primary provider.
    fn priority(&self) -> u32;

    /// Disabled providers are skipped by the manager.
    fn enabled(&self) -> bool {
        true
    }

    /// The circuit guarding this provider's remote endpoint.
    fn circuit(&self) -> &CircuitBreaker;

    /// Cheap, credentials-verifying liveness probe.
    async fn health_check(&self) -> bool;
}
