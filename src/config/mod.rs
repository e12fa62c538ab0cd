//! Configuration module for the Vox Gateway server.
//!
//! Configuration is loaded from environment variables (with `.env` support via
//! `dotenvy` in `main`). Every option has a sensible default so the server
//! starts without any configuration; provider API keys decide which adapters
//! are registered at startup.
//!
//! # Example
//! ```rust,no_run
//! use vox_gateway::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;

/// Default JWT secret used when `JWT_SECRET_KEY` is not set.
/// Only suitable for development; a warning is logged when it is in use.
pub const DEFAULT_JWT_SECRET: &str = "vox-gateway-secret-key-change-in-production";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Server configuration.
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, CORS)
/// - Provider API keys (Deepgram, Groq, Cartesia, OpenAI, Tavily)
/// - Session/cache store binding (`REDIS_URL`)
/// - Auth signing secret
/// - Pipeline tunables (cache TTL, similarity threshold, session timeout,
///   concurrency cap, audio sample rate)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Provider API keys
    /// Deepgram API key for batch STT (primary STT provider)
    pub deepgram_api_key: Option<String>,
    /// Groq API key for LLM completions and Whisper STT fallback
    pub groq_api_key: Option<String>,
    /// Cartesia API key for TTS (primary TTS provider)
    pub cartesia_api_key: Option<String>,
    /// OpenAI API key for backup LLM and TTS
    pub openai_api_key: Option<String>,
    /// Tavily API key for web search
    pub tavily_api_key: Option<String>,

    // State store
    /// Redis connection URL; connection failure activates the in-memory fallback
    pub redis_url: String,

    // Authentication
    /// HMAC secret for signing bearer tokens; rotation invalidates issued tokens
    pub jwt_secret_key: String,

    // Cache
    pub cache_ttl_default: u64,
    pub cache_similarity_threshold: f32,

    // Sessions
    pub session_timeout_seconds: u64,
    pub max_concurrent_sessions: usize,

    // Audio
    pub sample_rate: u32,
    pub chunk_duration_ms: u64,

    // Security / operations
    /// Comma-separated list of allowed CORS origins, or `*`
    pub cors_origins: Option<String>,
    pub log_level: String,
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            deepgram_api_key: None,
            groq_api_key: None,
            cartesia_api_key: None,
            openai_api_key: None,
            tavily_api_key: None,
            redis_url: "redis://localhost:6379".to_string(),
            jwt_secret_key: DEFAULT_JWT_SECRET.to_string(),
            cache_ttl_default: 3600,
            cache_similarity_threshold: 0.85,
            session_timeout_seconds: 1800,
            max_concurrent_sessions: 100,
            sample_rate: 16000,
            chunk_duration_ms: 100,
            cors_origins: None,
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            host: env_or("HOST", defaults.host),
            port: parse_env("PORT", defaults.port)?,
            deepgram_api_key: env_opt("DEEPGRAM_API_KEY"),
            groq_api_key: env_opt("GROQ_API_KEY"),
            cartesia_api_key: env_opt("CARTESIA_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            tavily_api_key: env_opt("TAVILY_API_KEY"),
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            jwt_secret_key: env_or("JWT_SECRET_KEY", defaults.jwt_secret_key),
            cache_ttl_default: parse_env("CACHE_TTL_DEFAULT", defaults.cache_ttl_default)?,
            cache_similarity_threshold: parse_env(
                "CACHE_SIMILARITY_THRESHOLD",
                defaults.cache_similarity_threshold,
            )?,
            session_timeout_seconds: parse_env(
                "SESSION_TIMEOUT_SECONDS",
                defaults.session_timeout_seconds,
            )?,
            max_concurrent_sessions: parse_env(
                "MAX_CONCURRENT_SESSIONS",
                defaults.max_concurrent_sessions,
            )?,
            sample_rate: parse_env("SAMPLE_RATE", defaults.sample_rate)?,
            chunk_duration_ms: parse_env("CHUNK_DURATION_MS", defaults.chunk_duration_ms)?,
            cors_origins: env_opt("CORS_ORIGINS"),
            log_level: env_or("LOG_LEVEL", defaults.log_level),
            environment: env_or("ENVIRONMENT", defaults.environment),
        })
    }

    /// Socket address string for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log warnings for configuration gaps that degrade the pipeline.
    pub fn log_validation_warnings(&self) {
        if self.deepgram_api_key.is_none() && self.groq_api_key.is_none() {
            tracing::warn!("no STT provider configured (DEEPGRAM_API_KEY / GROQ_API_KEY)");
        }
        if self.groq_api_key.is_none() && self.openai_api_key.is_none() {
            tracing::warn!("no LLM provider configured (GROQ_API_KEY / OPENAI_API_KEY)");
        }
        if self.cartesia_api_key.is_none() && self.openai_api_key.is_none() {
            tracing::warn!("no TTS provider configured (CARTESIA_API_KEY / OPENAI_API_KEY)");
        }
        if self.jwt_secret_key == DEFAULT_JWT_SECRET {
            tracing::warn!("JWT_SECRET_KEY not set, using development default");
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: String) -> String {
    env_opt(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cache_ttl_default, 3600);
        assert_eq!(config.session_timeout_seconds, 1800);
        assert_eq!(config.max_concurrent_sessions, 100);
        assert_eq!(config.sample_rate, 16000);
        assert!((config.cache_similarity_threshold - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn test_address_format() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
    }
}
