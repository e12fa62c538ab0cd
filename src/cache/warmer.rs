//! Cache warmer.
//!
//! Preloads canonical greetings and small-talk responses into the semantic
//! cache at startup so the very first turns can skip the LLM. Warm entries
//! get a long TTL and a `source` tag; warming is idempotent because entries
//! are digest-keyed.

use serde_json::json;
use tracing::info;

use super::SemanticCache;

/// TTL for warm entries (24 hours).
const WARM_TTL: u64 = 86_400;

/// Canonical query/response pairs preloaded at startup.
pub const COMMON_QUERIES: &[(&str, &str)] = &[
    (
        "Hello",
        "Hello! I'm your AI voice assistant. How can I help you today?",
    ),
    (
        "Hi there",
        "Hi! I'm here to assist you. What would you like to know?",
    ),
    (
        "What can you do?",
        "I can answer questions, search the web for current information, help with tasks, and \
         have natural conversations. Just ask me anything!",
    ),
    (
        "Who are you?",
        "I'm an AI voice assistant designed to help you with information, tasks, and \
         conversation. I can search the web for current events and answer a wide range of \
         questions.",
    ),
    (
        "How are you?",
        "I'm doing great, thank you for asking! I'm ready to help you with whatever you need.",
    ),
    (
        "Thank you",
        "You're welcome! Is there anything else I can help you with?",
    ),
    (
        "Goodbye",
        "Goodbye! It was nice talking with you. Have a great day!",
    ),
    (
        "What's your name?",
        "I'm your AI voice assistant. I don't have a specific name, but you can call me whatever \
         you like!",
    ),
];

/// Preload the common queries, returning how many were cached.
///
/// Individual failures are logged by the cache and skipped.
pub async fn warm_cache(cache: &SemanticCache) -> usize {
    let mut cached = 0;
    for (query, response) in COMMON_QUERIES {
        let metadata = json!({ "source": "cache_warmer", "warm": true });
        if cache.set(query, response, Some(WARM_TTL), Some(metadata)).await {
            cached += 1;
        }
    }
    info!(cached, total = COMMON_QUERIES.len(), "cache warmed");
    cached
}
