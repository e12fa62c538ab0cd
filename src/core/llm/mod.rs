//! Large-language-model provider family.
//!
//! Adapters speak the OpenAI-compatible chat-completions protocol, streamed
//! over SSE:
//!
//! - `"groq"` - Groq llama-3.1-8b-instant (primary, lowest latency)
//! - `"openai"` - OpenAI gpt-4o-mini (backup)
//!
//! Beyond plain completion the family carries the voice-pipeline extras: a
//! streaming variant that injects web-search context into the system prompt,
//! and the two-step search-need detection (keyword pre-filter gating a small
//! strict-format LLM call).

pub mod chat;
pub mod groq;
pub mod openai;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use super::provider::{ManagedProvider, ProviderError};

pub use groq::GroqLlm;
pub use openai::OpenAiLlm;

/// System prompt enforcing concise voice-style answers.
pub const VOICE_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Keep responses concise \
     and natural for voice conversation. Respond in 1-3 sentences unless more detail is requested.";

/// System prompt for the search-need decision call.
const SEARCH_DECISION_PROMPT: &str = "You decide if a web search is needed and generate the search query.

Respond in this EXACT format:
SEARCH: YES or NO
QUERY: <search query if YES, otherwise empty>

Use YES when the user asks about:
- Current events, news, recent happenings
- Specific facts that require up-to-date information
- Local events, weather, prices, scores
- Anything dated (this year, today, recently)

Use NO when:
- General knowledge questions
- Opinions or creative content
- Simple math or logic
- Casual conversation";

/// Keywords that gate the search-decision LLM call.
const SEARCH_KEYWORDS: &[&str] = &[
    "latest",
    "news",
    "current",
    "today",
    "recent",
    "now",
    "happening",
    "update",
    "2024",
    "2025",
    "2026",
    "what's going on",
    "weather",
    "stock",
    "price",
    "who won",
    "score",
    "event",
    "announcement",
];

/// A chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Lazily produced LLM tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Outcome of the search-need detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDecision {
    pub needs_search: bool,
    pub query: Option<String>,
}

impl SearchDecision {
    pub fn no() -> Self {
        Self {
            needs_search: false,
            query: None,
        }
    }
}

/// Chat-completion capability set of an LLM vendor.
#[async_trait]
pub trait LlmProvider: ManagedProvider {
    /// Non-streaming completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;

    /// Streaming completion yielding tokens as they are generated.
    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<TokenStream, ProviderError>;

    /// Streaming completion with web-search context injected into the
    /// system prompt, including a natural-language citation instruction.
    async fn stream_complete_with_context(
        &self,
        messages: &[ChatMessage],
        search_context: &str,
        citation: &str,
    ) -> Result<TokenStream, ProviderError>;

    /// Decide whether a user message needs a web search, and with what query.
    async fn detect_search_needed(
        &self,
        user_message: &str,
    ) -> Result<SearchDecision, ProviderError>;
}

/// Fast keyword pre-filter for the search decision.
pub fn matches_search_keywords(message: &str) -> bool {
    let lower = message.to_lowercase();
    SEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Parse the strict `SEARCH: YES|NO / QUERY: ...` decision format.
///
/// Parsing is forgiving: lines are matched case-insensitively, a missing
/// QUERY falls back to the original message, and anything unparseable reads
/// as "no search".
pub fn parse_search_decision(content: &str, user_message: &str) -> SearchDecision {
    let mut needs_search = false;
    let mut query = user_message.to_string();

    for line in content.lines() {
        let upper = line.to_uppercase();
        if upper.trim_start().starts_with("SEARCH:") {
            needs_search = upper.contains("YES");
        } else if upper.trim_start().starts_with("QUERY:") {
            if let Some((_, q)) = line.split_once(':') {
                let q = q.trim();
                if !q.is_empty() {
                    query = q.to_string();
                }
            }
        }
    }

    SearchDecision {
        needs_search,
        query: needs_search.then_some(query),
    }
}

/// Build the system message carrying search context and citation guidance.
pub fn search_context_system_prompt(search_context: &str, citation: &str) -> String {
    let mut content = String::from(
        "You are a helpful voice assistant. Keep responses concise and natural for voice conversation.",
    );
    if !search_context.is_empty() {
        content.push_str(&format!(
            "\n\nYou have access to the following web search results. Use this information to \
             answer the user's question accurately.\n{search_context}\n\nWhen answering:\n\
             1. Use the search results to provide accurate, current information\n\
             2. Keep your response concise (2-4 sentences for voice)\n\
             3. Start with the key answer, then add brief context if needed\n\
             4. {citation} (mention this naturally at the start or end of your response)"
        ));
    }
    content
}

/// Prepend the voice system prompt unless the history already has one.
pub(crate) fn with_system_prompt(messages: &[ChatMessage], system: &str) -> Vec<ChatMessage> {
    match messages.first() {
        Some(first) if first.role == Role::System => {
            let mut out = messages.to_vec();
            out[0].content = system.to_string();
            out
        }
        _ => {
            let mut out = Vec::with_capacity(messages.len() + 1);
            out.push(ChatMessage::system(system));
            out.extend_from_slice(messages);
            out
        }
    }
}

/// Messages for the search-decision call.
pub(crate) fn search_decision_messages(user_message: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SEARCH_DECISION_PROMPT),
        ChatMessage::user(user_message),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_prefilter() {
        assert!(matches_search_keywords("what's the latest news on mars?"));
        assert!(matches_search_keywords("What is the WEATHER like"));
        assert!(matches_search_keywords("who won the game"));
        assert!(!matches_search_keywords("explain how rust ownership works"));
        assert!(!matches_search_keywords("hello there"));
    }

    #[test]
    fn test_parse_search_decision_yes() {
        let decision = parse_search_decision(
            "SEARCH: YES\nQUERY: latest news on mars",
            "what's the latest news on mars?",
        );
        assert!(decision.needs_search);
        assert_eq!(decision.query.as_deref(), Some("latest news on mars"));
    }

    #[test]
    fn test_parse_search_decision_no() {
        let decision = parse_search_decision("SEARCH: NO\nQUERY:", "hello");
        assert!(!decision.needs_search);
        assert!(decision.query.is_none());
    }

    #[test]
    fn test_parse_search_decision_missing_query_falls_back() {
        let decision = parse_search_decision("SEARCH: YES", "what's the weather now");
        assert!(decision.needs_search);
        assert_eq!(decision.query.as_deref(), Some("what's the weather now"));
    }

    #[test]
    fn test_parse_search_decision_garbage_reads_as_no() {
        let decision = parse_search_decision("I think maybe?", "anything");
        assert!(!decision.needs_search);
    }

    #[test]
    fn test_parse_search_decision_case_insensitive() {
        let decision = parse_search_decision("search: yes\nquery: mars rover", "mars?");
        assert!(decision.needs_search);
        assert_eq!(decision.query.as_deref(), Some("mars rover"));
    }

    #[test]
    fn test_search_context_prompt_includes_citation() {
        let prompt = search_context_system_prompt(
            "[1] Mars news\nSource: https://www.nytimes.com/mars\n...",
            "Based on sources including Nytimes and Space",
        );
        assert!(prompt.contains("Based on sources including Nytimes and Space"));
        assert!(prompt.contains("web search results"));
    }

    #[test]
    fn test_search_context_prompt_plain_without_context() {
        let prompt = search_context_system_prompt("", "");
        assert!(!prompt.contains("web search results"));
    }

    #[test]
    fn test_with_system_prompt_prepends() {
        let history = vec![ChatMessage::user("hi")];
        let out = with_system_prompt(&history, VOICE_SYSTEM_PROMPT);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].role, Role::User);
    }

    #[test]
    fn test_with_system_prompt_replaces_existing() {
        let history = vec![ChatMessage::system("old"), ChatMessage::user("hi")];
        let out = with_system_prompt(&history, "new");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "new");
    }

    #[test]
    fn test_chat_message_serde_roles() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"user""#));
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
    }
}
