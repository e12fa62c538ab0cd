//! Shared OpenAI-compatible chat-completions plumbing.
//!
//! Both LLM adapters (Groq, OpenAI) speak the same wire protocol; this
//! module holds the request payloads, the non-streaming response parse and
//! the SSE token stream decoder.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::core::provider::{LLM_TIMEOUT, ProviderError};

use super::{ChatMessage, TokenStream};

/// Sampling temperature for prose completions.
const PROSE_TEMPERATURE: f64 = 0.7;
/// Sampling temperature for the strict-format search decision.
const DECISION_TEMPERATURE: f64 = 0.1;
/// Token cap for prose completions.
const PROSE_MAX_TOKENS: u32 = 500;
/// Token cap for the search decision.
const DECISION_MAX_TOKENS: u32 = 100;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

/// Issue a non-streaming chat completion and return the message content.
pub(crate) async fn complete(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    strict: bool,
) -> Result<String, ProviderError> {
    let request = CompletionRequest {
        model,
        messages,
        temperature: if strict { DECISION_TEMPERATURE } else { PROSE_TEMPERATURE },
        max_tokens: if strict { DECISION_MAX_TOKENS } else { PROSE_MAX_TOKENS },
        stream: false,
    };

    let response = client
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .timeout(LLM_TIMEOUT)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ProviderError::from_response(response).await);
    }

    let parsed: CompletionResponse = response.json().await?;
    let content = parsed
        .choices
        .first()
        .map(|c| c.message.content.trim().to_string())
        .unwrap_or_default();
    Ok(content)
}

/// Open a streaming chat completion and decode its SSE lines into tokens.
///
/// The stream ends on the `[DONE]` sentinel; malformed data lines are
/// skipped rather than failing the whole stream.
pub(crate) async fn stream_complete(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
) -> Result<TokenStream, ProviderError> {
    let payload = json!({
        "model": model,
        "messages": messages,
        "temperature": PROSE_TEMPERATURE,
        "max_tokens": PROSE_MAX_TOKENS,
        "stream": true,
    });

    let response = client
        .post(format!("{base_url}/chat/completions"))
        .bearer_auth(api_key)
        .timeout(LLM_TIMEOUT)
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ProviderError::from_response(response).await);
    }

    Ok(sse_token_stream(response))
}

/// Decode an SSE response body into a stream of content tokens.
fn sse_token_stream(response: reqwest::Response) -> TokenStream {
    let stream = async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut done = false;

        while !done {
            let Some(chunk) = body.next().await else { break };
            let chunk = chunk.map_err(ProviderError::Request)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    done = true;
                    break;
                }
                let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                    debug!("skipping malformed SSE chunk");
                    continue;
                };
                let token = parsed.choices.into_iter().next().and_then(|c| c.delta.content);
                if let Some(token) = token {
                    if !token.is_empty() {
                        yield token;
                    }
                }
            }
        }
    };
    Box::pin(stream)
}
