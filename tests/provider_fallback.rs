//! Provider manager and adapter tests against mocked HTTP backends.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use futures_util::StreamExt;
use vox_gateway::core::circuit::CircuitState;
use vox_gateway::core::llm::{ChatMessage, GroqLlm, LlmProvider};
use vox_gateway::core::provider::manager::ProviderManager;
use vox_gateway::core::provider::{ManagedProvider, ProviderError, ProviderKind};
use vox_gateway::core::stt::{DeepgramStt, GroqWhisperStt, SttProvider};
use vox_gateway::core::tts::{CartesiaTts, TtsProvider};

fn deepgram_body(transcript: &str) -> serde_json::Value {
    json!({
        "results": {
            "channels": [
                { "alternatives": [ { "transcript": transcript, "confidence": 0.98 } ] }
            ]
        }
    })
}

/// Primary STT returns 500 three times: its circuit opens, the backup takes
/// over, and subsequent turns never touch the primary again.
#[tokio::test]
async fn test_stt_primary_fails_backup_succeeds() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/listen"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(3)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "what time is it" })))
        .mount(&backup)
        .await;

    let deepgram = Arc::new(DeepgramStt::with_base_url("key-a", 0, primary.uri()));
    let groq = Arc::new(GroqWhisperStt::with_base_url("key-b", 1, backup.uri()));

    let mut manager: ProviderManager<dyn SttProvider> = ProviderManager::new(ProviderKind::Stt);
    manager.register(Arc::clone(&deepgram) as Arc<dyn SttProvider>);
    manager.register(Arc::clone(&groq) as Arc<dyn SttProvider>);

    let audio = bytes::Bytes::from_static(b"RIFF....WAVEdata....");

    // Three calls: each trips the primary once and falls back.
    for _ in 0..3 {
        let transcript = manager
            .execute(|p| {
                let audio = audio.clone();
                async move { p.transcribe(audio).await }
            })
            .await
            .unwrap();
        assert_eq!(transcript, "what time is it");
    }

    assert_eq!(deepgram.circuit().state(), CircuitState::Open);
    assert_eq!(manager.current_name().as_deref(), Some("groq-whisper"));
    assert!(manager.fallback_count() >= 1);

    // Fourth call: the open circuit skips the primary without an HTTP call
    // (the expect(3) above verifies the request count on drop).
    let transcript = manager
        .execute(|p| {
            let audio = audio.clone();
            async move { p.transcribe(audio).await }
        })
        .await
        .unwrap();
    assert_eq!(transcript, "what time is it");
}

#[tokio::test]
async fn test_all_stt_providers_failing_surfaces_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let deepgram = Arc::new(DeepgramStt::with_base_url("key", 0, server.uri()));
    let mut manager: ProviderManager<dyn SttProvider> = ProviderManager::new(ProviderKind::Stt);
    manager.register(deepgram as Arc<dyn SttProvider>);

    let err = manager
        .execute(|p| {
            let audio = bytes::Bytes::from_static(b"RIFF....");
            async move { p.transcribe(audio).await }
        })
        .await
        .unwrap_err();

    match err {
        ProviderError::AllProvidersFailed { kind, summary } => {
            assert_eq!(kind, ProviderKind::Stt);
            assert!(summary.contains("deepgram"));
        }
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deepgram_parses_transcript() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/listen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(deepgram_body(" hello world ")))
        .mount(&server)
        .await;

    let stt = DeepgramStt::with_base_url("key", 0, server.uri());
    let transcript = stt
        .transcribe(bytes::Bytes::from_static(b"RIFF....WAVE"))
        .await
        .unwrap();
    assert_eq!(transcript, "hello world");
}

#[tokio::test]
async fn test_groq_llm_sse_stream_yields_tokens() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\".\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .mount(&server)
        .await;

    let llm = GroqLlm::with_base_url("key", 0, server.uri());
    let mut stream = llm
        .stream_complete(&[ChatMessage::user("hi")])
        .await
        .unwrap();

    let mut tokens = Vec::new();
    while let Some(item) = stream.next().await {
        tokens.push(item.unwrap());
    }
    assert_eq!(tokens, vec!["Hello", " there", "."]);
}

#[tokio::test]
async fn test_groq_llm_detect_search_parses_strict_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                { "message": { "role": "assistant", "content": "SEARCH: YES\nQUERY: latest news on mars" } }
            ]
        })))
        .mount(&server)
        .await;

    let llm = GroqLlm::with_base_url("key", 0, server.uri());
    let decision = llm
        .detect_search_needed("what's the latest news on mars?")
        .await
        .unwrap();
    assert!(decision.needs_search);
    assert_eq!(decision.query.as_deref(), Some("latest news on mars"));
}

#[tokio::test]
async fn test_detect_search_skips_llm_without_keywords() {
    // No mock server: reaching the network would fail the test.
    let llm = GroqLlm::with_base_url("key", 0, "http://127.0.0.1:9");
    let decision = llm
        .detect_search_needed("explain rust ownership")
        .await
        .unwrap();
    assert!(!decision.needs_search);
}

#[tokio::test]
async fn test_detect_search_falls_back_to_keywords_on_llm_error() {
    // Keyword match plus an unreachable LLM: search proceeds with the raw
    // message as query.
    let llm = GroqLlm::with_base_url("key", 0, "http://127.0.0.1:9");
    let decision = llm
        .detect_search_needed("what's the weather right now")
        .await
        .unwrap();
    assert!(decision.needs_search);
    assert_eq!(decision.query.as_deref(), Some("what's the weather right now"));
}

#[tokio::test]
async fn test_cartesia_wraps_pcm_into_wav() {
    let server = MockServer::start().await;
    let pcm: Vec<u8> = (0..200i16).flat_map(|s| s.to_le_bytes()).collect();
    Mock::given(method("POST"))
        .and(path("/tts/bytes"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(pcm),
        )
        .mount(&server)
        .await;

    let tts = CartesiaTts::with_base_url("key", 0, server.uri());
    let audio = tts.synthesize("Hello there.").await.unwrap();

    assert!(audio.starts_with(b"RIFF"));
    let reader = hound::WavReader::new(std::io::Cursor::new(audio.to_vec())).unwrap();
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.len(), 200);
}

#[tokio::test]
async fn test_tts_error_response_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let tts = CartesiaTts::with_base_url("key", 0, server.uri());
    let err = tts.synthesize("Hello.").await.unwrap_err();
    match err {
        ProviderError::Api { status, body } => {
            assert_eq!(status, 429);
            assert!(body.contains("rate limited"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_checks_report_status() {
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy)
        .await;

    let stt_up = DeepgramStt::with_base_url("key", 0, healthy.uri());
    assert!(stt_up.health_check().await);

    let stt_down = DeepgramStt::with_base_url("key", 0, "http://127.0.0.1:9");
    assert!(!stt_down.health_check().await);
}
