//! Per-connection turn orchestrator.
//!
//! A single state machine per connection drives
//! `idle -> listening -> thinking -> speaking -> listening` (or `error`).
//! Incoming audio fragments feed the segmenter; end-of-turn launches the
//! pipeline as its own task so the receive loop keeps observing frames, and
//! barge-in is a cooperative interrupt flag checked at every yield point in
//! that pipeline. At most one turn runs per session.
//!
//! Pipeline per turn: STT over the reassembled blob (or per-fragment in
//! fallback mode), semantic-cache probe (a hit short-circuits the search
//! decision entirely), optional web search, streamed LLM completion with
//! sentence-chunked TTS, then history commit and caching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::SemanticCache;
use crate::core::audio::{
    AudioDecoder, AudioReassembler, LARGE_FRAGMENT_BYTES, TurnSegmenter, merge_fragments, pcm_rms,
    quality,
};
use crate::core::llm::{ChatMessage, LlmProvider, SearchDecision};
use crate::core::provider::{ProviderError, manager::ProviderManager};
use crate::core::search::{SearchProvider, format_citations, format_results_for_llm};
use crate::core::stt::SttProvider;
use crate::core::tts::TtsProvider;
use crate::metrics::{MetricsCollector, Stage};
use crate::session::memory::MemorySink;
use crate::session::messages::{
    ControlMessage, ServerMessage, Speaker, TranscriptPayload, VadPayload,
};
use crate::store::{SessionState, SessionStore, SessionUpdate};

/// While speaking, fragments larger than this trigger barge-in.
pub const BARGE_IN_MIN_BYTES: usize = 500;

/// Maximum web search results fetched per turn.
const MAX_SEARCH_RESULTS: usize = 3;

/// A sentence buffer must exceed this many characters (trimmed) before TTS.
const MIN_SENTENCE_CHARS: usize = 10;

/// Responses longer than this are eligible for caching.
const MIN_CACHEABLE_CHARS: usize = 20;

/// Everything a turn needs, owned by the connection handler and shared with
/// each spawned turn task.
pub struct TurnServices {
    pub stt: Arc<ProviderManager<dyn SttProvider>>,
    pub llm: Arc<ProviderManager<dyn LlmProvider>>,
    pub tts: Arc<ProviderManager<dyn TtsProvider>>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub cache: Arc<SemanticCache>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<MetricsCollector>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub memory: Arc<dyn MemorySink>,
}

/// Per-connection turn state machine.
pub struct TurnOrchestrator {
    session_id: String,
    user_id: String,
    services: Arc<TurnServices>,
    outbound: mpsc::Sender<ServerMessage>,
    state: Arc<Mutex<SessionState>>,
    interrupted: Arc<AtomicBool>,
    segmenter: TurnSegmenter,
    reassembler: AudioReassembler,
    history: Arc<tokio::sync::Mutex<Vec<ChatMessage>>>,
    active_turn: Option<JoinHandle<()>>,
}

impl TurnOrchestrator {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        initial_history: Vec<ChatMessage>,
        services: Arc<TurnServices>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let fallback_mode = !services.decoder.is_available();
        let decoder = Arc::clone(&services.decoder);
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            services,
            outbound,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            interrupted: Arc::new(AtomicBool::new(false)),
            segmenter: TurnSegmenter::new(fallback_mode),
            reassembler: AudioReassembler::new(decoder),
            history: Arc::new(tokio::sync::Mutex::new(initial_history)),
            active_turn: None,
        }
    }

    pub fn current_state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Shared conversation history, used by the handler's disconnect flush.
    pub fn history_handle(&self) -> Arc<tokio::sync::Mutex<Vec<ChatMessage>>> {
        Arc::clone(&self.history)
    }

    /// Announce the initial listening state.
    pub async fn start(&self) {
        set_state(&self.state, &self.outbound, SessionState::Listening).await;
    }

    /// Feed one binary audio fragment from the client.
    pub async fn handle_audio(&mut self, frame: Bytes) {
        if self.current_state() == SessionState::Speaking && frame.len() > BARGE_IN_MIN_BYTES {
            info!(
                session_id = %self.session_id,
                bytes = frame.len(),
                "barge-in detected"
            );
            self.begin_interrupt().await;
            // The triggering fragment opens the next turn.
            self.reassembler.clear();
            self.segmenter.reset();
        }

        if !self.reassembler.push(frame.clone()) {
            return;
        }

        if frame.len() >= LARGE_FRAGMENT_BYTES {
            debug!(bytes = frame.len(), "large fragment, processing immediately");
            self.fire_turn().await;
            return;
        }

        let Some(update) = self.observe(&frame).await else {
            return;
        };
        self.send(ServerMessage::VadStatus {
            data: VadPayload {
                is_speech: update.is_speech,
                speech_ended: update.speech_ended,
            },
        })
        .await;

        if update.speech_ended {
            self.fire_turn().await;
        }
    }

    /// Handle a JSON control frame.
    pub async fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Interrupt | ControlMessage::CancelAudio => {
                self.begin_interrupt().await;
            }
            ControlMessage::Unknown => {
                warn!(session_id = %self.session_id, "unknown control message");
            }
        }
    }

    /// Stop any in-flight turn; called when the connection goes away.
    pub async fn shutdown(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(handle) = self.active_turn.take() {
            handle.abort();
        }
        debug!(session_id = %self.session_id, "orchestrator shut down");
    }

    async fn begin_interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.send(ServerMessage::InterruptAck {
            message: "response interrupted".to_string(),
        })
        .await;
        set_state(&self.state, &self.outbound, SessionState::Listening).await;
    }

    async fn observe(&mut self, frame: &Bytes) -> Option<crate::core::audio::VadUpdate> {
        if self.segmenter.is_fallback() {
            return Some(self.segmenter.observe(None));
        }
        match self.services.decoder.decode_to_pcm(frame).await {
            Ok(samples) => Some(self.segmenter.observe(Some(pcm_rms(&samples)))),
            Err(e) => {
                warn!("fragment decode failed, segmentation unchanged: {e}");
                None
            }
        }
    }

    async fn fire_turn(&mut self) {
        if self.active_turn.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(session_id = %self.session_id, "turn in flight, accumulating");
            return;
        }

        let fragments = self.reassembler.take_fragments();
        self.segmenter.reset();
        if fragments.is_empty() {
            return;
        }

        self.interrupted.store(false, Ordering::SeqCst);
        let run = TurnRun {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            services: Arc::clone(&self.services),
            outbound: self.outbound.clone(),
            state: Arc::clone(&self.state),
            interrupted: Arc::clone(&self.interrupted),
            history: Arc::clone(&self.history),
            fragments,
        };
        self.active_turn = Some(tokio::spawn(run.run()));
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session_id = %self.session_id, "outbound channel closed");
        }
    }
}

/// Update the shared state and mirror it to the client.
async fn set_state(
    state: &Arc<Mutex<SessionState>>,
    outbound: &mpsc::Sender<ServerMessage>,
    new_state: SessionState,
) {
    *state.lock() = new_state;
    if outbound
        .send(ServerMessage::StateChange { state: new_state })
        .await
        .is_err()
    {
        debug!("outbound channel closed while sending state change");
    }
}

/// Does this token close a sentence?
fn is_sentence_boundary(token: &str) -> bool {
    matches!(
        token.trim_end().chars().last(),
        Some('.') | Some('!') | Some('?') | Some('\n')
    ) || token.contains('\n')
}

/// One turn's worth of pipeline execution, spawned as its own task.
struct TurnRun {
    session_id: String,
    user_id: String,
    services: Arc<TurnServices>,
    outbound: mpsc::Sender<ServerMessage>,
    state: Arc<Mutex<SessionState>>,
    interrupted: Arc<AtomicBool>,
    history: Arc<tokio::sync::Mutex<Vec<ChatMessage>>>,
    fragments: Vec<Bytes>,
}

impl TurnRun {
    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session_id = %self.session_id, "outbound channel closed");
        }
    }

    async fn set_state(&self, new_state: SessionState) {
        set_state(&self.state, &self.outbound, new_state).await;
    }

    async fn run(self) {
        let correlation_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let metrics = Arc::clone(&self.services.metrics);
        metrics.start_request(&correlation_id, &self.session_id, &self.user_id);
        self.set_state(SessionState::Thinking).await;

        // Speech-to-text over the accumulated fragments.
        metrics.start_stage(&correlation_id, Stage::Stt);
        let transcript = match self.transcribe().await {
            Ok(t) => {
                metrics.end_stage(&correlation_id, Stage::Stt);
                t
            }
            Err(e) => {
                error!(correlation_id, "stt failed: {e}");
                metrics.end_stage(&correlation_id, Stage::Stt);
                metrics.end_request(&correlation_id, false, Some(&e.to_string()), false);
                self.set_state(SessionState::Listening).await;
                return;
            }
        };

        let transcript = transcript.trim().to_string();
        if transcript.chars().count() < 2 {
            debug!(correlation_id, "empty transcript, back to listening");
            metrics.discard_request(&correlation_id);
            self.set_state(SessionState::Listening).await;
            return;
        }
        info!(correlation_id, transcript = %transcript, "user transcript");

        self.send(ServerMessage::TranscriptUpdate {
            data: TranscriptPayload::new(Speaker::User, &transcript, true),
        })
        .await;
        self.commit_message(ChatMessage::user(&transcript), false).await;

        // Cache probe: a hit short-circuits the search decision entirely.
        if let Some(hit) = self.services.cache.get(&transcript).await {
            self.finish_with_cached(&correlation_id, &hit.response).await;
            return;
        }

        // Search decision, then the optional search itself.
        let decision = self.decide_search(&transcript).await;
        let mut search_context = String::new();
        let mut citation = String::new();
        let mut used_search = false;

        if decision.needs_search && let Some(search) = self.services.search.as_ref() {
            let query = decision.query.unwrap_or_else(|| transcript.clone());
            metrics.start_stage(&correlation_id, Stage::Search);
            let results = self.run_search(search.as_ref(), &query).await;
            metrics.end_stage(&correlation_id, Stage::Search);

            if !results.is_empty() {
                search_context = format_results_for_llm(&results);
                citation = format_citations(&results);
                used_search = true;
            }
        }

        // Streamed LLM completion with sentence-chunked TTS.
        let messages = self.history.lock().await.clone();
        metrics.start_stage(&correlation_id, Stage::Llm);
        let stream_result = if used_search {
            self.services
                .llm
                .execute(|p| {
                    let messages = messages.clone();
                    let context = search_context.clone();
                    let citation = citation.clone();
                    async move {
                        p.stream_complete_with_context(&messages, &context, &citation).await
                    }
                })
                .await
        } else {
            self.services
                .llm
                .execute(|p| {
                    let messages = messages.clone();
                    async move { p.stream_complete(&messages).await }
                })
                .await
        };

        let mut stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                metrics.end_stage(&correlation_id, Stage::Llm);
                self.fail_turn(&correlation_id, &e.to_string(), used_search).await;
                return;
            }
        };

        let mut full_response = String::new();
        let mut sentence = String::new();
        let mut first_audio_sent = false;
        let mut stream_error: Option<ProviderError> = None;

        while let Some(item) = stream.next().await {
            if self.interrupted() {
                debug!(correlation_id, "interrupted mid-stream");
                break;
            }
            let token = match item {
                Ok(t) => t,
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            };

            full_response.push_str(&token);
            sentence.push_str(&token);
            self.send(ServerMessage::TranscriptUpdate {
                data: TranscriptPayload::new(Speaker::Assistant, &full_response, false),
            })
            .await;

            if is_sentence_boundary(&token)
                && sentence.trim().chars().count() > MIN_SENTENCE_CHARS
            {
                match self
                    .speak_sentence(&correlation_id, &sentence, &mut first_audio_sent)
                    .await
                {
                    SentenceOutcome::Sent | SentenceOutcome::Skipped => sentence.clear(),
                    SentenceOutcome::TurnOver => {
                        metrics.end_stage(&correlation_id, Stage::Llm);
                        self.fail_turn(&correlation_id, "tts providers exhausted", used_search)
                            .await;
                        return;
                    }
                }
            }
        }
        metrics.end_stage(&correlation_id, Stage::Llm);

        if full_response.is_empty() {
            if let Some(e) = stream_error {
                self.fail_turn(&correlation_id, &e.to_string(), used_search).await;
            } else if self.interrupted() {
                metrics.end_request(&correlation_id, false, Some("interrupted"), used_search);
                self.set_state(SessionState::Listening).await;
            } else {
                metrics.end_request(&correlation_id, false, Some("empty response"), used_search);
                self.set_state(SessionState::Listening).await;
            }
            return;
        }
        if let Some(e) = stream_error {
            // Tokens were received: the partial response stands.
            warn!(correlation_id, "stream ended early, keeping partial response: {e}");
        }

        // Flush whatever is left in the sentence buffer.
        if !self.interrupted()
            && !sentence.trim().is_empty()
            && matches!(
                self.speak_sentence(&correlation_id, &sentence, &mut first_audio_sent)
                    .await,
                SentenceOutcome::TurnOver
            )
        {
            self.fail_turn(&correlation_id, "tts providers exhausted", used_search).await;
            return;
        }

        if self.interrupted() {
            info!(correlation_id, "turn interrupted, dropping assistant message");
            metrics.end_request(&correlation_id, false, Some("interrupted"), used_search);
            self.set_state(SessionState::Listening).await;
            return;
        }

        // Commit and optionally cache.
        self.send(ServerMessage::TranscriptUpdate {
            data: TranscriptPayload::new(Speaker::Assistant, &full_response, true),
        })
        .await;
        self.commit_message(ChatMessage::assistant(&full_response), used_search).await;

        if !used_search && full_response.chars().count() > MIN_CACHEABLE_CHARS {
            self.services
                .cache
                .set(&transcript, &full_response, None, None)
                .await;
        }

        metrics.end_request(&correlation_id, true, None, used_search);
        self.set_state(SessionState::Listening).await;
    }

    /// STT over the merged blob, or per-fragment in fallback mode.
    async fn transcribe(&self) -> Result<String, ProviderError> {
        if self.services.decoder.is_available() {
            let merged = merge_fragments(self.services.decoder.as_ref(), &self.fragments)
                .await
                .map_err(|e| ProviderError::Malformed(format!("audio merge: {e}")))?;

            self.send(ServerMessage::AudioMetrics {
                data: quality::analyze(&merged.samples, self.services.decoder.sample_rate()),
            })
            .await;

            let wav = merged.wav;
            self.services
                .stt
                .execute(|p| {
                    let wav = wav.clone();
                    async move { p.transcribe(wav).await }
                })
                .await
        } else {
            // Per-fragment transcription, joined with single spaces.
            let mut parts = Vec::with_capacity(self.fragments.len());
            for fragment in &self.fragments {
                let text = self
                    .services
                    .stt
                    .execute(|p| {
                        let fragment = fragment.clone();
                        async move { p.transcribe(fragment).await }
                    })
                    .await?;
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
            Ok(parts.join(" "))
        }
    }

    async fn decide_search(&self, transcript: &str) -> SearchDecision {
        match self
            .services
            .llm
            .execute(|p| {
                let transcript = transcript.to_string();
                async move { p.detect_search_needed(&transcript).await }
            })
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!("search detection unavailable: {e}");
                SearchDecision::no()
            }
        }
    }

    async fn run_search(
        &self,
        search: &dyn SearchProvider,
        query: &str,
    ) -> Vec<crate::core::search::SearchResult> {
        if !search.circuit().allow() {
            warn!("search circuit open, skipping search");
            return Vec::new();
        }
        match search.search(query, MAX_SEARCH_RESULTS).await {
            Ok(results) => {
                search.circuit().record_success();
                results
            }
            Err(e) => {
                search.circuit().record_failure(&e);
                warn!("search failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    /// Synthesize one sentence and ship it as a base64 audio frame.
    async fn speak_sentence(
        &self,
        correlation_id: &str,
        sentence: &str,
        first_audio_sent: &mut bool,
    ) -> SentenceOutcome {
        if self.interrupted() {
            return SentenceOutcome::Skipped;
        }

        let text = sentence.trim().to_string();
        if !*first_audio_sent {
            self.set_state(SessionState::Speaking).await;
            *first_audio_sent = true;
            self.services
                .metrics
                .start_stage(correlation_id, Stage::Tts);
        }

        let result = self
            .services
            .tts
            .execute(|p| {
                let text = text.clone();
                async move { p.synthesize(&text).await }
            })
            .await;
        self.services.metrics.end_stage(correlation_id, Stage::Tts);

        match result {
            Ok(audio) => {
                if self.interrupted() {
                    return SentenceOutcome::Skipped;
                }
                if !audio.is_empty() {
                    self.send(ServerMessage::Audio {
                        data: BASE64.encode(&audio),
                    })
                    .await;
                }
                SentenceOutcome::Sent
            }
            Err(e @ ProviderError::AllProvidersFailed { .. }) => {
                error!(correlation_id, "tts exhausted: {e}");
                SentenceOutcome::TurnOver
            }
            Err(e) => {
                warn!(correlation_id, "tts sentence failed, continuing: {e}");
                SentenceOutcome::Skipped
            }
        }
    }

    /// Serve a cached response as one audio frame; no LLM stage runs.
    async fn finish_with_cached(&self, correlation_id: &str, response: &str) {
        let metrics = &self.services.metrics;
        metrics.start_stage(correlation_id, Stage::Tts);
        let result = self
            .services
            .tts
            .execute(|p| {
                let response = response.to_string();
                async move { p.synthesize(&response).await }
            })
            .await;
        metrics.end_stage(correlation_id, Stage::Tts);

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                self.fail_turn(correlation_id, &e.to_string(), false).await;
                return;
            }
        };

        if self.interrupted() {
            metrics.end_request(correlation_id, false, Some("interrupted"), false);
            self.set_state(SessionState::Listening).await;
            return;
        }

        self.set_state(SessionState::Speaking).await;
        self.send(ServerMessage::Audio {
            data: BASE64.encode(&audio),
        })
        .await;
        self.send(ServerMessage::TranscriptUpdate {
            data: TranscriptPayload::new(Speaker::Assistant, response, true),
        })
        .await;
        self.commit_message(ChatMessage::assistant(response), false).await;

        metrics.end_request(correlation_id, true, None, false);
        self.set_state(SessionState::Listening).await;
    }

    /// Append to in-memory history and persist best-effort.
    async fn commit_message(&self, message: ChatMessage, used_search: bool) {
        self.history.lock().await.push(message.clone());

        if let Err(e) = self
            .services
            .sessions
            .update(
                &self.session_id,
                SessionUpdate {
                    add_message: Some(message.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(session_id = %self.session_id, "failed to persist message: {e}");
        }

        self.services
            .memory
            .save_message(
                &self.session_id,
                &self.user_id,
                message.role,
                &message.content,
                used_search,
            )
            .await;
    }

    /// Fatal turn failure: error frame, failed metrics, back to listening.
    async fn fail_turn(&self, correlation_id: &str, error: &str, used_search: bool) {
        self.send(ServerMessage::Error {
            message: error.to_string(),
        })
        .await;
        self.services
            .metrics
            .end_request(correlation_id, false, Some(error), used_search);
        self.set_state(SessionState::Listening).await;
    }
}

enum SentenceOutcome {
    /// Audio sent (or skipped because of interruption mid-synthesis).
    Sent,
    /// Sentence skipped; the turn continues.
    Skipped,
    /// TTS exhausted; the turn is over.
    TurnOver,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_boundary_detection() {
        assert!(is_sentence_boundary("."));
        assert!(is_sentence_boundary("!"));
        assert!(is_sentence_boundary("?"));
        assert!(is_sentence_boundary("\n"));
        assert!(is_sentence_boundary("world."));
        assert!(is_sentence_boundary("done! "));
        assert!(!is_sentence_boundary("hello"));
        assert!(!is_sentence_boundary(", "));
        assert!(!is_sentence_boundary(""));
    }
}
