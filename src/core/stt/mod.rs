//! Speech-to-text provider family.
//!
//! Batch transcription over REST: the reassembled audio blob (or a single
//! fragment in per-fragment fallback mode) goes in, a transcript comes out.
//! Adapters:
//!
//! - `"deepgram"` - Deepgram pre-recorded audio API (primary)
//! - `"groq-whisper"` - Groq Whisper transcription API (backup)

pub mod deepgram;
pub mod groq;

use async_trait::async_trait;
use bytes::Bytes;

use super::provider::{ManagedProvider, ProviderError};

pub use deepgram::DeepgramStt;
pub use groq::GroqWhisperStt;

/// Batch speech-to-text over an opaque audio blob.
#[async_trait]
pub trait SttProvider: ManagedProvider {
    /// Transcribe an audio blob to text. Returns the trimmed transcript,
    /// which may be empty when no speech was recognized.
    async fn transcribe(&self, audio: Bytes) -> Result<String, ProviderError>;
}

/// Pick a content type from the blob's magic header.
///
/// Reassembled turns are WAV; raw client fragments are typically WebM.
pub(crate) fn sniff_content_type(audio: &[u8]) -> &'static str {
    if audio.starts_with(b"RIFF") {
        "audio/wav"
    } else if audio.starts_with(b"OggS") {
        "audio/ogg"
    } else {
        "audio/webm"
    }
}
