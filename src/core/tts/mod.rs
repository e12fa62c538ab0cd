//! Text-to-speech provider family.
//!
//! Sentence-sized text in, a complete audio blob out. Adapters:
//!
//! - `"cartesia"` - Cartesia Sonic (primary; raw PCM wrapped into WAV)
//! - `"openai"` - OpenAI tts-1 (backup; MP3)

pub mod cartesia;
pub mod openai;

use async_trait::async_trait;
use bytes::Bytes;

use super::provider::{ManagedProvider, ProviderError};

pub use cartesia::CartesiaTts;
pub use openai::OpenAiTts;

/// Text-to-speech synthesis over one sentence or short passage.
#[async_trait]
pub trait TtsProvider: ManagedProvider {
    /// Synthesize speech for the given text. Empty text yields empty audio.
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError>;
}

/// Wrap raw 16-bit PCM into a WAV container.
pub(crate) fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Bytes, ProviderError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ProviderError::Malformed(format!("wav header: {e}")))?;
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| ProviderError::Malformed(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ProviderError::Malformed(format!("wav finalize: {e}")))?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}
