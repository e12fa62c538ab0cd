//! Audio fragment reassembly.
//!
//! Fragments are validated by magic header, classified by size, accumulated
//! for the duration of a turn and merged into one normalized mono 16 kHz
//! WAV blob when the segmenter fires end-of-turn. Without the decode helper
//! the accumulated fragments are handed to STT one at a time instead.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use super::decode::{AudioDecoder, DecodeError};

/// Fragments at or above this size are treated as complete push-to-talk
/// utterances and processed immediately.
pub const LARGE_FRAGMENT_BYTES: usize = 10 * 1024;

/// Validate a fragment by its 4-byte magic header.
///
/// Accepts WebM/Matroska (EBML), WAV (RIFF) and Ogg containers.
pub fn has_valid_magic(fragment: &[u8]) -> bool {
    if fragment.len() < 4 {
        return false;
    }
    matches!(
        &fragment[..4],
        [0x1A, 0x45, 0xDF, 0xA3] | b"RIFF" | b"OggS"
    )
}

/// Result of merging a turn's fragments.
#[derive(Debug)]
pub struct MergedAudio {
    /// Normalized mono 16 kHz PCM-in-WAV blob.
    pub wav: Bytes,
    /// Decoded samples, kept for quality metrics.
    pub samples: Vec<i16>,
    sample_rate: u32,
}

impl MergedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Accumulates validated fragments for the current turn.
pub struct AudioReassembler {
    decoder: Arc<dyn AudioDecoder>,
    fragments: Vec<Bytes>,
}

impl AudioReassembler {
    pub fn new(decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            decoder,
            fragments: Vec::new(),
        }
    }

    /// Accumulate a fragment. Returns false when the fragment fails magic
    /// validation and was dropped.
    pub fn push(&mut self, fragment: Bytes) -> bool {
        if !has_valid_magic(&fragment) {
            warn!(bytes = fragment.len(), "dropping fragment with invalid magic");
            return false;
        }
        self.fragments.push(fragment);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    /// Take the accumulated fragments, leaving the reassembler empty for the
    /// next turn.
    pub fn take_fragments(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.fragments)
    }

    /// Decode and concatenate fragments into one normalized WAV blob.
    pub async fn merge(&self, fragments: &[Bytes]) -> Result<MergedAudio, DecodeError> {
        merge_fragments(self.decoder.as_ref(), fragments).await
    }
}

/// Decode each fragment and concatenate the PCM into one normalized mono
/// WAV blob at the decoder's sample rate.
pub async fn merge_fragments(
    decoder: &dyn AudioDecoder,
    fragments: &[Bytes],
) -> Result<MergedAudio, DecodeError> {
    if !decoder.is_available() {
        return Err(DecodeError::Unavailable);
    }

    let sample_rate = decoder.sample_rate();
    let mut samples: Vec<i16> = Vec::new();
    for fragment in fragments {
        match decoder.decode_to_pcm(fragment).await {
            Ok(mut pcm) => samples.append(&mut pcm),
            Err(e) => {
                // One undecodable fragment should not lose the turn.
                warn!(bytes = fragment.len(), "skipping undecodable fragment: {e}");
            }
        }
    }

    let wav = write_wav(&samples, sample_rate)?;
    debug!(
        fragments = fragments.len(),
        samples = samples.len(),
        wav_bytes = wav.len(),
        "merged audio fragments"
    );
    Ok(MergedAudio {
        wav,
        samples,
        sample_rate,
    })
}

fn write_wav(samples: &[i16], sample_rate: u32) -> Result<Bytes, DecodeError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(samples.len() * 2 + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}
