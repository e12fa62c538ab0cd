//! Audio ingestion: fragment validation, decode, reassembly, turn
//! segmentation and quality metrics.

pub mod decode;
pub mod quality;
pub mod reassembler;
pub mod vad;

pub use decode::{AudioDecoder, DecodeError, FfmpegDecoder};
pub use quality::{AudioQuality, analyze};
pub use reassembler::{
    AudioReassembler, LARGE_FRAGMENT_BYTES, MergedAudio, has_valid_magic, merge_fragments,
};
pub use vad::{TurnSegmenter, VadUpdate};

/// Normalized RMS energy of 16-bit PCM samples, in `[0, 1]`.
pub fn pcm_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Reinterpret little-endian bytes as 16-bit PCM samples.
pub fn bytes_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(pcm_rms(&[0; 1600]), 0.0);
        assert_eq!(pcm_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_full_scale_square_wave() {
        let samples: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN }).collect();
        let rms = pcm_rms(&samples);
        assert!((rms - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_bytes_round_trip() {
        let samples: Vec<i16> = vec![-32768, -1, 0, 1, 32767];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(bytes_to_samples(&bytes), samples);
    }
}
