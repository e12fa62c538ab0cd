//! External audio decode helper.
//!
//! Clients send container-format fragments (typically WebM/Opus); STT wants
//! one mono 16 kHz PCM blob. Decoding is delegated to an external `ffmpeg`
//! process probed at startup; when it is absent the pipeline runs in
//! per-fragment fallback mode instead.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::bytes_to_samples;

/// Fragments shorter than this cannot hold a decodable container.
const MIN_DECODABLE_BYTES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("decode helper unavailable")]
    Unavailable,

    #[error("audio too short to decode ({0} bytes)")]
    TooShort(usize),

    #[error("decoder i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder exited with {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

/// Decode opaque container audio into mono 16-bit PCM at a fixed rate.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    /// Whether the helper can decode at all. When false the pipeline uses
    /// per-fragment fallback mode.
    fn is_available(&self) -> bool;

    /// Target sample rate of decoded PCM.
    fn sample_rate(&self) -> u32;

    /// Decode a container-format blob to PCM samples.
    async fn decode_to_pcm(&self, audio: &[u8]) -> Result<Vec<i16>, DecodeError>;
}

/// ffmpeg-backed decoder.
pub struct FfmpegDecoder {
    sample_rate: u32,
    available: bool,
}

impl FfmpegDecoder {
    /// Probe for an `ffmpeg` binary on PATH.
    pub fn probe(sample_rate: u32) -> Self {
        let available = std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if available {
            debug!("ffmpeg decode helper available");
        } else {
            warn!("ffmpeg not found, audio pipeline will run in per-fragment fallback mode");
        }
        Self {
            sample_rate,
            available,
        }
    }
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    fn is_available(&self) -> bool {
        self.available
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn decode_to_pcm(&self, audio: &[u8]) -> Result<Vec<i16>, DecodeError> {
        if !self.available {
            return Err(DecodeError::Unavailable);
        }
        if audio.len() < MIN_DECODABLE_BYTES {
            return Err(DecodeError::TooShort(audio.len()));
        }

        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ac",
                "1",
                "-ar",
            ])
            .arg(self.sample_rate.to_string())
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin from a task so a large blob cannot deadlock against the
        // stdout pipe buffer.
        let mut stdin = child.stdin.take().expect("stdin piped");
        let input = audio.to_vec();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
            drop(stdin);
        });

        let output = child.wait_with_output().await?;
        let _ = writer.await;

        if !output.status.success() {
            return Err(DecodeError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(200)
                    .collect(),
            });
        }

        let samples = bytes_to_samples(&output.stdout);
        debug!(
            input_bytes = audio.len(),
            samples = samples.len(),
            "decoded audio fragment"
        );
        Ok(samples)
    }
}
