//! Typed WebSocket frames.
//!
//! Server-to-client frames are tagged JSON; client-to-server text frames are
//! the small control vocabulary (binary frames are opaque audio and never
//! reach this module).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::audio::AudioQuality;
use crate::store::SessionState;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptPayload {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: f64,
    pub is_final: bool,
}

impl TranscriptPayload {
    pub fn new(speaker: Speaker, text: impl Into<String>, is_final: bool) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            id: format!("{speaker}_{}", (now * 1000.0) as u64),
            speaker,
            text: text.into(),
            timestamp: now,
            is_final,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VadPayload {
    pub is_speech: bool,
    pub speech_ended: bool,
}

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StateChange { state: SessionState },
    TranscriptUpdate { data: TranscriptPayload },
    /// Base64-encoded synthesized audio
    Audio { data: String },
    AudioMetrics { data: AudioQuality },
    VadStatus { data: VadPayload },
    InterruptAck { message: String },
    Error { message: String },
}

/// Client-to-server text control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Interrupt,
    CancelAudio,
    #[serde(other)]
    Unknown,
}
