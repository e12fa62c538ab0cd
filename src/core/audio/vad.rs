//! Energy-based turn segmentation.
//!
//! Each incoming fragment's RMS decides speech vs silence. Once at least one
//! speech fragment has been seen, a run of silence starts a timer; when the
//! silence lasts long enough end-of-turn fires. Without the decode helper
//! every fragment counts as speech and the turn ends after a fixed fragment
//! count instead.

use std::time::{Duration, Instant};

/// RMS above this is speech.
pub const SILENCE_RMS_THRESHOLD: f32 = 0.02;

/// Speech fragments required before silence can end a turn.
pub const MIN_SPEECH_CHUNKS: usize = 1;

/// Silence run length that ends a turn.
pub const SILENCE_DURATION: Duration = Duration::from_millis(2500);

/// Fragment count that ends a turn in fallback mode.
pub const MAX_CHUNKS_FALLBACK: usize = 6;

/// Per-fragment segmentation outcome, mirrored to the client as a
/// `vad_status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadUpdate {
    pub is_speech: bool,
    pub speech_ended: bool,
}

/// Segments the fragment stream into turns.
pub struct TurnSegmenter {
    fallback_mode: bool,
    speech_chunks: usize,
    fallback_chunks: usize,
    silence_started: Option<Instant>,
}

impl TurnSegmenter {
    pub fn new(fallback_mode: bool) -> Self {
        Self {
            fallback_mode,
            speech_chunks: 0,
            fallback_chunks: 0,
            silence_started: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_mode
    }

    /// Observe one fragment's energy. `rms` is `None` in fallback mode.
    pub fn observe(&mut self, rms: Option<f32>) -> VadUpdate {
        self.observe_at(rms, Instant::now())
    }

    pub(crate) fn observe_at(&mut self, rms: Option<f32>, now: Instant) -> VadUpdate {
        if self.fallback_mode {
            self.fallback_chunks += 1;
            let speech_ended = self.fallback_chunks >= MAX_CHUNKS_FALLBACK;
            return VadUpdate {
                is_speech: true,
                speech_ended,
            };
        }

        let is_speech = rms.is_some_and(|r| r > SILENCE_RMS_THRESHOLD);
        let mut speech_ended = false;

        if is_speech {
            self.speech_chunks += 1;
            self.silence_started = None;
        } else if self.speech_chunks >= MIN_SPEECH_CHUNKS {
            let started = *self.silence_started.get_or_insert(now);
            if now.duration_since(started) >= SILENCE_DURATION {
                speech_ended = true;
            }
        }

        VadUpdate {
            is_speech,
            speech_ended,
        }
    }

    /// Reset between turns.
    pub fn reset(&mut self) {
        self.speech_chunks = 0;
        self.fallback_chunks = 0;
        self.silence_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEECH: Option<f32> = Some(0.1);
    const SILENCE: Option<f32> = Some(0.001);

    #[test]
    fn test_silence_alone_never_ends_turn() {
        let mut segmenter = TurnSegmenter::new(false);
        let t0 = Instant::now();
        for i in 0..100 {
            let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(i * 100));
            assert!(!update.is_speech);
            assert!(!update.speech_ended);
        }
    }

    #[test]
    fn test_speech_then_silence_ends_turn() {
        let mut segmenter = TurnSegmenter::new(false);
        let t0 = Instant::now();

        assert!(segmenter.observe_at(SPEECH, t0).is_speech);

        // Silence starts the timer but does not fire before 2.5 s.
        let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(100));
        assert!(!update.speech_ended);
        let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(2000));
        assert!(!update.speech_ended);

        // 2.5 s after the silence run began, end-of-turn fires.
        let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(2700));
        assert!(update.speech_ended);
    }

    #[test]
    fn test_speech_resets_silence_timer() {
        let mut segmenter = TurnSegmenter::new(false);
        let t0 = Instant::now();

        segmenter.observe_at(SPEECH, t0);
        segmenter.observe_at(SILENCE, t0 + Duration::from_millis(100));
        // Speech resumes, cancelling the pending silence run.
        segmenter.observe_at(SPEECH, t0 + Duration::from_millis(2000));

        let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(3000));
        assert!(!update.speech_ended);
        let update = segmenter.observe_at(SILENCE, t0 + Duration::from_millis(5600));
        assert!(update.speech_ended);
    }

    #[test]
    fn test_rms_exactly_at_threshold_is_silence() {
        let mut segmenter = TurnSegmenter::new(false);
        let update = segmenter.observe_at(Some(SILENCE_RMS_THRESHOLD), Instant::now());
        assert!(!update.is_speech);
    }

    #[test]
    fn test_fallback_mode_counts_chunks() {
        let mut segmenter = TurnSegmenter::new(true);
        for i in 1..MAX_CHUNKS_FALLBACK {
            let update = segmenter.observe(None);
            assert!(update.is_speech, "chunk {i} should be speech");
            assert!(!update.speech_ended, "chunk {i} should not end the turn");
        }
        let update = segmenter.observe(None);
        assert!(update.speech_ended);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut segmenter = TurnSegmenter::new(true);
        for _ in 0..MAX_CHUNKS_FALLBACK {
            segmenter.observe(None);
        }
        segmenter.reset();
        assert!(!segmenter.observe(None).speech_ended);
    }
}
