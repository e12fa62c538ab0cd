//! Audio quality metrics.
//!
//! Pure functions over decoded PCM: RMS energy, peak amplitude, an SNR
//! estimate, clipping detection and a 0-100 quality score. The result feeds
//! the `audio_metrics` frame sent to the client after each turn's audio is
//! merged.

use serde::Serialize;

/// Amplitude threshold separating signal from noise for SNR estimation.
const NOISE_FLOOR: f64 = 0.01;

/// Normalized amplitude at or above which a sample counts as clipped.
const CLIP_THRESHOLD: f64 = 0.99;

#[derive(Debug, Clone, Serialize)]
pub struct ClippingInfo {
    pub is_clipping: bool,
    pub clipped_samples: usize,
    pub clip_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioQuality {
    pub rms: f64,
    pub peak: f64,
    pub snr_db: f64,
    pub clipping: ClippingInfo,
    pub quality_score: u32,
    pub quality_label: &'static str,
    pub duration_ms: u64,
}

/// Full quality analysis of a decoded audio blob.
pub fn analyze(samples: &[i16], sample_rate: u32) -> AudioQuality {
    let normalized: Vec<f64> = samples.iter().map(|&s| s as f64 / 32768.0).collect();

    let rms = rms(&normalized);
    let peak = peak(&normalized);
    let snr_db = snr_db(&normalized);
    let clipping = detect_clipping(&normalized);
    let quality_score = quality_score(snr_db, rms, peak, clipping.is_clipping);

    let quality_label = match quality_score {
        80.. => "excellent",
        60..=79 => "good",
        40..=59 => "fair",
        _ => "poor",
    };

    let duration_ms = if sample_rate > 0 {
        samples.len() as u64 * 1000 / sample_rate as u64
    } else {
        0
    };

    AudioQuality {
        rms: round1000(rms),
        peak: round1000(peak),
        snr_db: round10(snr_db),
        clipping,
        quality_score,
        quality_label,
        duration_ms,
    }
}

fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f64).sqrt()
}

fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
}

/// Estimate SNR by splitting samples at an amplitude threshold: power of
/// the loud part over power of the quiet part, clamped to non-negative dB.
fn snr_db(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut signal_power = 0.0;
    let mut signal_count = 0usize;
    let mut noise_power = 0.0;
    let mut noise_count = 0usize;

    for &s in samples {
        if s.abs() > NOISE_FLOOR {
            signal_power += s * s;
            signal_count += 1;
        } else {
            noise_power += s * s;
            noise_count += 1;
        }
    }

    if signal_count == 0 {
        return 0.0;
    }

    let signal_power = signal_power / signal_count as f64;
    let noise_power = if noise_count == 0 {
        NOISE_FLOOR * NOISE_FLOOR
    } else {
        (noise_power / noise_count as f64).max(1e-10)
    };

    (10.0 * (signal_power / noise_power).log10()).max(0.0)
}

fn detect_clipping(samples: &[f64]) -> ClippingInfo {
    if samples.is_empty() {
        return ClippingInfo {
            is_clipping: false,
            clipped_samples: 0,
            clip_percentage: 0.0,
        };
    }

    let clipped_samples = samples.iter().filter(|s| s.abs() >= CLIP_THRESHOLD).count();
    ClippingInfo {
        is_clipping: clipped_samples > 0,
        clipped_samples,
        clip_percentage: round100(clipped_samples as f64 / samples.len() as f64 * 100.0),
    }
}

/// Score composition: SNR up to 40 points, RMS up to 30 (speaking volume is
/// ideal), peak up to 20, minus 20 when clipping.
fn quality_score(snr: f64, rms: f64, peak: f64, is_clipping: bool) -> u32 {
    let mut score: i64 = 0;

    score += if snr >= 20.0 {
        40
    } else if snr >= 10.0 {
        (20.0 + (snr - 10.0) * 2.0) as i64
    } else {
        (snr * 2.0) as i64
    };

    score += if (0.1..=0.3).contains(&rms) {
        30
    } else if (0.05..0.1).contains(&rms) {
        20
    } else if rms > 0.3 && rms <= 0.5 {
        20
    } else {
        10
    };

    score += if (0.3..=0.8).contains(&peak) {
        20
    } else if (0.2..0.3).contains(&peak) {
        15
    } else if peak > 0.8 && peak < 0.95 {
        15
    } else {
        10
    };

    if is_clipping {
        score -= 20;
    }

    score.clamp(0, 100) as u32
}

fn round10(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round100(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1000(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
