//! Audio preprocessing for ASR
//!
//! Canonicalizes arbitrary PCM input to the recognizer's expected form:
//! mono f32 at 16 kHz, high-pass filtered at 80 Hz, pre-emphasized and
//! peak-normalized.

use livedub_core::audio;
use livedub_core::fragment::AudioFormat;

use super::AsrError;

/// Target sample rate for recognition.
pub const ASR_SAMPLE_RATE_HZ: u32 = 16_000;

const HIGHPASS_CUTOFF_HZ: f32 = 80.0;
const PREEMPHASIS_COEFFICIENT: f32 = 0.97;

/// Preprocess raw PCM bytes for transcription.
///
/// 1. Bytes to f32 (s16 accepted)
/// 2. Stereo to mono
/// 3. Resample to 16 kHz
/// 4. High-pass Butterworth at 80 Hz, order 5, zero-phase
/// 5. Pre-emphasis `y[n] = x[n] - 0.97 * x[n-1]`
/// 6. Peak normalization to unity
pub fn preprocess_audio(
    bytes: &[u8],
    format: AudioFormat,
    sample_rate_hz: u32,
    channels: u16,
    apply_filters: bool,
) -> Result<Vec<f32>, AsrError> {
    if !(8_000..=48_000).contains(&sample_rate_hz) {
        return Err(AsrError::InvalidAudio(format!(
            "sample rate {sample_rate_hz} outside [8000, 48000]"
        )));
    }

    let mut samples = match format {
        AudioFormat::PcmF32le => audio::f32le_to_samples(bytes),
        AudioFormat::PcmS16le => audio::s16le_to_samples(bytes),
        other => {
            return Err(AsrError::InvalidAudio(format!(
                "format {} must be decoded to PCM before ASR",
                other.as_str()
            )))
        }
    };

    if samples.is_empty() {
        return Ok(samples);
    }

    if channels == 2 {
        samples = audio::stereo_to_mono(&samples);
    }

    if sample_rate_hz != ASR_SAMPLE_RATE_HZ {
        samples = audio::resample(&samples, sample_rate_hz, ASR_SAMPLE_RATE_HZ);
    }

    if apply_filters {
        highpass_butterworth(&mut samples, ASR_SAMPLE_RATE_HZ as f32, HIGHPASS_CUTOFF_HZ);
        pre_emphasis(&mut samples, PREEMPHASIS_COEFFICIENT);
    }

    audio::peak_normalize(&mut samples, 1.0);

    Ok(samples)
}

/// Pre-emphasis filter: `y[n] = x[n] - coefficient * x[n-1]`, `y[0] = x[0]`.
pub fn pre_emphasis(samples: &mut [f32], coefficient: f32) {
    let mut prev = samples.first().copied().unwrap_or(0.0);
    for (i, s) in samples.iter_mut().enumerate() {
        if i == 0 {
            continue;
        }
        let current = *s;
        *s = current - coefficient * prev;
        prev = current;
    }
}

/// Second-order IIR section in direct form I.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    /// RBJ cookbook high-pass section.
    fn highpass(sample_rate: f32, cutoff: f32, q: f32) -> Self {
        let omega = std::f32::consts::TAU * cutoff / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos_w) / (2.0 * a0),
            b1: -(1.0 + cos_w) / a0,
            b2: (1.0 + cos_w) / (2.0 * a0),
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn apply(&self, samples: &mut [f32]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for s in samples.iter_mut() {
            let x0 = *s;
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *s = y0;
        }
    }
}

/// First-order high-pass section (completes the odd filter order).
fn first_order_highpass(samples: &mut [f32], sample_rate: f32, cutoff: f32) {
    let k = (std::f32::consts::PI * cutoff / sample_rate).tan();
    let a = (1.0 - k) / (1.0 + k);
    let gain = (1.0 + a) / 2.0;

    let mut x1 = 0.0f32;
    let mut y1 = 0.0f32;
    for s in samples.iter_mut() {
        let x0 = *s;
        let y0 = gain * (x0 - x1) + a * y1;
        x1 = x0;
        y1 = y0;
        *s = y0;
    }
}

/// Order-5 Butterworth high-pass, applied forward and backward (zero phase).
///
/// The order-5 prototype factors into one first-order section and two
/// second-order sections with Q = 0.618034 and Q = 1.618034.
pub fn highpass_butterworth(samples: &mut [f32], sample_rate: f32, cutoff: f32) {
    const Q_SECTIONS: [f32; 2] = [0.618034, 1.618034];

    let run = |samples: &mut [f32]| {
        first_order_highpass(samples, sample_rate, cutoff);
        for q in Q_SECTIONS {
            Biquad::highpass(sample_rate, cutoff, q).apply(samples);
        }
    };

    run(samples);
    samples.reverse();
    run(samples);
    samples.reverse();
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedub_core::audio::{samples_to_f32le, samples_to_s16le};

    fn tone(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (i as f32 * freq * std::f32::consts::TAU / rate as f32).sin() * 0.5)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_preprocess_f32_passthrough_shape() {
        let samples = tone(440.0, 16_000, 1.0);
        let out = preprocess_audio(
            &samples_to_f32le(&samples),
            AudioFormat::PcmF32le,
            16_000,
            1,
            true,
        )
        .unwrap();
        assert_eq!(out.len(), samples.len());
        // Normalized to unity peak
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_preprocess_accepts_s16() {
        let samples = tone(440.0, 16_000, 0.5);
        let out = preprocess_audio(
            &samples_to_s16le(&samples),
            AudioFormat::PcmS16le,
            16_000,
            1,
            false,
        )
        .unwrap();
        assert_eq!(out.len(), samples.len());
    }

    #[test]
    fn test_preprocess_downmixes_stereo() {
        let mono = tone(440.0, 16_000, 0.25);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let out = preprocess_audio(
            &samples_to_f32le(&stereo),
            AudioFormat::PcmF32le,
            16_000,
            2,
            false,
        )
        .unwrap();
        assert_eq!(out.len(), mono.len());
    }

    #[test]
    fn test_preprocess_resamples_to_16k() {
        let samples = tone(440.0, 48_000, 1.0);
        let out = preprocess_audio(
            &samples_to_f32le(&samples),
            AudioFormat::PcmF32le,
            48_000,
            1,
            false,
        )
        .unwrap();
        let expected = 16_000usize;
        assert!((out.len() as i64 - expected as i64).unsigned_abs() < 256);
    }

    #[test]
    fn test_preprocess_rejects_container_formats() {
        let err = preprocess_audio(&[0u8; 16], AudioFormat::Aac, 16_000, 1, true).unwrap_err();
        assert!(matches!(err, AsrError::InvalidAudio(_)));
    }

    #[test]
    fn test_preprocess_rejects_bad_rate() {
        let err = preprocess_audio(&[0u8; 16], AudioFormat::PcmF32le, 96_000, 1, true).unwrap_err();
        assert!(matches!(err, AsrError::InvalidAudio(_)));
    }

    #[test]
    fn test_highpass_attenuates_rumble_keeps_speech() {
        // 30 Hz rumble should be strongly attenuated, 300 Hz mostly kept.
        let mut low = tone(30.0, 16_000, 1.0);
        let low_before = rms(&low);
        highpass_butterworth(&mut low, 16_000.0, 80.0);
        assert!(rms(&low) < low_before * 0.1);

        let mut mid = tone(300.0, 16_000, 1.0);
        let mid_before = rms(&mid);
        highpass_butterworth(&mut mid, 16_000.0, 80.0);
        assert!(rms(&mid) > mid_before * 0.8);
    }

    #[test]
    fn test_pre_emphasis_formula() {
        let mut samples = vec![1.0f32, 1.0, 1.0];
        pre_emphasis(&mut samples, 0.97);
        assert_eq!(samples[0], 1.0);
        assert!((samples[1] - 0.03).abs() < 1e-6);
        assert!((samples[2] - 0.03).abs() < 1e-6);
    }

    #[test]
    fn test_empty_input_is_ok() {
        let out = preprocess_audio(&[], AudioFormat::PcmF32le, 16_000, 1, true).unwrap();
        assert!(out.is_empty());
    }
}
