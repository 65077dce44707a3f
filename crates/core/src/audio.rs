//! PCM audio helpers
//!
//! All internal processing works on `f32` samples normalized to [-1.0, 1.0].
//! The wire formats are `pcm_f32le` (internal canonical form) and `pcm_s16le`
//! (output canonical form).

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

/// Convert little-endian f32 PCM bytes to samples.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Convert samples to little-endian f32 PCM bytes.
pub fn samples_to_f32le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert little-endian s16 PCM bytes to normalized samples.
pub fn s16le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_NORMALIZE)
        .collect()
}

/// Convert normalized samples to little-endian s16 PCM bytes.
///
/// Samples are clamped to [-1.0, 1.0] before scaling.
pub fn samples_to_s16le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let pcm16 = (s.clamp(-1.0, 1.0) * PCM16_SCALE) as i16;
            pcm16.to_le_bytes()
        })
        .collect()
}

/// Downmix interleaved stereo to mono by averaging channel pairs.
pub fn stereo_to_mono(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .collect()
}

/// Duplicate a mono signal into interleaved stereo.
pub fn mono_to_stereo(samples: &[f32]) -> Vec<f32> {
    samples.iter().flat_map(|&s| [s, s]).collect()
}

/// Resample mono audio to a new rate.
///
/// Uses rubato's FFT resampler; very short buffers and resampler failures
/// fall back to linear interpolation.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    use rubato::{FftFixedIn, Resampler};

    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }

    if samples.len() < 64 {
        return resample_linear(samples, from_hz, to_hz);
    }

    let samples_f64: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let chunk_size = samples.len().min(1024);

    match FftFixedIn::<f64>::new(from_hz as usize, to_hz as usize, chunk_size, 2, 1) {
        Ok(mut resampler) => match resampler.process(&[samples_f64], None) {
            Ok(output) => output[0].iter().map(|&s| s as f32).collect(),
            Err(e) => {
                tracing::warn!("rubato processing failed, using linear fallback: {}", e);
                resample_linear(samples, from_hz, to_hz)
            }
        },
        Err(e) => {
            tracing::warn!("rubato init failed, using linear fallback: {}", e);
            resample_linear(samples, from_hz, to_hz)
        }
    }
}

/// Linear-interpolation resampling fallback.
pub fn resample_linear(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len() - 1);
        let frac = (src_idx - idx_floor as f64) as f32;
        out.push(samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac);
    }

    out
}

/// Duration of an interleaved sample buffer in milliseconds.
pub fn duration_ms(sample_count: usize, sample_rate_hz: u32, channels: u16) -> u64 {
    if sample_rate_hz == 0 || channels == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / (sample_rate_hz as u64 * channels as u64)
}

/// Generate s16le silence of the requested duration.
pub fn silence_s16le(duration_ms: u64, sample_rate_hz: u32, channels: u16) -> Vec<u8> {
    let samples = (duration_ms * sample_rate_hz as u64 * channels as u64) / 1000;
    vec![0u8; samples as usize * 2]
}

/// Scale samples so the peak magnitude equals `target_peak`.
///
/// Silent buffers are left untouched.
pub fn peak_normalize(samples: &mut [f32], target_peak: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak < 1e-10 {
        return;
    }
    let gain = target_peak / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32le_round_trip() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0];
        let bytes = samples_to_f32le(&samples);
        assert_eq!(bytes.len(), 16);
        assert_eq!(f32le_to_samples(&bytes), samples);
    }

    #[test]
    fn test_s16le_round_trip_signs() {
        let bytes: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0]; // +0.5, -0.5 (approx)
        let samples = s16le_to_samples(&bytes);
        assert_eq!(samples.len(), 2);
        assert!(samples[0] > 0.0);
        assert!(samples[1] < 0.0);
    }

    #[test]
    fn test_s16le_clamps_out_of_range() {
        let bytes = samples_to_s16le(&[2.0, -2.0]);
        let samples = s16le_to_samples(&bytes);
        assert!((samples[0] - 1.0).abs() < 0.001);
        assert!((samples[1] + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mono = stereo_to_mono(&[0.2, 0.4, -1.0, 1.0]);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        assert_eq!(mono_to_stereo(&[0.1, 0.2]), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = vec![0.0f32; 160]; // 10ms at 16kHz
        let resampled = resample(&samples, 16000, 8000);
        // FFT resampler may pad slightly; allow a small tolerance
        assert!((resampled.len() as i64 - 80).unsigned_abs() <= 8);
    }

    #[test]
    fn test_resample_linear_exact() {
        let samples = vec![0.0f32; 160];
        assert_eq!(resample_linear(&samples, 16000, 8000).len(), 80);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(16000, 16000, 1), 1000);
        assert_eq!(duration_ms(96000, 16000, 1), 6000);
        assert_eq!(duration_ms(32000, 16000, 2), 1000);
    }

    #[test]
    fn test_silence_s16le() {
        let silence = silence_s16le(6000, 16000, 1);
        assert_eq!(silence.len(), 16000 * 6 * 2);
        assert!(silence.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_peak_normalize() {
        let mut samples = vec![0.25, -0.5, 0.1];
        peak_normalize(&mut samples, 1.0);
        assert!((samples[1] + 1.0).abs() < 1e-6);
        assert!((samples[0] - 0.5).abs() < 1e-6);

        let mut silent = vec![0.0f32; 8];
        peak_normalize(&mut silent, 1.0);
        assert!(silent.iter().all(|&s| s == 0.0));
    }
}
