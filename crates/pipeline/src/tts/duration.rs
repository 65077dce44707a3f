//! Duration matching for synthesized audio
//!
//! Aligns raw synthesis duration to the original fragment duration by
//! pitch-preserving time-stretch. The primary method shells out to the
//! `rubberband` CLI over temp WAV files; when unavailable, a
//! linear-interpolation resample is used (this shifts pitch and is only a
//! fallback).

use std::process::Command;

use once_cell::sync::Lazy;

use livedub_core::audio;

use super::TtsError;

/// Below this deviation from 1.0 the stretch is skipped entirely.
pub const STRETCH_SKIP_EPSILON: f64 = 0.01;

static RUBBERBAND_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    match Command::new("rubberband").arg("--version").output() {
        Ok(output) => output.status.success(),
        Err(_) => {
            tracing::warn!("rubberband not found, time-stretch will use resampling fallback");
            false
        }
    }
});

/// Result of the full alignment pass.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub samples: Vec<f32>,
    pub final_duration_ms: u64,
    pub speed_factor_applied: f64,
    pub speed_factor_clamped: bool,
    pub was_stretched: bool,
    pub used_fallback: bool,
}

/// Speed factor needed to match the target: `raw / target`.
///
/// Values above 1.0 speed the audio up, below 1.0 slow it down.
pub fn calculate_speed_factor(raw_duration_ms: u64, target_duration_ms: u64) -> Result<f64, TtsError> {
    if target_duration_ms == 0 {
        return Err(TtsError::InvalidInput("target duration is zero".into()));
    }
    if raw_duration_ms == 0 {
        return Err(TtsError::InvalidInput("raw duration is zero".into()));
    }
    Ok(raw_duration_ms as f64 / target_duration_ms as f64)
}

/// Clamp the speed factor to prevent audible artifacts.
///
/// Returns `(clamped, was_clamped)`. With `only_speed_up` the floor is
/// raised to 1.0 so audio is never slowed down.
pub fn apply_clamping(
    speed_factor: f64,
    clamp_min: f64,
    clamp_max: f64,
    only_speed_up: bool,
) -> (f64, bool) {
    let effective_min = if only_speed_up {
        clamp_min.max(1.0)
    } else {
        clamp_min
    };

    if speed_factor < effective_min {
        (effective_min, true)
    } else if speed_factor > clamp_max {
        (clamp_max, true)
    } else {
        (speed_factor, false)
    }
}

/// Time-stretch audio by the given factor.
///
/// Returns `(samples, was_stretched, used_fallback)`.
pub fn time_stretch(
    samples: &[f32],
    sample_rate_hz: u32,
    speed_factor: f64,
) -> (Vec<f32>, bool, bool) {
    if (speed_factor - 1.0).abs() < STRETCH_SKIP_EPSILON || samples.is_empty() {
        return (samples.to_vec(), false, false);
    }

    if *RUBBERBAND_AVAILABLE {
        match stretch_rubberband(samples, sample_rate_hz, speed_factor) {
            Ok(stretched) => return (stretched, true, false),
            Err(e) => {
                tracing::warn!(error = %e, "rubberband time-stretch failed, using fallback");
            }
        }
    }

    (stretch_resample(samples, speed_factor), true, true)
}

/// Pitch-preserving stretch via the rubberband CLI.
fn stretch_rubberband(
    samples: &[f32],
    sample_rate_hz: u32,
    speed_factor: f64,
) -> Result<Vec<f32>, TtsError> {
    let dir = tempfile::tempdir()
        .map_err(|e| TtsError::Alignment(format!("tempdir failed: {e}")))?;
    let input_path = dir.path().join("input.wav");
    let output_path = dir.path().join("stretched.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&input_path, spec)
        .map_err(|e| TtsError::Alignment(format!("wav write failed: {e}")))?;
    for &s in samples {
        writer
            .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .map_err(|e| TtsError::Alignment(format!("wav write failed: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| TtsError::Alignment(format!("wav finalize failed: {e}")))?;

    // -T is the tempo multiplier: >1 speeds up, <1 slows down
    let output = Command::new("rubberband")
        .arg("-T")
        .arg(speed_factor.to_string())
        .arg("-q")
        .arg(&input_path)
        .arg(&output_path)
        .output()
        .map_err(|e| TtsError::Alignment(format!("rubberband spawn failed: {e}")))?;

    if !output.status.success() {
        return Err(TtsError::Alignment(format!(
            "rubberband exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let mut reader = hound::WavReader::open(&output_path)
        .map_err(|e| TtsError::Alignment(format!("wav read failed: {e}")))?;
    let channels = reader.spec().channels as usize;
    let stretched: Vec<f32> = reader
        .samples::<i16>()
        .step_by(channels)
        .map(|s| s.map(|v| v as f32 / 32767.0))
        .collect::<Result<_, _>>()
        .map_err(|e| TtsError::Alignment(format!("wav decode failed: {e}")))?;

    Ok(stretched)
}

/// Linear-interpolation stretch: changes pitch, used only as a fallback.
fn stretch_resample(samples: &[f32], speed_factor: f64) -> Vec<f32> {
    let new_len = (samples.len() as f64 / speed_factor) as usize;
    if new_len == 0 {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src = i as f64 * speed_factor;
        let idx = src as usize;
        let frac = (src - idx as f64) as f32;
        if idx >= samples.len() - 1 {
            out.push(*samples.last().expect("non-empty samples"));
        } else {
            out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
        }
    }
    out
}

/// Full alignment: stretch toward the target, then resample and remap
/// channels to the session's output format.
#[allow(clippy::too_many_arguments)]
pub fn align_to_duration(
    samples: Vec<f32>,
    input_sample_rate_hz: u32,
    target_duration_ms: u64,
    output_sample_rate_hz: u32,
    output_channels: u16,
    clamp_min: f64,
    clamp_max: f64,
    only_speed_up: bool,
) -> Result<AlignmentResult, TtsError> {
    let raw_duration_ms = audio::duration_ms(samples.len(), input_sample_rate_hz, 1);

    let speed_factor = calculate_speed_factor(raw_duration_ms.max(1), target_duration_ms)?;
    let (clamped_factor, was_clamped) =
        apply_clamping(speed_factor, clamp_min, clamp_max, only_speed_up);

    let (stretched, was_stretched, used_fallback) =
        time_stretch(&samples, input_sample_rate_hz, clamped_factor);

    let resampled = if input_sample_rate_hz != output_sample_rate_hz {
        audio::resample(&stretched, input_sample_rate_hz, output_sample_rate_hz)
    } else {
        stretched
    };

    let aligned = if output_channels == 2 {
        audio::mono_to_stereo(&resampled)
    } else {
        resampled
    };

    let final_duration_ms = audio::duration_ms(aligned.len(), output_sample_rate_hz, output_channels);

    Ok(AlignmentResult {
        samples: aligned,
        final_duration_ms,
        speed_factor_applied: clamped_factor,
        speed_factor_clamped: was_clamped,
        was_stretched,
        used_fallback,
    })
}
