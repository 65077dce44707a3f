//! TTS component
//!
//! Wraps an interchangeable [`TtsEngine`] with voice selection, duration
//! matching and output format canonicalization (pcm_s16le at the session
//! rate).

mod duration;
mod mock;
mod voice;

pub use duration::{
    align_to_duration, apply_clamping, calculate_speed_factor, time_stretch, AlignmentResult,
};
pub use mock::{MockTtsConfig, MockTtsEngine};
pub use voice::{
    select_voice, validate_voice_sample, SelectedVoice, VoiceProfile, VoiceSampleInfo,
    VoiceSelection,
};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use livedub_core::asset::{
    AssetError, AssetStatus, AudioAsset, DurationMatchMetadata, TranslationAsset,
};
use livedub_core::audio;
use livedub_core::fragment::AudioFormat;

/// TTS error taxonomy. Retryable: ModelLoad, Alignment, Timeout, Unknown.
#[derive(Debug, Clone, Error)]
pub enum TtsError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("alignment failed: {0}")]
    Alignment(String),
    #[error("synthesis timed out: {0}")]
    Timeout(String),
    #[error("unknown TTS error: {0}")]
    Unknown(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid voice sample: {0}")]
    VoiceSampleInvalid(String),
}

impl TtsError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TtsError::ModelLoad(_)
                | TtsError::Alignment(_)
                | TtsError::Timeout(_)
                | TtsError::Unknown(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            TtsError::ModelLoad(_) => "MODEL_LOAD_FAILED",
            TtsError::Alignment(_) => "ALIGNMENT_FAILED",
            TtsError::Timeout(_) => "TIMEOUT",
            TtsError::Unknown(_) => "UNKNOWN",
            TtsError::Synthesis(_) => "SYNTHESIS_FAILED",
            TtsError::InvalidInput(_) => "INVALID_INPUT",
            TtsError::VoiceSampleInvalid(_) => "VOICE_SAMPLE_INVALID",
        }
    }
}

/// Component configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub output_sample_rate_hz: u32,
    pub output_channels: u16,
    /// Variance above this fails the synthesis outright.
    pub fail_variance_percent: f64,
    /// Variance above this (up to the failure bound) downgrades to Partial.
    pub partial_variance_percent: f64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            output_sample_rate_hz: 16_000,
            output_channels: 1,
            fail_variance_percent: 20.0,
            partial_variance_percent: 10.0,
        }
    }
}

/// Raw synthesis output from an engine: mono f32 at the engine's rate.
#[derive(Debug, Clone)]
pub struct RawSynthesis {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

/// Interchangeable synthesis engine.
pub trait TtsEngine: Send + Sync + 'static {
    fn engine_name(&self) -> &str;
    fn is_ready(&self) -> bool;
    fn synthesize(&self, text: &str, voice: &SelectedVoice) -> Result<RawSynthesis, TtsError>;
}

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesizeRequest {
    pub text_asset: TranslationAsset,
    pub target_duration_ms: Option<u64>,
    pub output_sample_rate_hz: u32,
    pub output_channels: u16,
    pub voice_profile: Option<VoiceProfile>,
}

/// TTS component: select voice -> synthesize -> duration-match -> encode.
pub struct TtsComponent {
    engine: Arc<dyn TtsEngine>,
    config: TtsConfig,
}

impl TtsComponent {
    pub fn new(engine: Arc<dyn TtsEngine>, config: TtsConfig) -> Self {
        Self { engine, config }
    }

    pub fn component_name(&self) -> &'static str {
        "tts"
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Synthesize dubbed audio for one translation. Failures are reported
    /// through the asset.
    pub async fn synthesize(&self, req: SynthesizeRequest) -> AudioAsset {
        let start = Instant::now();
        let text = req.text_asset.translated_text.trim().to_string();

        // Empty text yields silence spanning the target duration; the
        // fragment still gets audio so A/V pairing never starves.
        if text.is_empty() {
            let duration_ms = req.target_duration_ms.unwrap_or(0);
            let silence = audio::silence_s16le(
                duration_ms,
                req.output_sample_rate_hz,
                req.output_channels,
            );
            return self.asset_from_parts(
                &req,
                AssetStatus::Success,
                silence,
                duration_ms,
                req.target_duration_ms.map(|target| DurationMatchMetadata {
                    original_duration_ms: target,
                    raw_duration_ms: duration_ms,
                    final_duration_ms: duration_ms,
                    duration_variance_percent: 0.0,
                    speed_ratio: 1.0,
                    speed_clamped: false,
                }),
                None,
                start,
            );
        }

        let profile = req.voice_profile.clone().unwrap_or_else(|| VoiceProfile {
            language: req.text_asset.target_language.clone(),
            ..Default::default()
        });

        let voice = match select_voice(&profile) {
            Ok(voice) => voice,
            Err(e) => return self.failed_asset(&req, &e, start),
        };

        let engine = self.engine.clone();
        let synth_text = text.clone();
        let raw = tokio::task::spawn_blocking(move || engine.synthesize(&synth_text, &voice)).await;

        let raw = match raw {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.failed_asset(&req, &e, start),
            Err(e) => {
                let e = TtsError::Unknown(format!("synthesis task failed: {e}"));
                return self.failed_asset(&req, &e, start);
            }
        };

        let raw_duration_ms = audio::duration_ms(raw.samples.len(), raw.sample_rate_hz, 1);

        let (aligned, metadata) = match req.target_duration_ms {
            Some(target_ms) => {
                let result = match align_to_duration(
                    raw.samples,
                    raw.sample_rate_hz,
                    target_ms,
                    req.output_sample_rate_hz,
                    req.output_channels,
                    profile.speed_clamp_min,
                    profile.speed_clamp_max,
                    profile.only_speed_up,
                ) {
                    Ok(result) => result,
                    Err(e) => return self.failed_asset(&req, &e, start),
                };

                let variance = if target_ms > 0 {
                    (result.final_duration_ms as f64 - target_ms as f64).abs() / target_ms as f64
                        * 100.0
                } else {
                    0.0
                };

                let metadata = DurationMatchMetadata {
                    original_duration_ms: target_ms,
                    raw_duration_ms,
                    final_duration_ms: result.final_duration_ms,
                    duration_variance_percent: variance,
                    speed_ratio: result.speed_factor_applied,
                    speed_clamped: result.speed_factor_clamped,
                };
                (result, Some(metadata))
            }
            None => {
                // No target: just canonicalize the output format.
                let resampled = if raw.sample_rate_hz != req.output_sample_rate_hz {
                    audio::resample(&raw.samples, raw.sample_rate_hz, req.output_sample_rate_hz)
                } else {
                    raw.samples
                };
                let samples = if req.output_channels == 2 {
                    audio::mono_to_stereo(&resampled)
                } else {
                    resampled
                };
                let final_ms = audio::duration_ms(
                    samples.len(),
                    req.output_sample_rate_hz,
                    req.output_channels,
                );
                (
                    AlignmentResult {
                        samples,
                        final_duration_ms: final_ms,
                        speed_factor_applied: 1.0,
                        speed_factor_clamped: false,
                        was_stretched: false,
                        used_fallback: false,
                    },
                    None,
                )
            }
        };

        // Status rules over variance and clamping.
        let status = match &metadata {
            Some(m) if m.duration_variance_percent > self.config.fail_variance_percent => {
                let e = TtsError::Alignment(format!(
                    "duration variance {:.1}% exceeds {:.0}% threshold",
                    m.duration_variance_percent, self.config.fail_variance_percent
                ));
                return self.failed_asset(&req, &e, start);
            }
            Some(m)
                if m.speed_clamped
                    || m.duration_variance_percent > self.config.partial_variance_percent =>
            {
                AssetStatus::Partial
            }
            _ => AssetStatus::Success,
        };

        let pcm = audio::samples_to_s16le(&aligned.samples);
        self.asset_from_parts(
            &req,
            status,
            pcm,
            aligned.final_duration_ms,
            metadata,
            None,
            start,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn asset_from_parts(
        &self,
        req: &SynthesizeRequest,
        status: AssetStatus,
        audio: Vec<u8>,
        duration_ms: u64,
        metadata: Option<DurationMatchMetadata>,
        error: Option<AssetError>,
        start: Instant,
    ) -> AudioAsset {
        AudioAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: req.text_asset.fragment_id,
            stream_id: req.text_asset.stream_id.clone(),
            status,
            audio,
            format: AudioFormat::PcmS16le,
            sample_rate_hz: req.output_sample_rate_hz,
            channels: req.output_channels,
            duration_ms,
            duration_metadata: metadata,
            parent_asset_ids: vec![req.text_asset.asset_id],
            latency_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
            error,
        }
    }

    fn failed_asset(&self, req: &SynthesizeRequest, error: &TtsError, start: Instant) -> AudioAsset {
        tracing::warn!(
            stream_id = %req.text_asset.stream_id,
            fragment_id = %req.text_asset.fragment_id,
            error = %error,
            "TTS synthesis failed"
        );
        self.asset_from_parts(
            req,
            AssetStatus::Failed,
            Vec::new(),
            0,
            None,
            Some(AssetError {
                code: error.code().to_string(),
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
            start,
        )
    }
}
