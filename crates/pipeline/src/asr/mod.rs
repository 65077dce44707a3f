//! ASR component
//!
//! Wraps an interchangeable [`AsrEngine`] with deterministic preprocessing,
//! utterance shaping and absolute-time stamping. The component never panics
//! or returns `Err`; failures are encoded in the returned asset's status.

mod mock;
mod preprocess;
mod prompts;
mod shaping;

pub use mock::{FixtureAsrEngine, MockAsrConfig, MockAsrEngine, MockAsrFailure};
pub use preprocess::preprocess_audio;
pub use prompts::domain_prompt;
pub use shaping::{shape_utterances, UtteranceShapingConfig};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use livedub_core::asset::{AssetError, AssetStatus, TranscriptAsset, TranscriptSegment, WordTiming};
use livedub_core::fragment::AudioFormat;

/// ASR error taxonomy. Retryable: Timeout, Memory, Unknown.
#[derive(Debug, Clone, Error)]
pub enum AsrError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("out of memory: {0}")]
    Memory(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("transcription timed out: {0}")]
    Timeout(String),
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("unknown ASR error: {0}")]
    Unknown(String),
}

impl AsrError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AsrError::Timeout(_) | AsrError::Memory(_) | AsrError::Unknown(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            AsrError::ModelLoad(_) => "MODEL_LOAD",
            AsrError::Memory(_) => "MEMORY",
            AsrError::InvalidAudio(_) => "INVALID_AUDIO",
            AsrError::Timeout(_) => "TIMEOUT",
            AsrError::Preprocessing(_) => "PREPROCESSING",
            AsrError::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Voice activity detection settings passed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub threshold: f32,
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
    pub speech_pad_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_silence_ms: 500,
            min_speech_ms: 250,
            speech_pad_ms: 100,
        }
    }
}

/// Whisper-family inference parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrInferenceConfig {
    pub beam_size: u32,
    pub best_of: u32,
    pub temperatures: Vec<f32>,
    pub no_speech_threshold: f32,
    pub compression_ratio_threshold: f32,
    pub log_prob_threshold: f32,
    pub word_timestamps: bool,
    pub vad: VadConfig,
}

impl Default for AsrInferenceConfig {
    fn default() -> Self {
        Self {
            beam_size: 8,
            best_of: 8,
            temperatures: vec![0.0, 0.2, 0.4],
            no_speech_threshold: 0.6,
            compression_ratio_threshold: 2.4,
            log_prob_threshold: -1.0,
            word_timestamps: false,
            vad: VadConfig::default(),
        }
    }
}

/// ASR component configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    pub inference: AsrInferenceConfig,
    pub shaping: UtteranceShapingConfig,
    pub apply_filters: bool,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            inference: AsrInferenceConfig::default(),
            shaping: UtteranceShapingConfig::default(),
            apply_filters: true,
        }
    }
}

/// Owned parameters handed to the engine for one inference call.
#[derive(Debug, Clone)]
pub struct InferenceParams {
    pub language: String,
    pub initial_prompt: String,
    pub config: AsrInferenceConfig,
}

/// Word emitted by the engine, in seconds relative to the fragment start.
#[derive(Debug, Clone)]
pub struct RawWord {
    pub word: String,
    pub start_s: f32,
    pub end_s: f32,
    pub probability: Option<f32>,
}

/// Segment emitted by the engine, in seconds relative to the fragment start.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub start_s: f32,
    pub end_s: f32,
    pub text: String,
    pub avg_logprob: f32,
    pub words: Option<Vec<RawWord>>,
}

/// Interchangeable speech recognition engine.
///
/// Implementations run synchronously; the component offloads calls with
/// `spawn_blocking`. An empty segment list is the non-error outcome for
/// silence.
pub trait AsrEngine: Send + Sync + 'static {
    fn engine_name(&self) -> &str;
    fn is_ready(&self) -> bool;
    fn transcribe(
        &self,
        samples: &[f32],
        params: &InferenceParams,
    ) -> Result<Vec<RawSegment>, AsrError>;
}

/// One transcription request.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    /// Raw PCM bytes, little-endian. f32 preferred, s16 accepted.
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    pub stream_id: String,
    pub fragment_id: Uuid,
    pub sequence_number: u64,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub domain: String,
    pub language: String,
}

/// ASR component: preprocess -> infer -> shape -> stamp.
pub struct AsrComponent {
    engine: Arc<dyn AsrEngine>,
    config: AsrConfig,
}

impl AsrComponent {
    pub fn new(engine: Arc<dyn AsrEngine>, config: AsrConfig) -> Self {
        Self { engine, config }
    }

    pub fn component_name(&self) -> &'static str {
        "asr"
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Transcribe one fragment. Failures are reported through the asset.
    pub async fn transcribe(&self, req: TranscribeRequest) -> TranscriptAsset {
        let start = Instant::now();

        let samples = match preprocess_audio(
            &req.audio,
            req.format,
            req.sample_rate_hz,
            req.channels,
            self.config.apply_filters,
        ) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(
                    stream_id = %req.stream_id,
                    sequence = req.sequence_number,
                    error = %e,
                    "ASR preprocessing failed"
                );
                return self.failed_asset(&req, &e, start.elapsed().as_millis() as u64);
            }
        };

        let params = InferenceParams {
            language: req.language.clone(),
            initial_prompt: domain_prompt(&req.domain).to_string(),
            config: self.config.inference.clone(),
        };

        let engine = self.engine.clone();
        let raw = tokio::task::spawn_blocking(move || engine.transcribe(&samples, &params)).await;

        let raw = match raw {
            Ok(Ok(segments)) => segments,
            Ok(Err(e)) => {
                return self.failed_asset(&req, &e, start.elapsed().as_millis() as u64);
            }
            Err(e) => {
                let e = AsrError::Unknown(format!("inference task failed: {e}"));
                return self.failed_asset(&req, &e, start.elapsed().as_millis() as u64);
            }
        };

        let mut warnings = 0usize;
        let segments: Vec<TranscriptSegment> = raw
            .into_iter()
            .map(|seg| self.to_absolute(seg, &req, &mut warnings))
            .collect();

        let segments = shape_utterances(segments, &self.config.shaping);

        let total_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        let confidence = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32
        };

        // Silence is a Success with no segments; warnings downgrade to Partial.
        let status = if !segments.is_empty() && warnings > 0 {
            AssetStatus::Partial
        } else {
            AssetStatus::Success
        };

        TranscriptAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: req.fragment_id,
            stream_id: req.stream_id,
            status,
            segments,
            total_text,
            language: req.language,
            confidence,
            parent_asset_ids: Vec::new(),
            latency_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
            error: None,
        }
    }

    /// Convert a raw engine segment to absolute stream time.
    ///
    /// All times are clamped into [start_time_ms, end_time_ms] with
    /// end >= start + 1.
    fn to_absolute(
        &self,
        seg: RawSegment,
        req: &TranscribeRequest,
        warnings: &mut usize,
    ) -> TranscriptSegment {
        let clamp_ms = |rel_s: f32| -> u64 {
            let abs = req.start_time_ms as i64 + (rel_s.max(0.0) * 1000.0) as i64;
            (abs.max(req.start_time_ms as i64) as u64).min(req.end_time_ms)
        };

        let start_time_ms = clamp_ms(seg.start_s);
        let mut end_time_ms = clamp_ms(seg.end_s);
        if end_time_ms <= start_time_ms {
            end_time_ms = start_time_ms + 1;
            *warnings += 1;
        }

        let words = seg.words.map(|words| {
            words
                .into_iter()
                .map(|w| {
                    let ws = clamp_ms(w.start_s);
                    let we = clamp_ms(w.end_s).max(ws + 1);
                    WordTiming {
                        word: w.word,
                        start_time_ms: ws,
                        end_time_ms: we,
                        confidence: w.probability,
                    }
                })
                .collect()
        });

        TranscriptSegment {
            start_time_ms,
            end_time_ms,
            text: seg.text.trim().to_string(),
            confidence: segment_confidence(seg.avg_logprob),
            words,
        }
    }

    fn failed_asset(&self, req: &TranscribeRequest, error: &AsrError, latency_ms: u64) -> TranscriptAsset {
        TranscriptAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: req.fragment_id,
            stream_id: req.stream_id.clone(),
            status: AssetStatus::Failed,
            segments: Vec::new(),
            total_text: String::new(),
            language: req.language.clone(),
            confidence: 0.0,
            parent_asset_ids: Vec::new(),
            latency_ms,
            created_at: Utc::now(),
            error: Some(AssetError {
                code: error.code().to_string(),
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
        }
    }
}

/// Segment confidence from the average log probability.
pub fn segment_confidence(avg_logprob: f32) -> f32 {
    (avg_logprob + 1.0).clamp(0.0, 1.0)
}
