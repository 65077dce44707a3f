//! Per-fragment pipeline coordinator
//!
//! Runs ASR -> Translation -> TTS strictly in order with short-circuit on
//! failure, explicit asset lineage and per-stage timing. A failed stage
//! still yields a `FragmentResult` so the fragment is emitted (in order)
//! and the consumer can substitute audio.

use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};

use livedub_core::error::{ErrorCode, ErrorStage};
use livedub_core::events::StreamConfig;
use livedub_core::fragment::{
    AudioFormat, AudioPayload, DurationMetadata, FragmentEnvelope, FragmentResult,
    ProcessingError, ProcessingStatus, StageTimings,
};

use crate::artifacts::ArtifactLogger;
use crate::asr::{AsrComponent, TranscribeRequest};
use crate::translation::{
    NormalizationPolicy, SpeakerPolicy, TranslateRequest, TranslationComponent,
};
use crate::tts::{SynthesizeRequest, TtsComponent, VoiceProfile};

/// Coordinator configuration.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub speaker_policy: SpeakerPolicy,
    pub normalization_policy: NormalizationPolicy,
    pub voice_profile: Option<VoiceProfile>,
}

/// Orchestrates the three stages for one fragment.
pub struct PipelineCoordinator {
    asr: AsrComponent,
    translation: TranslationComponent,
    tts: TtsComponent,
    artifacts: Option<Arc<ArtifactLogger>>,
    config: CoordinatorConfig,
}

impl PipelineCoordinator {
    pub fn new(
        asr: AsrComponent,
        translation: TranslationComponent,
        tts: TtsComponent,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            asr,
            translation,
            tts,
            artifacts: None,
            config,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<ArtifactLogger>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Readiness of every stage component.
    pub fn is_ready(&self) -> bool {
        self.asr.is_ready() && self.translation.is_ready() && self.tts.is_ready()
    }

    pub fn component_readiness(&self) -> [(&'static str, bool); 3] {
        [
            ("asr", self.asr.is_ready()),
            ("translation", self.translation.is_ready()),
            ("tts", self.tts.is_ready()),
        ]
    }

    /// Process one fragment through the full pipeline.
    pub async fn process_fragment(
        &self,
        fragment: &FragmentEnvelope,
        session: &StreamConfig,
    ) -> FragmentResult {
        let start = Instant::now();
        let mut timings = StageTimings::default();

        tracing::info!(
            stream_id = %fragment.stream_id,
            fragment_id = %fragment.fragment_id,
            sequence = fragment.sequence_number,
            "fragment processing started"
        );

        // Step 1: decode payload and canonicalize to pcm_f32le
        let audio_bytes = match fragment.audio.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                return self.failed_result(
                    fragment,
                    ErrorStage::Asr,
                    ErrorCode::InvalidAudioFormat,
                    e.to_string(),
                    false,
                    timings,
                    start,
                    None,
                    None,
                );
            }
        };

        let (pcm, pcm_rate, pcm_channels) = match self
            .to_pcm_f32le(
                audio_bytes,
                fragment.audio.format,
                fragment.audio.sample_rate_hz,
                fragment.audio.channels,
            )
            .await
        {
            Ok(pcm) => pcm,
            Err(message) => {
                return self.failed_result(
                    fragment,
                    ErrorStage::Asr,
                    ErrorCode::InvalidAudioFormat,
                    message,
                    false,
                    timings,
                    start,
                    None,
                    None,
                );
            }
        };

        // Step 2: ASR
        let asr_start = Instant::now();
        let transcript_asset = self
            .asr
            .transcribe(TranscribeRequest {
                audio: pcm,
                format: AudioFormat::PcmF32le,
                stream_id: fragment.stream_id.clone(),
                fragment_id: fragment.fragment_id,
                sequence_number: fragment.sequence_number,
                start_time_ms: 0,
                end_time_ms: fragment.audio.duration_ms,
                sample_rate_hz: pcm_rate,
                channels: pcm_channels,
                domain: session.primary_domain().to_string(),
                language: session.source_language.clone(),
            })
            .await;
        timings.asr_ms = asr_start.elapsed().as_millis() as u64;
        histogram!("sts_asr_duration_seconds").record(timings.asr_ms as f64 / 1000.0);

        if transcript_asset.status.is_failed() {
            let (code, message) = match &transcript_asset.error {
                Some(e) if e.code == "TIMEOUT" => (ErrorCode::Timeout, e.message.clone()),
                Some(e) => (ErrorCode::AsrFailed, e.message.clone()),
                None => (ErrorCode::AsrFailed, "ASR processing failed".to_string()),
            };
            return self.failed_result(
                fragment,
                ErrorStage::Asr,
                code,
                message,
                true,
                timings,
                start,
                None,
                None,
            );
        }

        // Step 3: transcript text (empty is allowed and flows through)
        let transcript = transcript_asset.text();

        if let Some(artifacts) = &self.artifacts {
            artifacts.log_transcript(&transcript_asset);
        }

        // Step 4: Translation
        let translation_start = Instant::now();
        let translation_asset = self
            .translation
            .translate(TranslateRequest {
                source_text: transcript.clone(),
                stream_id: fragment.stream_id.clone(),
                fragment_id: fragment.fragment_id,
                sequence_number: fragment.sequence_number,
                source_language: session.source_language.clone(),
                target_language: session.target_language.clone(),
                parent_asset_ids: vec![transcript_asset.asset_id],
                speaker_policy: self.config.speaker_policy.clone(),
                normalization_policy: self.config.normalization_policy,
            })
            .await;
        timings.translation_ms = translation_start.elapsed().as_millis() as u64;
        histogram!("sts_translation_duration_seconds")
            .record(timings.translation_ms as f64 / 1000.0);

        if translation_asset.status.is_failed() {
            let (code, message) = match &translation_asset.error {
                Some(e) if e.message.to_lowercase().contains("rate limit") => {
                    (ErrorCode::RateLimitExceeded, e.message.clone())
                }
                Some(e) => (ErrorCode::TranslationFailed, e.message.clone()),
                None => (
                    ErrorCode::TranslationFailed,
                    "translation failed".to_string(),
                ),
            };
            return self.failed_result(
                fragment,
                ErrorStage::Translation,
                code,
                message,
                true,
                timings,
                start,
                Some(transcript),
                None,
            );
        }

        let translated_text = translation_asset.translated_text.clone();

        if let Some(artifacts) = &self.artifacts {
            artifacts.log_translation(&translation_asset);
        }

        // Step 5: TTS with duration matching toward the original audio
        let tts_start = Instant::now();
        let translation_status = translation_asset.status;
        let transcript_status = transcript_asset.status;
        let audio_asset = self
            .tts
            .synthesize(SynthesizeRequest {
                text_asset: translation_asset,
                target_duration_ms: Some(fragment.audio.duration_ms),
                output_sample_rate_hz: session.sample_rate_hz,
                output_channels: session.channels,
                voice_profile: self.config.voice_profile.clone(),
            })
            .await;
        timings.tts_ms = tts_start.elapsed().as_millis() as u64;
        histogram!("sts_tts_duration_seconds").record(timings.tts_ms as f64 / 1000.0);

        if audio_asset.status.is_failed() {
            let (code, message) = match &audio_asset.error {
                Some(e) if e.code == "ALIGNMENT_FAILED" => {
                    (ErrorCode::DurationMismatchExceeded, e.message.clone())
                }
                Some(e) => (ErrorCode::TtsSynthesisFailed, e.message.clone()),
                None => (ErrorCode::TtsSynthesisFailed, "TTS failed".to_string()),
            };
            return self.failed_result(
                fragment,
                ErrorStage::Tts,
                code,
                message,
                false,
                timings,
                start,
                Some(transcript),
                Some(translated_text),
            );
        }

        // Step 6: Partial downgrade when any stage was partial
        let status = if transcript_status.is_partial()
            || translation_status.is_partial()
            || audio_asset.status.is_partial()
        {
            ProcessingStatus::Partial
        } else {
            ProcessingStatus::Success
        };

        let duration_metadata = audio_asset.duration_metadata.map(|m| DurationMetadata {
            original_duration_ms: m.original_duration_ms,
            dubbed_duration_ms: m.final_duration_ms,
            duration_variance_percent: m.duration_variance_percent,
            speed_ratio: m.speed_ratio,
        });

        if let Some(artifacts) = &self.artifacts {
            artifacts.log_dubbed_audio(&audio_asset);
            artifacts.log_metadata(
                &fragment.stream_id,
                fragment.fragment_id,
                &serde_json::json!({
                    "transcript": transcript,
                    "translated_text": translated_text,
                    "stage_timings": timings,
                    "duration_metadata": duration_metadata,
                }),
            );
        }

        // Step 7: encode and assemble
        let dubbed_audio = AudioPayload::from_bytes(
            AudioFormat::PcmS16le,
            audio_asset.sample_rate_hz,
            audio_asset.channels,
            audio_asset.duration_ms,
            &audio_asset.audio,
        );

        let processing_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            stream_id = %fragment.stream_id,
            fragment_id = %fragment.fragment_id,
            status = ?status,
            total_ms = processing_time_ms,
            asr_ms = timings.asr_ms,
            translation_ms = timings.translation_ms,
            tts_ms = timings.tts_ms,
            "fragment processed"
        );

        FragmentResult {
            fragment_id: fragment.fragment_id,
            stream_id: fragment.stream_id.clone(),
            sequence_number: fragment.sequence_number,
            status,
            dubbed_audio: Some(dubbed_audio),
            transcript: Some(transcript),
            translated_text: Some(translated_text),
            processing_time_ms,
            stage_timings: timings,
            duration_metadata,
            error: None,
        }
    }

    /// Canonicalize wire audio to pcm_f32le, shelling out to ffmpeg for
    /// container formats. Returns the bytes with their effective sample rate
    /// and channel count (ffmpeg output is 16 kHz mono; raw PCM keeps the
    /// envelope's layout).
    async fn to_pcm_f32le(
        &self,
        bytes: Vec<u8>,
        format: AudioFormat,
        sample_rate_hz: u32,
        channels: u16,
    ) -> Result<(Vec<u8>, u32, u16), String> {
        match format {
            AudioFormat::PcmF32le => Ok((bytes, sample_rate_hz, channels)),
            AudioFormat::PcmS16le => {
                let samples = livedub_core::audio::s16le_to_samples(&bytes);
                Ok((
                    livedub_core::audio::samples_to_f32le(&samples),
                    sample_rate_hz,
                    channels,
                ))
            }
            AudioFormat::M4a | AudioFormat::Aac => {
                let decoded =
                    tokio::task::spawn_blocking(move || transcode_with_ffmpeg(&bytes, format))
                        .await
                        .map_err(|e| format!("transcode task failed: {e}"))??;
                Ok((decoded, 16_000, 1))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_result(
        &self,
        fragment: &FragmentEnvelope,
        stage: ErrorStage,
        code: ErrorCode,
        message: String,
        retryable: bool,
        timings: StageTimings,
        start: Instant,
        transcript: Option<String>,
        translated_text: Option<String>,
    ) -> FragmentResult {
        counter!(
            "sts_fragment_errors_total",
            "stream_id" => fragment.stream_id.clone(),
            "stage" => stage_label(stage),
            "error_code" => format!("{code:?}"),
        )
        .increment(1);

        tracing::warn!(
            stream_id = %fragment.stream_id,
            fragment_id = %fragment.fragment_id,
            stage = ?stage,
            code = ?code,
            message = %message,
            "fragment processing failed"
        );

        FragmentResult {
            fragment_id: fragment.fragment_id,
            stream_id: fragment.stream_id.clone(),
            sequence_number: fragment.sequence_number,
            status: ProcessingStatus::Failed,
            dubbed_audio: None,
            transcript,
            translated_text,
            processing_time_ms: start.elapsed().as_millis() as u64,
            stage_timings: timings,
            duration_metadata: None,
            error: Some(ProcessingError {
                stage,
                code,
                message,
                retryable,
            }),
        }
    }
}

fn stage_label(stage: ErrorStage) -> &'static str {
    match stage {
        ErrorStage::Asr => "asr",
        ErrorStage::Translation => "translation",
        ErrorStage::Tts => "tts",
        ErrorStage::Media => "media",
    }
}

/// Decode a container format to pcm_f32le mono 16 kHz via ffmpeg.
fn transcode_with_ffmpeg(bytes: &[u8], format: AudioFormat) -> Result<Vec<u8>, String> {
    use std::io::Write;

    let mut input = tempfile::Builder::new()
        .suffix(&format!(".{}", format.as_str()))
        .tempfile()
        .map_err(|e| format!("tempfile failed: {e}"))?;
    input
        .write_all(bytes)
        .map_err(|e| format!("tempfile write failed: {e}"))?;

    let output = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input.path())
        .args(["-ar", "16000", "-ac", "1", "-f", "f32le", "-acodec", "pcm_f32le", "pipe:1"])
        .output()
        .map_err(|e| format!("ffmpeg spawn failed: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "ffmpeg failed to decode {}: {}",
            format.as_str(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::asr::{AsrConfig, MockAsrConfig, MockAsrEngine, MockAsrFailure};
    use crate::translation::{MockTranslationConfig, MockTranslationEngine, TranslationConfig};
    use crate::tts::{MockTtsConfig, MockTtsEngine, TtsConfig};

    fn coordinator(
        asr_cfg: MockAsrConfig,
        translation_cfg: MockTranslationConfig,
        tts_cfg: MockTtsConfig,
    ) -> PipelineCoordinator {
        PipelineCoordinator::new(
            AsrComponent::new(Arc::new(MockAsrEngine::new(asr_cfg)), AsrConfig::default()),
            TranslationComponent::new(
                Arc::new(MockTranslationEngine::new(translation_cfg)),
                TranslationConfig::default(),
            ),
            TtsComponent::new(Arc::new(MockTtsEngine::new(tts_cfg)), TtsConfig::default()),
            CoordinatorConfig::default(),
        )
    }

    fn default_coordinator() -> PipelineCoordinator {
        coordinator(
            MockAsrConfig::default(),
            MockTranslationConfig::default(),
            MockTtsConfig::default(),
        )
    }

    fn speech_fragment(sequence: u64) -> FragmentEnvelope {
        let samples: Vec<f32> = (0..96_000)
            .map(|i| (i as f32 * 330.0 * std::f32::consts::TAU / 16_000.0).sin() * 0.4)
            .collect();
        let bytes = livedub_core::audio::samples_to_f32le(&samples);
        FragmentEnvelope {
            fragment_id: Uuid::new_v4(),
            stream_id: "stream-1".into(),
            sequence_number: sequence,
            timestamp_ms: sequence * 6_000,
            audio: AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 6_000, &bytes),
            pts_ns: None,
        }
    }

    fn silence_fragment() -> FragmentEnvelope {
        let bytes = livedub_core::audio::samples_to_f32le(&vec![0.0f32; 96_000]);
        FragmentEnvelope {
            fragment_id: Uuid::new_v4(),
            stream_id: "stream-1".into(),
            sequence_number: 0,
            timestamp_ms: 0,
            audio: AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 6_000, &bytes),
            pts_ns: None,
        }
    }

    fn session() -> StreamConfig {
        StreamConfig {
            stream_id: "stream-1".into(),
            worker_id: "worker-1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_single_fragment() {
        let coordinator = default_coordinator();
        let result = coordinator
            .process_fragment(&speech_fragment(0), &session())
            .await;

        assert_eq!(result.status, ProcessingStatus::Success);
        assert!(result.is_well_formed());
        assert!(!result.transcript.as_ref().unwrap().is_empty());
        assert!(!result.translated_text.as_ref().unwrap().is_empty());

        let dubbed = result.dubbed_audio.unwrap();
        assert_eq!(dubbed.format, AudioFormat::PcmS16le);
        assert!((5_400..=6_600).contains(&dubbed.duration_ms));

        let meta = result.duration_metadata.unwrap();
        assert!(meta.duration_variance_percent <= 10.0);

        // processing time covers all stages
        assert!(result.processing_time_ms >= result.stage_timings.total_ms());
    }

    #[tokio::test]
    async fn test_silence_fragment_flows_through() {
        let coordinator = default_coordinator();
        let result = coordinator
            .process_fragment(&silence_fragment(), &session())
            .await;

        assert_eq!(result.status, ProcessingStatus::Success);
        assert_eq!(result.transcript.as_deref(), Some(""));
        assert_eq!(result.translated_text.as_deref(), Some(""));
        let dubbed = result.dubbed_audio.unwrap();
        assert_eq!(dubbed.duration_ms, 6_000);
        // Dubbed silence decodes to all zeros
        assert!(dubbed.decode().unwrap().iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_asr_timeout_maps_to_retryable_timeout() {
        let coordinator = coordinator(
            MockAsrConfig {
                fail_times: 1,
                failure: MockAsrFailure::Timeout,
                ..Default::default()
            },
            MockTranslationConfig::default(),
            MockTtsConfig::default(),
        );
        let result = coordinator
            .process_fragment(&speech_fragment(0), &session())
            .await;

        assert_eq!(result.status, ProcessingStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.stage, ErrorStage::Asr);
        assert_eq!(error.code, ErrorCode::Timeout);
        assert!(error.retryable);
        assert!(result.stage_timings.translation_ms == 0);
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_transcript() {
        // Disable source fallback so the engine failure surfaces as Failed.
        let coordinator = PipelineCoordinator::new(
            AsrComponent::new(
                Arc::new(MockAsrEngine::new(MockAsrConfig::default())),
                AsrConfig::default(),
            ),
            TranslationComponent::new(
                Arc::new(MockTranslationEngine::new(MockTranslationConfig {
                    fail_times: 1,
                    ..Default::default()
                })),
                TranslationConfig {
                    fallback_to_source_on_error: false,
                    ..Default::default()
                },
            ),
            TtsComponent::new(Arc::new(MockTtsEngine::default()), TtsConfig::default()),
            CoordinatorConfig::default(),
        );

        let result = coordinator
            .process_fragment(&speech_fragment(0), &session())
            .await;

        assert_eq!(result.status, ProcessingStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.stage, ErrorStage::Translation);
        assert_eq!(error.code, ErrorCode::TranslationFailed);
        assert!(error.retryable);
        assert!(result.transcript.is_some());
    }

    #[tokio::test]
    async fn test_tts_failure_is_not_retryable() {
        let coordinator = coordinator(
            MockAsrConfig::default(),
            MockTranslationConfig::default(),
            MockTtsConfig {
                fail_times: 1,
                ..Default::default()
            },
        );
        let result = coordinator
            .process_fragment(&speech_fragment(0), &session())
            .await;

        assert_eq!(result.status, ProcessingStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.stage, ErrorStage::Tts);
        assert_eq!(error.code, ErrorCode::TtsSynthesisFailed);
        assert!(!error.retryable);
        assert!(result.transcript.is_some());
        assert!(result.translated_text.is_some());
    }

    #[tokio::test]
    async fn test_invalid_base64_maps_to_invalid_audio_format() {
        let coordinator = default_coordinator();
        let mut fragment = speech_fragment(0);
        fragment.audio.data_base64 = "not base64 !!!".into();

        let result = coordinator.process_fragment(&fragment, &session()).await;
        assert_eq!(result.status, ProcessingStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::InvalidAudioFormat);
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_s16le_input_is_accepted() {
        let coordinator = default_coordinator();
        let samples: Vec<f32> = (0..96_000)
            .map(|i| (i as f32 * 330.0 * std::f32::consts::TAU / 16_000.0).sin() * 0.4)
            .collect();
        let bytes = livedub_core::audio::samples_to_s16le(&samples);
        let mut fragment = speech_fragment(0);
        fragment.audio =
            AudioPayload::from_bytes(AudioFormat::PcmS16le, 16_000, 1, 6_000, &bytes);

        let result = coordinator.process_fragment(&fragment, &session()).await;
        assert_eq!(result.status, ProcessingStatus::Success);
    }
}
