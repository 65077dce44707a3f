//! Fragment envelope and processing result models
//!
//! A fragment is a ~6 second audio window identified by
//! `(stream_id, sequence_number)`. The envelope arrives over the wire with
//! base64-encoded audio; the result returns dubbed audio the same way.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, ErrorCode, ErrorStage};

/// Maximum decoded audio payload size (10 MiB).
pub const MAX_AUDIO_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Fragment processing result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// All stages completed successfully
    Success,
    /// Completed with warnings (e.g. clamped speed ratio)
    Partial,
    /// Processing failed at one or more stages
    Failed,
}

/// Fragment acknowledgment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Fragment queued for processing
    Queued,
    /// Fragment being processed
    Processing,
    /// Worker confirmed receipt
    Received,
    /// Worker applied dubbed audio
    Applied,
}

/// Audio format identifiers accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    M4a,
    Aac,
    PcmF32le,
    PcmS16le,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
            AudioFormat::PcmF32le => "pcm_f32le",
            AudioFormat::PcmS16le => "pcm_s16le",
        }
    }

    /// True for raw PCM formats that need no external decoder.
    pub fn is_pcm(&self) -> bool {
        matches!(self, AudioFormat::PcmF32le | AudioFormat::PcmS16le)
    }
}

/// Audio data carried inside a fragment or result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    pub format: AudioFormat,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub duration_ms: u64,
    pub data_base64: String,
}

impl AudioPayload {
    /// Build a payload by encoding raw bytes.
    pub fn from_bytes(
        format: AudioFormat,
        sample_rate_hz: u32,
        channels: u16,
        duration_ms: u64,
        data: &[u8],
    ) -> Self {
        Self {
            format,
            sample_rate_hz,
            channels,
            duration_ms,
            data_base64: BASE64.encode(data),
        }
    }

    /// Decode the base64 payload, enforcing the 10 MiB bound.
    pub fn decode(&self) -> Result<Vec<u8>, CoreError> {
        let bytes = BASE64
            .decode(&self.data_base64)
            .map_err(|e| CoreError::InvalidAudio(format!("base64 decode failed: {e}")))?;
        if bytes.len() > MAX_AUDIO_PAYLOAD_BYTES {
            return Err(CoreError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_AUDIO_PAYLOAD_BYTES,
            });
        }
        Ok(bytes)
    }

    /// Validate wire-level bounds without decoding the audio.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.duration_ms > 60_000 {
            return Err(CoreError::InvalidAudio(format!(
                "duration_ms {} exceeds 60000",
                self.duration_ms
            )));
        }
        if !(8_000..=96_000).contains(&self.sample_rate_hz) {
            return Err(CoreError::InvalidAudio(format!(
                "sample_rate_hz {} outside [8000, 96000]",
                self.sample_rate_hz
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(CoreError::InvalidAudio(format!(
                "channels {} outside [1, 2]",
                self.channels
            )));
        }
        // Base64 inflates by 4/3; reject obviously oversized payloads early.
        if self.data_base64.len() > MAX_AUDIO_PAYLOAD_BYTES * 4 / 3 + 4 {
            return Err(CoreError::PayloadTooLarge {
                size: self.data_base64.len() * 3 / 4,
                max: MAX_AUDIO_PAYLOAD_BYTES,
            });
        }
        Ok(())
    }
}

/// Inbound audio fragment (`fragment:data` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentEnvelope {
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub sequence_number: u64,
    pub timestamp_ms: u64,
    pub audio: AudioPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pts_ns: Option<u64>,
}

/// Per-stage timing breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub asr_ms: u64,
    pub translation_ms: u64,
    pub tts_ms: u64,
}

impl StageTimings {
    pub fn total_ms(&self) -> u64 {
        self.asr_ms + self.translation_ms + self.tts_ms
    }
}

/// Duration matching metadata carried on the wire for A/V sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DurationMetadata {
    pub original_duration_ms: u64,
    pub dubbed_duration_ms: u64,
    pub duration_variance_percent: f64,
    pub speed_ratio: f64,
}

impl DurationMetadata {
    /// True when the variance is within the 20% failure threshold.
    pub fn is_within_threshold(&self) -> bool {
        self.duration_variance_percent <= 20.0
    }
}

/// Error attached to a failed fragment result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingError {
    pub stage: ErrorStage,
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Result of processing one fragment (`fragment:processed` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentResult {
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub sequence_number: u64,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dubbed_audio: Option<AudioPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub processing_time_ms: u64,
    pub stage_timings: StageTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_metadata: Option<DurationMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProcessingError>,
}

impl FragmentResult {
    /// Synthesize a timeout failure for an in-flight envelope.
    ///
    /// Used by the fragment tracker when the deadline expires; the fragment
    /// is still emitted in order so the consumer can substitute audio.
    pub fn timeout(envelope: &FragmentEnvelope, timeout_ms: u64) -> Self {
        Self {
            fragment_id: envelope.fragment_id,
            stream_id: envelope.stream_id.clone(),
            sequence_number: envelope.sequence_number,
            status: ProcessingStatus::Failed,
            dubbed_audio: None,
            transcript: None,
            translated_text: None,
            processing_time_ms: timeout_ms,
            stage_timings: StageTimings::default(),
            duration_metadata: None,
            error: Some(ProcessingError {
                stage: ErrorStage::Asr,
                code: ErrorCode::Timeout,
                message: format!("fragment timed out after {timeout_ms} ms"),
                retryable: true,
            }),
        }
    }

    /// Synthesize a dispatch-side rejection (breaker open / backpressure).
    pub fn rejected(envelope: &FragmentEnvelope, code: ErrorCode) -> Self {
        Self {
            fragment_id: envelope.fragment_id,
            stream_id: envelope.stream_id.clone(),
            sequence_number: envelope.sequence_number,
            status: ProcessingStatus::Failed,
            dubbed_audio: None,
            transcript: None,
            translated_text: None,
            processing_time_ms: 0,
            stage_timings: StageTimings::default(),
            duration_metadata: None,
            error: Some(ProcessingError {
                stage: ErrorStage::Media,
                code,
                message: code.default_message().to_string(),
                retryable: code.is_retryable(),
            }),
        }
    }

    /// Invariant check: failed results carry an error and no audio; other
    /// statuses carry audio.
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            ProcessingStatus::Failed => self.dubbed_audio.is_none() && self.error.is_some(),
            _ => self
                .dubbed_audio
                .as_ref()
                .is_some_and(|a| !a.data_base64.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> FragmentEnvelope {
        FragmentEnvelope {
            fragment_id: Uuid::new_v4(),
            stream_id: "stream-1".into(),
            sequence_number: 3,
            timestamp_ms: 18_000,
            audio: AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 6_000, &[0u8; 64]),
            pts_ns: None,
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = AudioPayload::from_bytes(AudioFormat::PcmS16le, 16_000, 1, 100, &[1, 2, 3]);
        assert_eq!(payload.decode().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_payload_size_limit() {
        let mut payload = AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 100, &[]);
        payload.data_base64 = BASE64.encode(vec![0u8; MAX_AUDIO_PAYLOAD_BYTES + 1]);
        assert!(matches!(
            payload.decode(),
            Err(CoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_payload_validate_bounds() {
        let mut payload = AudioPayload::from_bytes(AudioFormat::M4a, 48_000, 1, 6_000, &[0u8; 8]);
        assert!(payload.validate().is_ok());

        payload.duration_ms = 60_001;
        assert!(payload.validate().is_err());
        payload.duration_ms = 6_000;

        payload.sample_rate_hz = 7_000;
        assert!(payload.validate().is_err());
        payload.sample_rate_hz = 48_000;

        payload.channels = 3;
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_timeout_result_shape() {
        let result = FragmentResult::timeout(&envelope(), 8_000);
        assert_eq!(result.status, ProcessingStatus::Failed);
        assert_eq!(result.sequence_number, 3);
        assert!(result.is_well_formed());
        let err = result.error.unwrap();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.retryable);
    }

    #[test]
    fn test_rejected_result_shape() {
        let result = FragmentResult::rejected(&envelope(), ErrorCode::BackpressureExceeded);
        assert!(result.is_well_formed());
        assert!(result.error.unwrap().retryable);
    }

    #[test]
    fn test_stage_timings_total() {
        let timings = StageTimings {
            asr_ms: 1200,
            translation_ms: 150,
            tts_ms: 3100,
        };
        assert_eq!(timings.total_ms(), 4450);
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let env = envelope();
        let json = serde_json::to_string(&env).unwrap();
        let back: FragmentEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence_number, env.sequence_number);
        assert_eq!(back.audio.format, AudioFormat::PcmF32le);
    }
}
