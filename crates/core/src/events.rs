//! Wire protocol for the STS event channel
//!
//! Messages are JSON objects tagged by `type`, ordered per connection.
//! `ClientEvent` flows from the worker to the STS service, `ServerEvent`
//! flows back.

use serde::{Deserialize, Serialize};

use crate::backpressure::BackpressureState;
use crate::error::{CoreError, ErrorResponse};
use crate::fragment::{AckStatus, AudioFormat, FragmentEnvelope, FragmentResult};

/// Sample rates a session may request.
pub const ALLOWED_SAMPLE_RATES: [u32; 6] = [8_000, 16_000, 22_050, 24_000, 44_100, 48_000];

/// Session configuration carried by `stream:init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    pub worker_id: String,
    pub source_language: String,
    pub target_language: String,
    pub voice_profile: String,
    pub chunk_duration_ms: u64,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub format: AudioFormat,
    pub max_inflight: usize,
    pub timeout_ms: u64,
    #[serde(default)]
    pub domain_hints: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            worker_id: String::new(),
            source_language: "en".to_string(),
            target_language: "es".to_string(),
            voice_profile: "default".to_string(),
            chunk_duration_ms: 6_000,
            sample_rate_hz: 16_000,
            channels: 1,
            format: AudioFormat::PcmF32le,
            max_inflight: 3,
            timeout_ms: 8_000,
            domain_hints: Vec::new(),
        }
    }
}

impl StreamConfig {
    /// Validate configuration bounds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.stream_id.is_empty() {
            return Err(CoreError::InvalidConfig("stream_id is empty".into()));
        }
        if !ALLOWED_SAMPLE_RATES.contains(&self.sample_rate_hz) {
            return Err(CoreError::InvalidConfig(format!(
                "sample_rate_hz {} not in allowed set",
                self.sample_rate_hz
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(CoreError::InvalidConfig(format!(
                "channels {} outside [1, 2]",
                self.channels
            )));
        }
        if !(1..=10).contains(&self.max_inflight) {
            return Err(CoreError::InvalidConfig(format!(
                "max_inflight {} outside [1, 10]",
                self.max_inflight
            )));
        }
        if self.chunk_duration_ms == 0 || self.chunk_duration_ms > 60_000 {
            return Err(CoreError::InvalidConfig(format!(
                "chunk_duration_ms {} outside (0, 60000]",
                self.chunk_duration_ms
            )));
        }
        Ok(())
    }

    /// First domain hint, or "general".
    pub fn primary_domain(&self) -> &str {
        self.domain_hints
            .first()
            .map(String::as_str)
            .unwrap_or("general")
    }
}

/// Capability flags advertised in `stream:ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    pub asr: bool,
    pub translation: bool,
    pub tts: bool,
    pub duration_matching: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            asr: true,
            translation: true,
            tts: true,
            duration_matching: true,
        }
    }
}

/// Aggregate statistics carried by `stream:complete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamCompleteStats {
    pub total_fragments: u64,
    pub success_count: u64,
    pub partial_count: u64,
    pub failed_count: u64,
    pub avg_processing_time_ms: f64,
    pub p95_processing_time_ms: f64,
    pub duration_ms: u64,
}

/// Events sent by the worker to the STS service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StreamInit { config: StreamConfig },
    FragmentData { fragment: FragmentEnvelope },
    StreamPause,
    StreamResume,
    StreamEnd,
}

/// Events sent by the STS service to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    StreamReady {
        session_id: String,
        max_inflight: usize,
        capabilities: Capabilities,
    },
    FragmentAck {
        fragment_id: uuid::Uuid,
        status: AckStatus,
        timestamp_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_position: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        estimated_completion_ms: Option<u64>,
    },
    FragmentProcessed {
        result: FragmentResult,
    },
    BackpressureState {
        state: BackpressureState,
    },
    StreamComplete {
        stats: StreamCompleteStats,
    },
    Error {
        error: ErrorResponse,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::AudioPayload;

    #[test]
    fn test_config_validation() {
        let mut config = StreamConfig {
            stream_id: "stream-1".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.sample_rate_hz = 11_025;
        assert!(config.validate().is_err());
        config.sample_rate_hz = 48_000;
        assert!(config.validate().is_ok());

        config.max_inflight = 0;
        assert!(config.validate().is_err());
        config.max_inflight = 11;
        assert!(config.validate().is_err());
        config.max_inflight = 10;
        assert!(config.validate().is_ok());

        config.stream_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_primary_domain() {
        let mut config = StreamConfig::default();
        assert_eq!(config.primary_domain(), "general");
        config.domain_hints = vec!["football".into(), "sports".into()];
        assert_eq!(config.primary_domain(), "football");
    }

    #[test]
    fn test_client_event_tagged_serde() {
        let event = ClientEvent::StreamInit {
            config: StreamConfig {
                stream_id: "s".into(),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_init");

        let end: ClientEvent = serde_json::from_str("{\"type\":\"stream_end\"}").unwrap();
        assert!(matches!(end, ClientEvent::StreamEnd));
    }

    #[test]
    fn test_fragment_data_round_trip() {
        let event = ClientEvent::FragmentData {
            fragment: FragmentEnvelope {
                fragment_id: uuid::Uuid::new_v4(),
                stream_id: "s".into(),
                sequence_number: 0,
                timestamp_ms: 0,
                audio: AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 6_000, &[0; 8]),
                pts_ns: None,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        match back {
            ClientEvent::FragmentData { fragment } => {
                assert_eq!(fragment.stream_id, "s");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_tagged_serde() {
        let event = ServerEvent::StreamReady {
            session_id: "sess".into(),
            max_inflight: 3,
            capabilities: Capabilities::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream_ready");
        assert_eq!(json["capabilities"]["duration_matching"], true);
    }
}
