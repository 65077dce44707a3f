//! Typed stage assets with lineage
//!
//! Each pipeline stage produces one typed artifact. Assets form a DAG per
//! fragment via `parent_asset_ids`: TranscriptAsset -> TranslationAsset ->
//! AudioAsset. Parent ids always reference assets created earlier in the
//! same fragment processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fragment::AudioFormat;

/// Status of a produced asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Success,
    Partial,
    Failed,
}

impl AssetStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, AssetStatus::Failed)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, AssetStatus::Partial)
    }
}

/// Error recorded on a failed or partial asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Word-level timing within a transcript segment (absolute stream time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// One shaped utterance of the transcript (absolute stream time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

impl TranscriptSegment {
    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }
}

/// ASR output asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptAsset {
    pub asset_id: Uuid,
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub status: AssetStatus,
    pub segments: Vec<TranscriptSegment>,
    pub total_text: String,
    pub language: String,
    pub confidence: f32,
    pub parent_asset_ids: Vec<Uuid>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AssetError>,
}

impl TranscriptAsset {
    /// Preferred transcript text: total_text, else joined segment texts.
    pub fn text(&self) -> String {
        if !self.total_text.is_empty() {
            return self.total_text.clone();
        }
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Translation output asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationAsset {
    pub asset_id: Uuid,
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub status: AssetStatus,
    pub source_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
    pub speaker: String,
    pub warnings: Vec<String>,
    pub parent_asset_ids: Vec<Uuid>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AssetError>,
}

/// Duration matching metadata produced by TTS alignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DurationMatchMetadata {
    pub original_duration_ms: u64,
    pub raw_duration_ms: u64,
    pub final_duration_ms: u64,
    pub duration_variance_percent: f64,
    pub speed_ratio: f64,
    pub speed_clamped: bool,
}

/// TTS output asset. Audio is raw PCM in the stated format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAsset {
    pub asset_id: Uuid,
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub status: AssetStatus,
    #[serde(skip)]
    pub audio: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_metadata: Option<DurationMatchMetadata>,
    pub parent_asset_ids: Vec<Uuid>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AssetError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_time_ms: 0,
            end_time_ms: 1000,
            text: text.to_string(),
            confidence: 0.9,
            words: None,
        }
    }

    #[test]
    fn test_transcript_text_prefers_total() {
        let asset = TranscriptAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: Uuid::new_v4(),
            stream_id: "s".into(),
            status: AssetStatus::Success,
            segments: vec![segment("hello"), segment("world")],
            total_text: "hello world full".into(),
            language: "en".into(),
            confidence: 0.9,
            parent_asset_ids: vec![],
            latency_ms: 10,
            created_at: Utc::now(),
            error: None,
        };
        assert_eq!(asset.text(), "hello world full");
    }

    #[test]
    fn test_transcript_text_joins_segments() {
        let asset = TranscriptAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: Uuid::new_v4(),
            stream_id: "s".into(),
            status: AssetStatus::Success,
            segments: vec![segment("hello"), segment("world")],
            total_text: String::new(),
            language: "en".into(),
            confidence: 0.9,
            parent_asset_ids: vec![],
            latency_ms: 10,
            created_at: Utc::now(),
            error: None,
        };
        assert_eq!(asset.text(), "hello world");
    }

    #[test]
    fn test_segment_duration() {
        assert_eq!(segment("x").duration_ms(), 1000);
    }
}
