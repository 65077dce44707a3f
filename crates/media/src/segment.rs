//! Segment types
//!
//! A segment pair is the immutable ingest unit: video and audio payloads cut
//! at the same ~6 s boundary, identified by a per-stream monotonic batch
//! number. `t0_ns` is the presentation start; pairing downstream is by batch
//! number only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Metadata for one video segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSegment {
    pub stream_id: String,
    pub batch_number: u64,
    pub t0_ns: u64,
    pub duration_ns: u64,
}

/// Metadata for one audio segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub stream_id: String,
    pub batch_number: u64,
    pub t0_ns: u64,
    pub duration_ns: u64,
}

/// Immutable ingest unit: both payloads for one batch.
///
/// Constructed atomically once video and audio bytes for the same batch are
/// available; consumed by exactly one egress pairing.
#[derive(Debug, Clone)]
pub struct SegmentPair {
    pub batch_number: u64,
    pub t0_ns: u64,
    pub duration_ns: u64,
    pub video: Arc<[u8]>,
    pub audio: Arc<[u8]>,
}

impl SegmentPair {
    pub fn new(
        batch_number: u64,
        t0_ns: u64,
        duration_ns: u64,
        video: Vec<u8>,
        audio: Vec<u8>,
    ) -> Self {
        Self {
            batch_number,
            t0_ns,
            duration_ns,
            video: video.into(),
            audio: audio.into(),
        }
    }

    pub fn video_segment(&self, stream_id: &str) -> VideoSegment {
        VideoSegment {
            stream_id: stream_id.to_string(),
            batch_number: self.batch_number,
            t0_ns: self.t0_ns,
            duration_ns: self.duration_ns,
        }
    }

    pub fn audio_segment(&self, stream_id: &str) -> AudioSegment {
        AudioSegment {
            stream_id: stream_id.to_string(),
            batch_number: self.batch_number,
            t0_ns: self.t0_ns,
            duration_ns: self.duration_ns,
        }
    }
}
