//! Ingest/egress seams
//!
//! The RTSP/RTMP muxer elements live in an external media framework; this
//! module carries their configuration (URL templates, segmentation boundary)
//! and the trait seams the worker drives. Channel-backed implementations
//! serve as test doubles and as the in-process bridge to the framework.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::av_sync::SyncPair;
use crate::segment::SegmentPair;

/// RTSP ingest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub host: String,
    pub port: u16,
    pub stream: String,
    /// Jitter buffer latency for the TCP transport.
    pub latency_ms: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8554,
            stream: "stream".to_string(),
            latency_ms: 200,
        }
    }
}

impl IngestConfig {
    pub fn url(&self) -> String {
        format!("rtsp://{}:{}/{}/in", self.host, self.port, self.stream)
    }
}

/// RTMP egress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    pub host: String,
    pub port: u16,
    pub stream: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1935,
            stream: "stream".to_string(),
        }
    }
}

impl EgressConfig {
    pub fn url(&self) -> String {
        format!("rtmp://{}:{}/{}/out", self.host, self.port, self.stream)
    }
}

/// Segmentation boundary configuration (fragmented MP4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub chunk_duration_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 6_000,
        }
    }
}

/// Media I/O errors.
#[derive(Debug, Error)]
pub enum MediaIoError {
    #[error("egress sink closed")]
    SinkClosed,
}

/// Source of fixed-duration segment pairs (the segmenter output).
#[async_trait]
pub trait SegmentSource: Send {
    /// Next segment pair, or None at end of stream.
    async fn next_pair(&mut self) -> Option<SegmentPair>;
}

/// Destination for matched sync pairs (the FLV/RTMP muxer input).
#[async_trait]
pub trait EgressSink: Send {
    async fn write_pair(&mut self, pair: SyncPair) -> Result<(), MediaIoError>;
}

/// Channel-backed segment source.
pub struct ChannelSegmentSource {
    rx: mpsc::Receiver<SegmentPair>,
}

impl ChannelSegmentSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<SegmentPair>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl SegmentSource for ChannelSegmentSource {
    async fn next_pair(&mut self) -> Option<SegmentPair> {
        self.rx.recv().await
    }
}

/// Channel-backed egress sink.
pub struct ChannelEgressSink {
    tx: mpsc::Sender<SyncPair>,
}

impl ChannelEgressSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SyncPair>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EgressSink for ChannelEgressSink {
    async fn write_pair(&mut self, pair: SyncPair) -> Result<(), MediaIoError> {
        self.tx.send(pair).await.map_err(|_| MediaIoError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_templates() {
        let ingest = IngestConfig {
            host: "media.example".into(),
            port: 8554,
            stream: "game7".into(),
            latency_ms: 200,
        };
        assert_eq!(ingest.url(), "rtsp://media.example:8554/game7/in");

        let egress = EgressConfig {
            host: "cdn.example".into(),
            port: 1935,
            stream: "game7".into(),
        };
        assert_eq!(egress.url(), "rtmp://cdn.example:1935/game7/out");
    }

    #[tokio::test]
    async fn test_channel_source_and_sink() {
        let (tx, mut source) = ChannelSegmentSource::new(4);
        tx.send(SegmentPair::new(0, 0, 6_000_000_000, vec![1], vec![2]))
            .await
            .unwrap();
        drop(tx);

        let pair = source.next_pair().await.unwrap();
        assert_eq!(pair.batch_number, 0);
        assert!(source.next_pair().await.is_none());
    }
}
