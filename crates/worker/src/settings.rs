//! Worker settings
//!
//! Layered configuration mirroring the service side: optional TOML file,
//! then `LIVEDUB_*` environment variables.

use serde::Deserialize;

use livedub_core::events::StreamConfig;
use livedub_media::{EgressConfig, IngestConfig, SegmenterConfig};

use crate::peer::PeerConfig;
use crate::runner::WorkerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub sts_url: String,
    pub metrics_addr: String,
    pub stream: StreamConfig,
    pub ingest: IngestConfig,
    pub egress: EgressConfig,
    pub segmenter: SegmenterConfig,
    pub log_json: bool,
    /// Demo mode: feed synthetic segments instead of a live ingest bridge.
    pub demo_segments: Option<u64>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sts_url: "ws://localhost:8080/ws".to_string(),
            metrics_addr: "0.0.0.0:9090".to_string(),
            stream: StreamConfig {
                stream_id: "stream".to_string(),
                worker_id: "worker-0".to_string(),
                ..Default::default()
            },
            ingest: IngestConfig::default(),
            egress: EgressConfig::default(),
            segmenter: SegmenterConfig::default(),
            log_json: false,
            demo_segments: None,
        }
    }
}

impl WorkerSettings {
    pub fn load() -> Result<Self, config::ConfigError> {
        let path =
            std::env::var("LIVEDUB_CONFIG").unwrap_or_else(|_| "livedub-worker".to_string());
        config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("LIVEDUB").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            stream: self.stream.clone(),
            peer: PeerConfig {
                url: self.sts_url.clone(),
                ..Default::default()
            },
            ingest: self.ingest.clone(),
            egress: self.egress.clone(),
            segmenter: self.segmenter,
            ..Default::default()
        }
    }
}
