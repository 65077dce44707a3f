//! Per-fragment artifact persistence
//!
//! Saves intermediate pipeline assets to disk for troubleshooting:
//!
//! ```text
//! {root}/{stream_id}/{fragment_id}/
//! ├── transcript.txt
//! ├── translation.txt
//! ├── dubbed_audio.wav
//! └── metadata.json
//! ```
//!
//! Streams are pruned to the newest `max_fragments_per_stream` fragment
//! directories. Failures are logged, never propagated into the fragment
//! path.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use livedub_core::asset::{AudioAsset, TranscriptAsset, TranslationAsset};

/// Artifact logger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub root: PathBuf,
    pub max_fragments_per_stream: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("livedub-artifacts"),
            max_fragments_per_stream: 1000,
        }
    }
}

/// Writes pipeline artifacts under a per-fragment directory.
pub struct ArtifactLogger {
    config: ArtifactConfig,
}

impl ArtifactLogger {
    pub fn new(config: ArtifactConfig) -> Self {
        tracing::info!(
            root = %config.root.display(),
            max_fragments = config.max_fragments_per_stream,
            "artifact logging enabled"
        );
        Self { config }
    }

    fn fragment_dir(&self, stream_id: &str, fragment_id: Uuid) -> PathBuf {
        self.config
            .root
            .join(sanitize(stream_id))
            .join(fragment_id.to_string())
    }

    pub fn log_transcript(&self, asset: &TranscriptAsset) {
        let dir = self.fragment_dir(&asset.stream_id, asset.fragment_id);
        if let Err(e) = write_text(&dir, "transcript.txt", &asset.text()) {
            tracing::warn!(error = %e, "failed to write transcript artifact");
        }
    }

    pub fn log_translation(&self, asset: &TranslationAsset) {
        let dir = self.fragment_dir(&asset.stream_id, asset.fragment_id);
        if let Err(e) = write_text(&dir, "translation.txt", &asset.translated_text) {
            tracing::warn!(error = %e, "failed to write translation artifact");
        }
    }

    pub fn log_dubbed_audio(&self, asset: &AudioAsset) {
        let dir = self.fragment_dir(&asset.stream_id, asset.fragment_id);
        if let Err(e) = self.write_wav(&dir, asset) {
            tracing::warn!(error = %e, "failed to write audio artifact");
        }
    }

    pub fn log_metadata(&self, stream_id: &str, fragment_id: Uuid, metadata: &serde_json::Value) {
        let dir = self.fragment_dir(stream_id, fragment_id);
        let result = serde_json::to_string_pretty(metadata)
            .map_err(std::io::Error::other)
            .and_then(|json| write_text(&dir, "metadata.json", &json));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write metadata artifact");
        }
        self.prune_stream(stream_id);
    }

    fn write_wav(&self, dir: &Path, asset: &AudioAsset) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        let spec = hound::WavSpec {
            channels: asset.channels,
            sample_rate: asset.sample_rate_hz,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.join("dubbed_audio.wav"), spec)
            .map_err(std::io::Error::other)?;
        for chunk in asset.audio.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(std::io::Error::other)?;
        }
        writer.finalize().map_err(std::io::Error::other)
    }

    /// Keep only the newest fragment directories for a stream.
    fn prune_stream(&self, stream_id: &str) {
        let stream_dir = self.config.root.join(sanitize(stream_id));
        let Ok(entries) = fs::read_dir(&stream_dir) else {
            return;
        };

        let mut dirs: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, e.path()))
            })
            .collect();

        if dirs.len() <= self.config.max_fragments_per_stream {
            return;
        }

        dirs.sort_by_key(|(modified, _)| *modified);
        let excess = dirs.len() - self.config.max_fragments_per_stream;
        for (_, path) in dirs.into_iter().take(excess) {
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "artifact prune failed");
            }
        }
    }
}

fn write_text(dir: &Path, name: &str, content: &str) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(name), content)
}

fn sanitize(stream_id: &str) -> String {
    stream_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
