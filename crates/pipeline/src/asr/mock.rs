//! Mock and fixture ASR engines
//!
//! Test doubles that conform to the [`AsrEngine`](super::AsrEngine) contract.
//! The mock detects silence, paces output across the fragment duration and
//! can fail a configured number of times before recovering.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;

use super::{AsrEngine, AsrError, InferenceParams, RawSegment, RawWord};
use crate::asr::preprocess::ASR_SAMPLE_RATE_HZ;
use crate::asr::shaping::split_into_sentences;

const SILENCE_EPSILON: f32 = 1e-5;

/// Failure kind a mock engine can simulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockAsrFailure {
    #[default]
    Timeout,
    Memory,
    ModelLoad,
    Unknown,
}

impl MockAsrFailure {
    fn to_error(self) -> AsrError {
        match self {
            MockAsrFailure::Timeout => AsrError::Timeout("simulated timeout".into()),
            MockAsrFailure::Memory => AsrError::Memory("simulated OOM".into()),
            MockAsrFailure::ModelLoad => AsrError::ModelLoad("simulated load failure".into()),
            MockAsrFailure::Unknown => AsrError::Unknown("simulated failure".into()),
        }
    }
}

/// Mock engine configuration.
#[derive(Debug, Clone)]
pub struct MockAsrConfig {
    /// Text returned for non-silent audio.
    pub text: String,
    /// Simulated inference latency.
    pub latency: Duration,
    /// Number of calls that fail before the engine recovers.
    pub fail_times: u32,
    pub failure: MockAsrFailure,
    /// Emit word-level timings.
    pub word_timestamps: bool,
}

impl Default for MockAsrConfig {
    fn default() -> Self {
        Self {
            text: "The quarterback throws deep to the end zone for a touchdown.".into(),
            latency: Duration::ZERO,
            fail_times: 0,
            failure: MockAsrFailure::default(),
            word_timestamps: false,
        }
    }
}

/// Fixed-output mock engine with silence detection and fail-N-times mode.
pub struct MockAsrEngine {
    config: MockAsrConfig,
    remaining_failures: AtomicU32,
}

impl MockAsrEngine {
    pub fn new(config: MockAsrConfig) -> Self {
        let remaining = config.fail_times;
        Self {
            config,
            remaining_failures: AtomicU32::new(remaining),
        }
    }

    fn is_silent(samples: &[f32]) -> bool {
        samples.iter().all(|s| s.abs() < SILENCE_EPSILON)
    }

    fn segments_for(&self, text: &str, duration_s: f32) -> Vec<RawSegment> {
        let sentences = split_into_sentences(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let total_chars: usize = sentences.iter().map(|s| s.len()).sum();
        let mut cursor = 0.0f32;
        sentences
            .into_iter()
            .map(|sentence| {
                let share = sentence.len() as f32 / total_chars.max(1) as f32;
                let seg_duration = duration_s * share;
                let start_s = cursor;
                let end_s = cursor + seg_duration;
                cursor = end_s;

                let words = self.config.word_timestamps.then(|| {
                    let tokens: Vec<&str> = sentence.split_whitespace().collect();
                    let per_word = seg_duration / tokens.len().max(1) as f32;
                    tokens
                        .iter()
                        .enumerate()
                        .map(|(i, token)| RawWord {
                            word: token.to_string(),
                            start_s: start_s + per_word * i as f32,
                            end_s: start_s + per_word * (i + 1) as f32,
                            probability: Some(0.9),
                        })
                        .collect()
                });

                RawSegment {
                    start_s,
                    end_s,
                    text: sentence,
                    avg_logprob: -0.2,
                    words,
                }
            })
            .collect()
    }
}

impl AsrEngine for MockAsrEngine {
    fn engine_name(&self) -> &str {
        "mock-asr"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn transcribe(
        &self,
        samples: &[f32],
        _params: &InferenceParams,
    ) -> Result<Vec<RawSegment>, AsrError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(self.config.failure.to_error());
        }

        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }

        if samples.is_empty() || Self::is_silent(samples) {
            return Ok(Vec::new());
        }

        let duration_s = samples.len() as f32 / ASR_SAMPLE_RATE_HZ as f32;
        Ok(self.segments_for(&self.config.text, duration_s))
    }
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    text: String,
    #[serde(default)]
    avg_logprob: Option<f32>,
}

/// Fixture-replay engine: returns scripted transcripts in call order,
/// cycling when the script is exhausted.
pub struct FixtureAsrEngine {
    entries: Vec<FixtureEntry>,
    next: AtomicUsize,
}

impl FixtureAsrEngine {
    /// Load a JSON array of `{"text": ..., "avg_logprob": ...}` entries.
    pub fn from_file(path: &Path) -> Result<Self, AsrError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AsrError::ModelLoad(format!("fixture read failed: {e}")))?;
        let entries: Vec<FixtureEntry> = serde_json::from_str(&raw)
            .map_err(|e| AsrError::ModelLoad(format!("fixture parse failed: {e}")))?;
        if entries.is_empty() {
            return Err(AsrError::ModelLoad("fixture is empty".into()));
        }
        Ok(Self {
            entries,
            next: AtomicUsize::new(0),
        })
    }
}

impl AsrEngine for FixtureAsrEngine {
    fn engine_name(&self) -> &str {
        "fixture-asr"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn transcribe(
        &self,
        samples: &[f32],
        _params: &InferenceParams,
    ) -> Result<Vec<RawSegment>, AsrError> {
        if samples.is_empty() || MockAsrEngine::is_silent(samples) {
            return Ok(Vec::new());
        }

        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.entries.len();
        let entry = &self.entries[index];
        let duration_s = samples.len() as f32 / ASR_SAMPLE_RATE_HZ as f32;

        Ok(vec![RawSegment {
            start_s: 0.0,
            end_s: duration_s,
            text: entry.text.clone(),
            avg_logprob: entry.avg_logprob.unwrap_or(-0.2),
            words: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::AsrInferenceConfig;

    fn params() -> InferenceParams {
        InferenceParams {
            language: "en".into(),
            initial_prompt: String::new(),
            config: AsrInferenceConfig::default(),
        }
    }

    fn tone(seconds: f32) -> Vec<f32> {
        let n = (ASR_SAMPLE_RATE_HZ as f32 * seconds) as usize;
        (0..n).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect()
    }

    #[test]
    fn test_mock_silence_returns_empty() {
        let engine = MockAsrEngine::new(MockAsrConfig::default());
        let result = engine.transcribe(&vec![0.0; 16_000], &params()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_mock_paces_segments_across_duration() {
        let engine = MockAsrEngine::new(MockAsrConfig {
            text: "One sentence. Two sentence.".into(),
            ..Default::default()
        });
        let result = engine.transcribe(&tone(6.0), &params()).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].start_s < result[1].start_s);
        assert!((result[1].end_s - 6.0).abs() < 0.1);
    }

    #[test]
    fn test_mock_fail_n_times() {
        let engine = MockAsrEngine::new(MockAsrConfig {
            fail_times: 2,
            failure: MockAsrFailure::Memory,
            ..Default::default()
        });
        assert!(engine.transcribe(&tone(1.0), &params()).is_err());
        assert!(engine.transcribe(&tone(1.0), &params()).is_err());
        assert!(engine.transcribe(&tone(1.0), &params()).is_ok());
    }

    #[test]
    fn test_mock_word_timestamps_cover_segment() {
        let engine = MockAsrEngine::new(MockAsrConfig {
            text: "Four score and seven.".into(),
            word_timestamps: true,
            ..Default::default()
        });
        let result = engine.transcribe(&tone(4.0), &params()).unwrap();
        let words = result[0].words.as_ref().unwrap();
        assert_eq!(words.len(), 4);
        assert!(words.windows(2).all(|w| w[0].end_s <= w[1].start_s + 1e-3));
    }

    #[test]
    fn test_fixture_engine_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcripts.json");
        std::fs::write(&path, r#"[{"text": "first"}, {"text": "second"}]"#).unwrap();

        let engine = FixtureAsrEngine::from_file(&path).unwrap();
        let a = engine.transcribe(&tone(1.0), &params()).unwrap();
        let b = engine.transcribe(&tone(1.0), &params()).unwrap();
        let c = engine.transcribe(&tone(1.0), &params()).unwrap();
        assert_eq!(a[0].text, "first");
        assert_eq!(b[0].text, "second");
        assert_eq!(c[0].text, "first");
    }
}
