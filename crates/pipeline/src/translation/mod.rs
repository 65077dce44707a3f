//! Translation component
//!
//! Wraps an interchangeable [`TranslationEngine`] with speaker label
//! handling, pre-translation normalization and TTS-oriented cleanup.

mod cleanup;
mod mock;
mod normalize;
mod speaker;

pub use cleanup::tts_cleanup;
pub use mock::{MockTranslationConfig, MockTranslationEngine};
pub use normalize::{NormalizationPolicy, TranslationNormalizer};
pub use speaker::{SpeakerLabelDetector, DEFAULT_SPEAKER};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use livedub_core::asset::{AssetError, AssetStatus, TranslationAsset};

/// Translation error taxonomy. Retryable: Timeout, Provider.
#[derive(Debug, Clone, Error)]
pub enum TranslationError {
    #[error("empty input")]
    EmptyInput,
    #[error("unsupported language pair {0}->{1}")]
    UnsupportedLanguagePair(String, String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("translation timed out: {0}")]
    Timeout(String),
    #[error("normalization failed: {0}")]
    Normalization(String),
    #[error("unknown translation error: {0}")]
    Unknown(String),
}

impl TranslationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslationError::Timeout(_) | TranslationError::Provider(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            TranslationError::EmptyInput => "EMPTY_INPUT",
            TranslationError::UnsupportedLanguagePair(_, _) => "UNSUPPORTED_LANGUAGE_PAIR",
            TranslationError::Provider(_) => "PROVIDER_ERROR",
            TranslationError::Timeout(_) => "TIMEOUT",
            TranslationError::Normalization(_) => "NORMALIZATION",
            TranslationError::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Speaker label handling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerPolicy {
    pub detect_and_remove: bool,
    /// Custom regex patterns; empty uses the defaults.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for SpeakerPolicy {
    fn default() -> Self {
        Self {
            detect_and_remove: true,
            patterns: Vec::new(),
        }
    }
}

/// Component configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Accepted `(source, target)` pairs; empty accepts all pairs.
    #[serde(default)]
    pub allowed_pairs: Vec<(String, String)>,
    /// On engine failure, use the normalized source text as output while
    /// retaining Failed status.
    pub fallback_to_source_on_error: bool,
    /// Apply post-translation TTS cleanup.
    pub tts_cleanup: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            allowed_pairs: Vec::new(),
            fallback_to_source_on_error: true,
            tts_cleanup: true,
        }
    }
}

/// Interchangeable translation engine.
pub trait TranslationEngine: Send + Sync + 'static {
    fn engine_name(&self) -> &str;
    fn is_ready(&self) -> bool;
    fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslationError>;
}

/// One translation request.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub source_text: String,
    pub stream_id: String,
    pub fragment_id: Uuid,
    pub sequence_number: u64,
    pub source_language: String,
    pub target_language: String,
    pub parent_asset_ids: Vec<Uuid>,
    pub speaker_policy: SpeakerPolicy,
    pub normalization_policy: NormalizationPolicy,
}

/// Translation component: speaker strip -> normalize -> engine -> cleanup.
pub struct TranslationComponent {
    engine: Arc<dyn TranslationEngine>,
    config: TranslationConfig,
    normalizer: TranslationNormalizer,
}

impl TranslationComponent {
    pub fn new(engine: Arc<dyn TranslationEngine>, config: TranslationConfig) -> Self {
        Self {
            engine,
            config,
            normalizer: TranslationNormalizer,
        }
    }

    pub fn component_name(&self) -> &'static str {
        "translation"
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Translate one transcript. Failures are reported through the asset.
    pub async fn translate(&self, req: TranslateRequest) -> TranslationAsset {
        let start = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        if !self.pair_allowed(&req.source_language, &req.target_language) {
            let e = TranslationError::UnsupportedLanguagePair(
                req.source_language.clone(),
                req.target_language.clone(),
            );
            return self.failed_asset(&req, &e, String::new(), warnings, start);
        }

        // Speaker label handling
        let detector = if req.speaker_policy.patterns.is_empty() {
            SpeakerLabelDetector::default()
        } else {
            SpeakerLabelDetector::with_patterns(&req.speaker_policy.patterns)
        };
        let (speaker, stripped) = if req.speaker_policy.detect_and_remove {
            detector.detect_and_remove(&req.source_text)
        } else {
            (DEFAULT_SPEAKER.to_string(), req.source_text.clone())
        };

        // Pre-translation normalization
        let normalized = self
            .normalizer
            .normalize(&stripped, &req.normalization_policy);

        // Empty input after preprocessing is a Success with a warning.
        if normalized.trim().is_empty() {
            warnings.push("empty input after preprocessing".to_string());
            return TranslationAsset {
                asset_id: Uuid::new_v4(),
                fragment_id: req.fragment_id,
                stream_id: req.stream_id,
                status: AssetStatus::Success,
                source_text: req.source_text,
                translated_text: String::new(),
                source_language: req.source_language,
                target_language: req.target_language,
                speaker,
                warnings,
                parent_asset_ids: req.parent_asset_ids,
                latency_ms: start.elapsed().as_millis() as u64,
                created_at: Utc::now(),
                error: None,
            };
        }

        let engine = self.engine.clone();
        let (text, src, tgt) = (
            normalized.clone(),
            req.source_language.clone(),
            req.target_language.clone(),
        );
        let translated =
            tokio::task::spawn_blocking(move || engine.translate(&text, &src, &tgt)).await;

        let translated = match translated {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                if self.config.fallback_to_source_on_error {
                    warnings.push(format!("fell back to source text: {e}"));
                    return self.failed_asset(&req, &e, normalized, warnings, start);
                }
                return self.failed_asset(&req, &e, String::new(), warnings, start);
            }
            Err(e) => {
                let e = TranslationError::Unknown(format!("translation task failed: {e}"));
                return self.failed_asset(&req, &e, String::new(), warnings, start);
            }
        };

        let translated = if self.config.tts_cleanup {
            tts_cleanup(&translated)
        } else {
            translated
        };

        let status = if warnings.is_empty() {
            AssetStatus::Success
        } else {
            AssetStatus::Partial
        };

        TranslationAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: req.fragment_id,
            stream_id: req.stream_id,
            status,
            source_text: req.source_text,
            translated_text: translated,
            source_language: req.source_language,
            target_language: req.target_language,
            speaker,
            warnings,
            parent_asset_ids: req.parent_asset_ids,
            latency_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
            error: None,
        }
    }

    fn pair_allowed(&self, source: &str, target: &str) -> bool {
        if self.config.allowed_pairs.is_empty() {
            return true;
        }
        self.config
            .allowed_pairs
            .iter()
            .any(|(s, t)| s == source && t == target)
    }

    fn failed_asset(
        &self,
        req: &TranslateRequest,
        error: &TranslationError,
        fallback_text: String,
        warnings: Vec<String>,
        start: Instant,
    ) -> TranslationAsset {
        TranslationAsset {
            asset_id: Uuid::new_v4(),
            fragment_id: req.fragment_id,
            stream_id: req.stream_id.clone(),
            status: AssetStatus::Failed,
            source_text: req.source_text.clone(),
            translated_text: fallback_text,
            source_language: req.source_language.clone(),
            target_language: req.target_language.clone(),
            speaker: DEFAULT_SPEAKER.to_string(),
            warnings,
            parent_asset_ids: req.parent_asset_ids.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
            error: Some(AssetError {
                code: error.code().to_string(),
                message: error.to_string(),
                retryable: error.is_retryable(),
            }),
        }
    }
}
