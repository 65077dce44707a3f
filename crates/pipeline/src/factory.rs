//! Engine factories
//!
//! Components are interchangeable implementations behind stable contracts;
//! the factory selects one by configuration. Mock engines are the in-process
//! implementations; real providers plug in through the same traits.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asr::{AsrEngine, AsrError, FixtureAsrEngine, MockAsrConfig, MockAsrEngine};
use crate::translation::{MockTranslationConfig, MockTranslationEngine, TranslationEngine};
use crate::tts::{MockTtsConfig, MockTtsEngine, TtsEngine};

/// ASR engine selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AsrEngineKind {
    #[default]
    Mock,
    Fixture {
        path: PathBuf,
    },
}

pub fn create_asr_engine(kind: &AsrEngineKind) -> Result<Arc<dyn AsrEngine>, AsrError> {
    match kind {
        AsrEngineKind::Mock => Ok(Arc::new(MockAsrEngine::new(MockAsrConfig::default()))),
        AsrEngineKind::Fixture { path } => {
            Ok(Arc::new(FixtureAsrEngine::from_file(path)?))
        }
    }
}

/// Translation engine selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationEngineKind {
    #[default]
    Mock,
}

pub fn create_translation_engine(kind: &TranslationEngineKind) -> Arc<dyn TranslationEngine> {
    match kind {
        TranslationEngineKind::Mock => {
            Arc::new(MockTranslationEngine::new(MockTranslationConfig::default()))
        }
    }
}

/// TTS engine selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TtsEngineKind {
    #[default]
    Mock,
}

pub fn create_tts_engine(kind: &TtsEngineKind) -> Arc<dyn TtsEngine> {
    match kind {
        TtsEngineKind::Mock => Arc::new(MockTtsEngine::new(MockTtsConfig::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kinds_are_mock() {
        let asr = create_asr_engine(&AsrEngineKind::default()).unwrap();
        assert_eq!(asr.engine_name(), "mock-asr");
        assert!(asr.is_ready());

        let translation = create_translation_engine(&TranslationEngineKind::default());
        assert_eq!(translation.engine_name(), "mock-translation");

        let tts = create_tts_engine(&TtsEngineKind::default());
        assert_eq!(tts.engine_name(), "mock-tts");
    }

    #[test]
    fn test_fixture_kind_requires_valid_file() {
        let kind = AsrEngineKind::Fixture {
            path: PathBuf::from("/nonexistent/fixture.json"),
        };
        assert!(create_asr_engine(&kind).is_err());
    }
}
