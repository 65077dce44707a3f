//! Mock translation engine

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{TranslationEngine, TranslationError};

/// Mock engine configuration.
#[derive(Debug, Clone)]
pub struct MockTranslationConfig {
    /// Simulated provider latency.
    pub latency: Duration,
    /// Number of calls that fail before the engine recovers.
    pub fail_times: u32,
    /// Fail with a timeout instead of a provider error.
    pub fail_with_timeout: bool,
}

impl Default for MockTranslationConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_times: 0,
            fail_with_timeout: false,
        }
    }
}

/// Deterministic mock: tags the text with the target language so tests can
/// verify which text actually went through the engine.
pub struct MockTranslationEngine {
    config: MockTranslationConfig,
    remaining_failures: AtomicU32,
}

impl Default for MockTranslationEngine {
    fn default() -> Self {
        Self::new(MockTranslationConfig::default())
    }
}

impl MockTranslationEngine {
    pub fn new(config: MockTranslationConfig) -> Self {
        let remaining = config.fail_times;
        Self {
            config,
            remaining_failures: AtomicU32::new(remaining),
        }
    }
}

impl TranslationEngine for MockTranslationEngine {
    fn engine_name(&self) -> &str {
        "mock-translation"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return if self.config.fail_with_timeout {
                Err(TranslationError::Timeout("simulated timeout".into()))
            } else {
                Err(TranslationError::Provider("simulated outage".into()))
            };
        }

        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }

        Ok(format!("[{target_language}] {text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_tags_target_language() {
        let engine = MockTranslationEngine::default();
        let out = engine.translate("hello", "en", "es").unwrap();
        assert_eq!(out, "[es] hello");
    }

    #[test]
    fn test_mock_fail_once_then_recover() {
        let engine = MockTranslationEngine::new(MockTranslationConfig {
            fail_times: 1,
            ..Default::default()
        });
        assert!(engine.translate("x", "en", "es").is_err());
        assert!(engine.translate("x", "en", "es").is_ok());
    }
}
