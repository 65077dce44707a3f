//! Mock TTS engine
//!
//! Produces a deterministic tone whose length is proportional to the text
//! length, so duration matching has realistic work to do.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{RawSynthesis, SelectedVoice, TtsEngine, TtsError};

/// Mock engine configuration.
#[derive(Debug, Clone)]
pub struct MockTtsConfig {
    /// Speaking pace used to derive the raw duration from text length.
    pub chars_per_second: f32,
    /// Minimum raw duration for any non-empty text.
    pub min_duration_s: f32,
    /// Native sample rate of the mock voice.
    pub sample_rate_hz: u32,
    /// Simulated synthesis latency.
    pub latency: Duration,
    /// Number of calls that fail before the engine recovers.
    pub fail_times: u32,
}

impl Default for MockTtsConfig {
    fn default() -> Self {
        Self {
            chars_per_second: 15.0,
            min_duration_s: 0.4,
            sample_rate_hz: 24_000,
            latency: Duration::ZERO,
            fail_times: 0,
        }
    }
}

/// Fixed-voice mock engine.
pub struct MockTtsEngine {
    config: MockTtsConfig,
    remaining_failures: AtomicU32,
}

impl Default for MockTtsEngine {
    fn default() -> Self {
        Self::new(MockTtsConfig::default())
    }
}

impl MockTtsEngine {
    pub fn new(config: MockTtsConfig) -> Self {
        let remaining = config.fail_times;
        Self {
            config,
            remaining_failures: AtomicU32::new(remaining),
        }
    }
}

impl TtsEngine for MockTtsEngine {
    fn engine_name(&self) -> &str {
        "mock-tts"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn synthesize(&self, text: &str, _voice: &SelectedVoice) -> Result<RawSynthesis, TtsError> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TtsError::Synthesis("simulated engine failure".into()));
        }

        if text.trim().is_empty() {
            return Err(TtsError::InvalidInput("empty text".into()));
        }

        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }

        let duration_s = (text.chars().count() as f32 / self.config.chars_per_second)
            .max(self.config.min_duration_s);
        let n = (duration_s * self.config.sample_rate_hz as f32) as usize;
        let rate = self.config.sample_rate_hz as f32;

        // A 220 Hz tone with a slow amplitude envelope; audibly "voice-like"
        // enough for listening checks during development.
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f32 / rate;
                let envelope = 0.6 + 0.4 * (t * 2.0 * std::f32::consts::TAU).sin();
                (t * 220.0 * std::f32::consts::TAU).sin() * 0.4 * envelope
            })
            .collect();

        Ok(RawSynthesis {
            samples,
            sample_rate_hz: self.config.sample_rate_hz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::voice::{VoiceSelection, SelectedVoice};

    fn voice() -> SelectedVoice {
        SelectedVoice {
            model_name: "mock".into(),
            selection: VoiceSelection::LanguageDefault("es".into()),
            language: "es".into(),
        }
    }

    #[test]
    fn test_duration_scales_with_text() {
        let engine = MockTtsEngine::default();
        let short = engine.synthesize("Hola.", &voice()).unwrap();
        let long = engine
            .synthesize(
                "Una frase mucho mas larga que deberia producir bastante mas audio sintetizado.",
                &voice(),
            )
            .unwrap();
        assert!(long.samples.len() > short.samples.len());
    }

    #[test]
    fn test_empty_text_is_invalid() {
        let engine = MockTtsEngine::default();
        assert!(matches!(
            engine.synthesize("  ", &voice()),
            Err(TtsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fail_once() {
        let engine = MockTtsEngine::new(MockTtsConfig {
            fail_times: 1,
            ..Default::default()
        });
        assert!(engine.synthesize("Hola.", &voice()).is_err());
        assert!(engine.synthesize("Hola.", &voice()).is_ok());
    }
}
