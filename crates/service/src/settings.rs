//! Service settings
//!
//! Layered configuration: optional TOML file, then `LIVEDUB_*` environment
//! variables. Every field has a serde default so a bare process starts.

use serde::Deserialize;

use livedub_pipeline::{AsrEngineKind, TranslationEngineKind, TtsEngineKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub listen_addr: String,
    pub artifacts_enabled: bool,
    pub artifacts_path: Option<std::path::PathBuf>,
    pub asr_engine: AsrEngineKind,
    pub translation_engine: TranslationEngineKind,
    pub tts_engine: TtsEngineKind,
    pub log_json: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            artifacts_enabled: false,
            artifacts_path: None,
            asr_engine: AsrEngineKind::default(),
            translation_engine: TranslationEngineKind::default(),
            tts_engine: TtsEngineKind::default(),
            log_json: false,
        }
    }
}

impl ServiceSettings {
    /// Load from `LIVEDUB_CONFIG` (or `livedub-sts.toml`) and environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("LIVEDUB_CONFIG").unwrap_or_else(|_| "livedub-sts".to_string());
        config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("LIVEDUB").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.listen_addr, "0.0.0.0:8080");
        assert!(!settings.artifacts_enabled);
        assert!(matches!(settings.asr_engine, AsrEngineKind::Mock));
    }
}
