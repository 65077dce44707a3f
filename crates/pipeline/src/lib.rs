//! Speech-to-speech processing pipeline
//!
//! Three interchangeable components (ASR, translation, TTS) behind engine
//! traits, orchestrated per fragment by the [`coordinator::PipelineCoordinator`].
//! Mock engines are production-grade test doubles conforming to the same
//! contracts.

pub mod artifacts;
pub mod asr;
pub mod coordinator;
pub mod factory;
pub mod model_cache;
pub mod translation;
pub mod tts;

pub use artifacts::{ArtifactConfig, ArtifactLogger};
pub use asr::{AsrComponent, AsrConfig, AsrEngine, AsrError, TranscribeRequest};
pub use coordinator::{CoordinatorConfig, PipelineCoordinator};
pub use factory::{
    create_asr_engine, create_translation_engine, create_tts_engine, AsrEngineKind,
    TranslationEngineKind, TtsEngineKind,
};
pub use model_cache::{ModelCache, ModelKey};
pub use translation::{
    NormalizationPolicy, SpeakerPolicy, TranslateRequest, TranslationComponent,
    TranslationConfig, TranslationEngine, TranslationError,
};
pub use tts::{
    SynthesizeRequest, TtsComponent, TtsConfig, TtsEngine, TtsError, VoiceProfile,
};
