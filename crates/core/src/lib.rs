//! Core types for the live dubbing pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - PCM audio helpers (format conversion, resampling, silence)
//! - Fragment envelope and processing result models
//! - Typed stage assets with lineage
//! - Error codes and the wire error payload
//! - Backpressure severity bands
//! - Wire protocol events for the STS channel

pub mod asset;
pub mod audio;
pub mod backpressure;
pub mod error;
pub mod events;
pub mod fragment;

pub use asset::{
    AssetError, AssetStatus, AudioAsset, DurationMatchMetadata, TranscriptAsset,
    TranscriptSegment, TranslationAsset, WordTiming,
};
pub use backpressure::{
    BackpressureAction, BackpressureSeverity, BackpressureState, BackpressureThresholds,
    CRITICAL_INFLIGHT_THRESHOLD,
};
pub use error::{CoreError, ErrorCode, ErrorResponse, ErrorStage};
pub use events::{
    Capabilities, ClientEvent, ServerEvent, StreamCompleteStats, StreamConfig,
    ALLOWED_SAMPLE_RATES,
};
pub use fragment::{
    AckStatus, AudioFormat, AudioPayload, DurationMetadata, FragmentEnvelope, FragmentResult,
    ProcessingError, ProcessingStatus, StageTimings, MAX_AUDIO_PAYLOAD_BYTES,
};
