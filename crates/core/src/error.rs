//! Error codes and the wire error payload

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage where an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Asr,
    Translation,
    Tts,
    Media,
}

/// Standardized error codes for the STS channel.
///
/// Stream errors reflect configuration/session issues and are not retryable;
/// processing errors are transient and retryable; pipeline errors vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Stream errors (not retryable)
    StreamNotFound,
    StreamPaused,
    InvalidConfig,
    InvalidVoiceProfile,
    UnsupportedLanguage,

    // Processing errors (retryable)
    Timeout,
    RateLimitExceeded,
    TranslationApiUnavailable,
    BackpressureExceeded,
    GpuOom,

    // Pipeline errors (varies)
    AsrFailed,
    TranslationFailed,
    TtsSynthesisFailed,
    DurationMismatchExceeded,
    InvalidAudioFormat,
}

impl ErrorCode {
    /// Whether the error is transient and retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::RateLimitExceeded
                | ErrorCode::TranslationApiUnavailable
                | ErrorCode::BackpressureExceeded
                | ErrorCode::GpuOom
        )
    }

    /// Default human-readable message.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::StreamNotFound => "Stream not found in session store",
            ErrorCode::StreamPaused => "Stream is currently paused, new fragments rejected",
            ErrorCode::InvalidConfig => "Invalid stream configuration",
            ErrorCode::InvalidVoiceProfile => "Voice profile not found",
            ErrorCode::UnsupportedLanguage => "Language pair not supported",
            ErrorCode::Timeout => "Processing timed out",
            ErrorCode::RateLimitExceeded => "API rate limit exceeded",
            ErrorCode::TranslationApiUnavailable => "Translation API is unavailable",
            ErrorCode::BackpressureExceeded => "Critical backpressure threshold exceeded",
            ErrorCode::GpuOom => "GPU out of memory",
            ErrorCode::AsrFailed => "ASR processing failed",
            ErrorCode::TranslationFailed => "Translation processing failed",
            ErrorCode::TtsSynthesisFailed => "TTS synthesis failed",
            ErrorCode::DurationMismatchExceeded => "Duration variance exceeds 20% threshold",
            ErrorCode::InvalidAudioFormat => "Invalid or unsupported audio format",
        }
    }
}

/// Error payload for out-of-band `error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ErrorStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Build a response from a code with its default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            retryable: code.is_retryable(),
            stage: None,
            details: None,
        }
    }

    pub fn with_stage(mut self, stage: ErrorStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Errors raised by core model operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),

    #[error("audio payload of {size} bytes exceeds {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_partition() {
        let retryable = [
            ErrorCode::Timeout,
            ErrorCode::RateLimitExceeded,
            ErrorCode::TranslationApiUnavailable,
            ErrorCode::BackpressureExceeded,
            ErrorCode::GpuOom,
        ];
        for code in retryable {
            assert!(code.is_retryable(), "{code:?} should be retryable");
        }

        let non_retryable = [
            ErrorCode::StreamNotFound,
            ErrorCode::StreamPaused,
            ErrorCode::InvalidConfig,
            ErrorCode::InvalidVoiceProfile,
            ErrorCode::UnsupportedLanguage,
            ErrorCode::AsrFailed,
            ErrorCode::TranslationFailed,
            ErrorCode::TtsSynthesisFailed,
            ErrorCode::DurationMismatchExceeded,
            ErrorCode::InvalidAudioFormat,
        ];
        for code in non_retryable {
            assert!(!code.is_retryable(), "{code:?} should not be retryable");
        }
    }

    #[test]
    fn test_error_code_serde_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::BackpressureExceeded).unwrap();
        assert_eq!(json, "\"BACKPRESSURE_EXCEEDED\"");
        let back: ErrorCode = serde_json::from_str("\"TTS_SYNTHESIS_FAILED\"").unwrap();
        assert_eq!(back, ErrorCode::TtsSynthesisFailed);
    }

    #[test]
    fn test_error_response_builder() {
        let resp = ErrorResponse::from_code(ErrorCode::AsrFailed).with_stage(ErrorStage::Asr);
        assert!(!resp.retryable);
        assert_eq!(resp.stage, Some(ErrorStage::Asr));
        assert_eq!(resp.message, "ASR processing failed");
    }
}
