//! Backpressure severity bands
//!
//! Severity is a pure function of the in-flight count against closed integer
//! bands: Low = [1..3], Medium = [4..6], High = [7..10]. Above the critical
//! threshold new fragments are rejected outright.

use serde::{Deserialize, Serialize};

/// In-flight counts above this are rejected with BACKPRESSURE_EXCEEDED.
pub const CRITICAL_INFLIGHT_THRESHOLD: usize = 10;

/// Backpressure severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureSeverity {
    Low,
    Medium,
    High,
}

/// Recommended producer action, a pure function of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureAction {
    /// Continue normally
    None,
    /// Increase delay between fragments
    SlowDown,
    /// Stop sending new fragments
    Pause,
}

/// Configurable severity band upper bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackpressureThresholds {
    pub low_max: usize,
    pub medium_max: usize,
    pub high_max: usize,
}

impl Default for BackpressureThresholds {
    fn default() -> Self {
        Self {
            low_max: 3,
            medium_max: 6,
            high_max: 10,
        }
    }
}

impl BackpressureThresholds {
    pub fn severity(&self, inflight: usize) -> BackpressureSeverity {
        if inflight <= self.low_max {
            BackpressureSeverity::Low
        } else if inflight <= self.medium_max {
            BackpressureSeverity::Medium
        } else {
            BackpressureSeverity::High
        }
    }

    pub fn action(&self, severity: BackpressureSeverity) -> BackpressureAction {
        match severity {
            BackpressureSeverity::Low => BackpressureAction::None,
            BackpressureSeverity::Medium => BackpressureAction::SlowDown,
            BackpressureSeverity::High => BackpressureAction::Pause,
        }
    }
}

/// Recommended delay before the next fragment submission.
pub fn recommended_delay_ms(severity: BackpressureSeverity) -> u64 {
    match severity {
        BackpressureSeverity::Low => 0,
        BackpressureSeverity::Medium => 500,
        BackpressureSeverity::High => 2000,
    }
}

/// Backpressure state for a stream (`backpressure:state` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureState {
    pub stream_id: String,
    pub severity: BackpressureSeverity,
    pub action: BackpressureAction,
    pub current_inflight: usize,
    pub max_inflight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_exceeded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_delay_ms: Option<u64>,
}

impl BackpressureState {
    /// Calculate state from current conditions.
    pub fn calculate(
        stream_id: &str,
        current_inflight: usize,
        max_inflight: usize,
        thresholds: &BackpressureThresholds,
    ) -> Self {
        let severity = thresholds.severity(current_inflight);
        let action = thresholds.action(severity);

        let threshold_exceeded = match severity {
            BackpressureSeverity::Low => None,
            BackpressureSeverity::Medium => Some("low".to_string()),
            BackpressureSeverity::High => Some("medium".to_string()),
        };

        let delay = recommended_delay_ms(severity);

        Self {
            stream_id: stream_id.to_string(),
            severity,
            action,
            current_inflight,
            max_inflight,
            threshold_exceeded,
            recommended_delay_ms: (delay > 0).then_some(delay),
        }
    }

    /// True when in-flight exceeds the critical threshold.
    pub fn should_reject(&self) -> bool {
        self.current_inflight > CRITICAL_INFLIGHT_THRESHOLD
    }

    pub fn is_healthy(&self) -> bool {
        self.severity == BackpressureSeverity::Low
    }
}
