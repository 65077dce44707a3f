//! Backpressure controller
//!
//! Thin stateful wrapper over the severity bands in `livedub_core`: tracks
//! the in-flight count, recomputes severity on every change (no hysteresis)
//! and reports a state exactly once per severity transition, including the
//! first computation.

use parking_lot::Mutex;

use livedub_core::backpressure::{
    BackpressureSeverity, BackpressureState, BackpressureThresholds, CRITICAL_INFLIGHT_THRESHOLD,
};

struct Inner {
    current_inflight: usize,
    last_emitted: Option<BackpressureSeverity>,
}

/// Per-session backpressure controller.
pub struct BackpressureController {
    stream_id: String,
    max_inflight: usize,
    thresholds: BackpressureThresholds,
    inner: Mutex<Inner>,
}

impl BackpressureController {
    pub fn new(stream_id: impl Into<String>, max_inflight: usize) -> Self {
        Self::with_thresholds(stream_id, max_inflight, BackpressureThresholds::default())
    }

    pub fn with_thresholds(
        stream_id: impl Into<String>,
        max_inflight: usize,
        thresholds: BackpressureThresholds,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            max_inflight,
            thresholds,
            inner: Mutex::new(Inner {
                current_inflight: 0,
                last_emitted: None,
            }),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    pub fn current_inflight(&self) -> usize {
        self.inner.lock().current_inflight
    }

    /// Increment and return the new in-flight count.
    pub fn increment(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.current_inflight += 1;
        inner.current_inflight
    }

    /// Decrement (saturating at zero) and return the new in-flight count.
    pub fn decrement(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.current_inflight = inner.current_inflight.saturating_sub(1);
        inner.current_inflight
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.current_inflight = 0;
        inner.last_emitted = None;
    }

    /// True above the critical threshold: new fragments must be rejected.
    pub fn should_reject(&self) -> bool {
        self.inner.lock().current_inflight > CRITICAL_INFLIGHT_THRESHOLD
    }

    pub fn severity(&self) -> BackpressureSeverity {
        self.thresholds.severity(self.inner.lock().current_inflight)
    }

    pub fn is_healthy(&self) -> bool {
        self.severity() == BackpressureSeverity::Low
    }

    /// Current state snapshot.
    pub fn state(&self) -> BackpressureState {
        let inflight = self.inner.lock().current_inflight;
        BackpressureState::calculate(&self.stream_id, inflight, self.max_inflight, &self.thresholds)
    }

    /// Return a state to emit iff severity changed since the last emission
    /// (the first computation always emits). This keeps the event channel
    /// free of per-fragment chatter.
    pub fn state_transition(&self) -> Option<BackpressureState> {
        let mut inner = self.inner.lock();
        let severity = self.thresholds.severity(inner.current_inflight);
        if inner.last_emitted == Some(severity) {
            return None;
        }
        inner.last_emitted = Some(severity);
        Some(BackpressureState::calculate(
            &self.stream_id,
            inner.current_inflight,
            self.max_inflight,
            &self.thresholds,
        ))
    }
}
