//! Circuit breaker over the STS peer
//!
//! Closed -> Open after N consecutive retryable failures; Open -> HalfOpen
//! after the cooldown; HalfOpen -> Closed on the first success, back to Open
//! on any failure. Non-retryable errors are surfaced without touching the
//! counter. While Open, dispatches bypass the STS path and fallback audio is
//! used.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

/// Breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive retryable failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time spent Open before probing with HalfOpen.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Breaker states, exposed as a gauge (0/1/2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    transitions: u64,
}

/// Per-session circuit breaker.
pub struct CircuitBreaker {
    stream_id: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(stream_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            stream_id: stream_id.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                transitions: 0,
            }),
        }
    }

    /// Current state, promoting Open to HalfOpen once the cooldown elapses.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether a dispatch may go to the peer right now.
    ///
    /// HalfOpen allows a single probe; Open forces the fallback path.
    pub fn allow_request(&self) -> bool {
        !matches!(self.state(), BreakerState::Open)
    }

    /// Record a successful peer response.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.consecutive_failures = 0;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    /// Record a peer failure. Only retryable errors count toward the trip
    /// threshold; a failure during HalfOpen reopens immediately.
    pub fn record_failure(&self, retryable: bool) {
        if !retryable {
            return;
        }

        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn transitions(&self) -> u64 {
        self.inner.lock().transitions
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.cooldown)
                .unwrap_or(true);
            if elapsed {
                self.transition(inner, BreakerState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.transitions += 1;
        if to == BreakerState::Closed {
            inner.opened_at = None;
        }

        gauge!("worker_sts_breaker_state", "stream_id" => self.stream_id.clone())
            .set(to.gauge_value());
        counter!("worker_sts_breaker_transitions_total", "stream_id" => self.stream_id.clone())
            .increment(1);
        tracing::info!(
            stream_id = %self.stream_id,
            from = ?from,
            to = ?to,
            "circuit breaker transition"
        );
    }
}
