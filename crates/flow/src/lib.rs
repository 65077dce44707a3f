//! Flow control and resilience primitives
//!
//! The pieces that keep the dubbing pipeline continuous under asynchronous
//! model latencies and partial failures: a bounded in-flight tracker with
//! timeout sweep, a band-based backpressure controller, a circuit breaker
//! over the STS peer, and the sequence-ordered delivery queue.

pub mod backpressure;
pub mod breaker;
pub mod queue;
pub mod tracker;

pub use backpressure::BackpressureController;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use queue::{FragmentQueue, GapInfo};
pub use tracker::{FragmentTracker, TrackerConfig, TrackerError};
