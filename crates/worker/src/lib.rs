//! Media worker
//!
//! Binds the media pipeline orchestrator to the STS peer client: segments
//! in, dubbed (or fallback) A/V pairs out, with flow control and resilience
//! in between.

pub mod peer;
pub mod runner;
pub mod settings;

pub use peer::{backoff_delay, spawn_peer, PeerConfig, PeerHandle, PeerNotification};
pub use runner::{run, run_with_peer, WorkerConfig, WorkerError};
pub use settings::WorkerSettings;
