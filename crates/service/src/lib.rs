//! STS service
//!
//! The processing side of the dubbing pipeline: accepts the worker's event
//! channel over WebSocket, runs ASR -> Translation -> TTS per fragment and
//! emits results in strict sequence order.

pub mod handlers;
pub mod server;
pub mod session;
pub mod settings;

pub use handlers::EventHandler;
pub use server::{router, AppState};
pub use session::{SessionStatistics, SessionStore, StreamSession, StreamState};
pub use settings::ServiceSettings;
