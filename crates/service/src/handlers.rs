//! STS event handlers
//!
//! Translates the wire events into session lifecycle and fragment
//! processing. Invariants honored here: init is idempotent per
//! `(sid, stream_id)` and a second init before end is rejected; the ack is
//! serialized before processing starts; backpressure is emitted only on
//! severity transitions; results are emitted in strict sequence order; on
//! disconnect the session is deleted and buffered results are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use livedub_core::error::{ErrorCode, ErrorResponse};
use livedub_core::events::{Capabilities, ClientEvent, ServerEvent, StreamConfig};
use livedub_core::fragment::{AckStatus, FragmentEnvelope, FragmentResult};
use livedub_flow::BackpressureController;
use livedub_pipeline::PipelineCoordinator;

use crate::session::{SessionRef, SessionStore, StreamState};

struct SessionRuntime {
    backpressure: BackpressureController,
    limiter: Arc<Semaphore>,
}

/// Handles one socket's events against the shared store and pipeline.
pub struct EventHandler {
    store: Arc<SessionStore>,
    coordinator: Arc<PipelineCoordinator>,
    runtimes: Mutex<HashMap<String, Arc<SessionRuntime>>>,
}

impl EventHandler {
    pub fn new(store: Arc<SessionStore>, coordinator: Arc<PipelineCoordinator>) -> Self {
        Self {
            store,
            coordinator,
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    /// Dispatch one inbound event.
    pub async fn handle_event(
        self: &Arc<Self>,
        sid: &str,
        event: ClientEvent,
        out: &mpsc::Sender<ServerEvent>,
    ) {
        match event {
            ClientEvent::StreamInit { config } => self.on_stream_init(sid, config, out).await,
            ClientEvent::FragmentData { fragment } => {
                self.on_fragment_data(sid, fragment, out).await
            }
            ClientEvent::StreamPause => self.on_pause(sid, out).await,
            ClientEvent::StreamResume => self.on_resume(sid, out).await,
            ClientEvent::StreamEnd => self.on_stream_end(sid, out).await,
        }
    }

    /// Socket closed without `stream:end`: drop the session and everything
    /// buffered for it.
    pub async fn handle_disconnect(&self, sid: &str) {
        self.runtimes.lock().remove(sid);
        if let Some(session) = self.store.delete(sid) {
            let session = session.lock().await;
            tracing::info!(
                sid = %sid,
                stream_id = %session.stream_id,
                pending = session.pending_count(),
                inflight = session.inflight_count,
                "socket disconnected, session deleted"
            );
        }
    }

    async fn on_stream_init(
        self: &Arc<Self>,
        sid: &str,
        config: StreamConfig,
        out: &mpsc::Sender<ServerEvent>,
    ) {
        if let Some(existing) = self.store.get_by_sid(sid) {
            let session = existing.lock().await;
            if session.stream_id == config.stream_id
                && session.state != StreamState::Completed
            {
                // Idempotent re-init for the same (sid, stream_id)
                let _ = out
                    .send(ServerEvent::StreamReady {
                        session_id: session.session_id.clone(),
                        max_inflight: session.config.max_inflight,
                        capabilities: Capabilities::default(),
                    })
                    .await;
            } else {
                let _ = out
                    .send(ServerEvent::Error {
                        error: ErrorResponse::from_code(ErrorCode::InvalidConfig)
                            .with_message("stream already initialized on this connection"),
                    })
                    .await;
            }
            return;
        }

        if let Err(e) = config.validate() {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::InvalidConfig)
                        .with_message(e.to_string()),
                })
                .await;
            return;
        }

        let max_inflight = config.max_inflight;
        let stream_id = config.stream_id.clone();
        let session = self.store.create(sid, config);
        let session_id = {
            let mut session = session.lock().await;
            session.transition_to(StreamState::Ready);
            session.session_id.clone()
        };

        self.runtimes.lock().insert(
            sid.to_string(),
            Arc::new(SessionRuntime {
                backpressure: BackpressureController::new(stream_id.clone(), max_inflight),
                limiter: Arc::new(Semaphore::new(max_inflight)),
            }),
        );

        tracing::info!(sid = %sid, stream_id = %stream_id, "stream session ready");
        let _ = out
            .send(ServerEvent::StreamReady {
                session_id,
                max_inflight,
                capabilities: Capabilities::default(),
            })
            .await;
    }

    async fn on_fragment_data(
        self: &Arc<Self>,
        sid: &str,
        fragment: FragmentEnvelope,
        out: &mpsc::Sender<ServerEvent>,
    ) {
        let received_at = Instant::now();

        let Some(session_ref) = self.store.get_by_sid(sid) else {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::StreamNotFound),
                })
                .await;
            return;
        };
        let runtime = self.runtimes.lock().get(sid).cloned();
        let Some(runtime) = runtime else {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::StreamNotFound),
                })
                .await;
            return;
        };

        {
            let session = session_ref.lock().await;
            if !session.can_accept_fragments() {
                let code = if session.state == StreamState::Paused {
                    ErrorCode::StreamPaused
                } else {
                    ErrorCode::StreamNotFound
                };
                let _ = out
                    .send(ServerEvent::Error {
                        error: ErrorResponse::from_code(code),
                    })
                    .await;
                return;
            }
        }

        if let Err(e) = fragment.audio.validate() {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::InvalidAudioFormat)
                        .with_message(e.to_string()),
                })
                .await;
            return;
        }

        if runtime.backpressure.should_reject() {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::BackpressureExceeded),
                })
                .await;
            return;
        }

        // Ack before processing begins
        let _ = out
            .send(ServerEvent::FragmentAck {
                fragment_id: fragment.fragment_id,
                status: AckStatus::Queued,
                timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
                queue_position: Some(runtime.backpressure.current_inflight()),
                estimated_completion_ms: None,
            })
            .await;
        metrics::histogram!("sts_ack_latency_seconds")
            .record(received_at.elapsed().as_secs_f64());

        {
            let mut session = session_ref.lock().await;
            session.increment_inflight();
        }
        let inflight = runtime.backpressure.increment();
        metrics::gauge!("sts_fragments_in_flight", "stream_id" => fragment.stream_id.clone())
            .set(inflight as f64);
        self.emit_backpressure(&runtime, out).await;

        // Bounded worker pool: concurrency per session is max_inflight.
        let handler = self.clone();
        let out = out.clone();
        let sid = sid.to_string();
        tokio::spawn(async move {
            let Ok(_permit) = runtime.limiter.acquire().await else {
                return;
            };

            let session_config = { session_ref.lock().await.config.clone() };
            let result = handler
                .coordinator
                .process_fragment(&fragment, &session_config)
                .await;

            let status = result.status;
            metrics::histogram!(
                "sts_fragment_processing_seconds",
                "stream_id" => fragment.stream_id.clone(),
            )
            .record(result.processing_time_ms as f64 / 1000.0);

            handler
                .emit_in_order(&session_ref, result, &out)
                .await;

            {
                let mut session = session_ref.lock().await;
                session.decrement_inflight();
            }
            let inflight = runtime.backpressure.decrement();
            metrics::gauge!("sts_fragments_in_flight", "stream_id" => fragment.stream_id.clone())
                .set(inflight as f64);
            handler.emit_backpressure(&runtime, &out).await;

            tracing::debug!(
                sid = %sid,
                sequence = fragment.sequence_number,
                status = ?status,
                "fragment completed"
            );

            handler.finish_if_complete(&sid, &session_ref, &out).await;
        });
    }

    async fn on_pause(&self, sid: &str, out: &mpsc::Sender<ServerEvent>) {
        let Some(session_ref) = self.store.get_by_sid(sid) else {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::StreamNotFound),
                })
                .await;
            return;
        };
        let mut session = session_ref.lock().await;
        session.transition_to(StreamState::Paused);
    }

    async fn on_resume(&self, sid: &str, out: &mpsc::Sender<ServerEvent>) {
        let Some(session_ref) = self.store.get_by_sid(sid) else {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::StreamNotFound),
                })
                .await;
            return;
        };
        let mut session = session_ref.lock().await;
        session.transition_to(StreamState::Ready);
    }

    async fn on_stream_end(self: &Arc<Self>, sid: &str, out: &mpsc::Sender<ServerEvent>) {
        let Some(session_ref) = self.store.get_by_sid(sid) else {
            let _ = out
                .send(ServerEvent::Error {
                    error: ErrorResponse::from_code(ErrorCode::StreamNotFound),
                })
                .await;
            return;
        };
        {
            let mut session = session_ref.lock().await;
            session.mark_stream_end();
        }
        self.finish_if_complete(sid, &session_ref, out).await;
    }

    /// Buffer the result and emit the contiguous run, recording statistics
    /// per emitted fragment. The session mutex serializes emission order.
    async fn emit_in_order(
        &self,
        session_ref: &SessionRef,
        result: FragmentResult,
        out: &mpsc::Sender<ServerEvent>,
    ) {
        let mut session = session_ref.lock().await;
        session.add_pending_fragment(result);
        for ready in session.fragments_to_emit() {
            session
                .statistics
                .record_fragment(ready.status, ready.processing_time_ms);
            let _ = out.send(ServerEvent::FragmentProcessed { result: ready }).await;
        }
    }

    async fn emit_backpressure(&self, runtime: &SessionRuntime, out: &mpsc::Sender<ServerEvent>) {
        if let Some(state) = runtime.backpressure.state_transition() {
            tracing::info!(
                stream_id = %state.stream_id,
                severity = ?state.severity,
                inflight = state.current_inflight,
                "backpressure severity transition"
            );
            let _ = out.send(ServerEvent::BackpressureState { state }).await;
        }
    }

    /// When Ending and fully drained: Completed, stats out, session deleted.
    async fn finish_if_complete(
        &self,
        sid: &str,
        session_ref: &SessionRef,
        out: &mpsc::Sender<ServerEvent>,
    ) {
        let stats = {
            let mut session = session_ref.lock().await;
            if session.state != StreamState::Ending || !session.is_complete() {
                return;
            }
            session.transition_to(StreamState::Completed);
            session.statistics.to_complete_stats(session.duration_ms())
        };

        self.runtimes.lock().remove(sid);
        self.store.delete(sid);
        let _ = out.send(ServerEvent::StreamComplete { stats }).await;
    }
}
