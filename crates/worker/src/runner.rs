//! Worker runner
//!
//! Binds the media pipeline to the STS peer: segments are split into video
//! (buffered for re-pairing) and audio (dispatched for dubbing), results and
//! fallbacks are merged back in sequence order and recombined with the
//! buffered video for egress. Backpressure, timeouts and breaker trips all
//! land on the same audio-dispatch path, so dubbed audio is never silently
//! missing: either the synthesized audio ships or the original audio does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use livedub_core::backpressure::BackpressureAction;
use livedub_core::error::ErrorCode;
use livedub_core::events::{ClientEvent, ServerEvent, StreamConfig};
use livedub_core::fragment::{
    AudioPayload, FragmentEnvelope, FragmentResult, ProcessingStatus,
};
use livedub_flow::{
    BreakerConfig, CircuitBreaker, FragmentQueue, FragmentTracker, TrackerConfig,
};
use livedub_media::{
    AudioSegment, AvSyncConfig, AvSyncManager, EgressConfig, EgressSink, IngestConfig,
    SegmentPair, SegmentSource, SegmenterConfig,
};

use crate::peer::{spawn_peer, PeerConfig, PeerHandle, PeerNotification};

/// Worker configuration.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    pub stream: StreamConfig,
    pub peer: PeerConfig,
    pub breaker: BreakerConfig,
    pub av_sync: AvSyncConfig,
    pub ingest: IngestConfig,
    pub egress: EgressConfig,
    pub segmenter: SegmenterConfig,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Reconnection exhausted; the supervisor must restart the process.
    #[error("STS peer reconnection exhausted")]
    PeerExhausted,
}

struct OriginalAudio {
    batch_number: u64,
    t0_ns: u64,
    duration_ns: u64,
    audio: Arc<[u8]>,
}

struct Shared {
    stream_id: String,
    av_sync: AvSyncManager,
    tracker: FragmentTracker,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<FragmentQueue>,
    /// Original ingest audio per dispatched sequence, for fallback and
    /// re-pairing.
    originals: Mutex<HashMap<u64, OriginalAudio>>,
    paused: AtomicBool,
    slowdown_ms: AtomicU64,
}

impl Shared {
    fn record_fallback(&self) {
        counter!("worker_fallback_total", "stream_id" => self.stream_id.clone()).increment(1);
    }
}

/// Run the worker against a live STS peer connection.
pub async fn run(
    config: WorkerConfig,
    source: impl SegmentSource,
    sink: impl EgressSink + 'static,
) -> Result<(), WorkerError> {
    let (peer, notify_rx, peer_task) = spawn_peer(config.peer.clone(), config.stream.clone());
    let result = run_with_peer(config, source, sink, peer, notify_rx).await;
    peer_task.abort();
    result
}

/// Run the worker with an externally provided peer channel (also the seam
/// used by tests).
pub async fn run_with_peer(
    config: WorkerConfig,
    mut source: impl SegmentSource,
    mut sink: impl EgressSink + 'static,
    peer: PeerHandle,
    mut notify_rx: mpsc::Receiver<PeerNotification>,
) -> Result<(), WorkerError> {
    let stream_id = config.stream.stream_id.clone();

    let shared = Arc::new(Shared {
        stream_id: stream_id.clone(),
        av_sync: AvSyncManager::new(config.av_sync),
        // Dispatch-side max_inflight enforcement happens here: the tracker
        // refuses registrations beyond the configured bound.
        tracker: FragmentTracker::new(TrackerConfig {
            capacity: config.stream.max_inflight,
            timeout: Duration::from_millis(config.stream.timeout_ms),
            ..Default::default()
        }),
        breaker: Arc::new(CircuitBreaker::new(stream_id.clone(), config.breaker)),
        queue: Arc::new(FragmentQueue::new(stream_id.clone(), 0)),
        originals: Mutex::new(HashMap::new()),
        paused: AtomicBool::new(false),
        slowdown_ms: AtomicU64::new(0),
    });

    // Expired fragments become retryable timeout failures on the same
    // ordered path as real results.
    {
        let sweeper_shared = shared.clone();
        shared.tracker.spawn_sweeper(move |result| {
            sweeper_shared.breaker.record_failure(true);
            sweeper_shared.queue.add_result(result);
            gauge!("worker_inflight_fragments", "stream_id" => sweeper_shared.stream_id.clone())
                .set(sweeper_shared.tracker.len() as f64);
        });
    }

    // Egress task: in-order results -> audio bytes -> A/V sync -> sink.
    let (flush_tx, mut flush_rx) = mpsc::channel::<livedub_media::SyncPair>(16);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let egress_shared = shared.clone();
    let egress = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = egress_shared.queue.await_next() => {
                    recombine_and_forward(&egress_shared, result, &mut sink).await;
                }
                flushed = flush_rx.recv() => {
                    if let Some(pair) = flushed {
                        if sink.write_pair(pair).await.is_err() {
                            tracing::warn!("egress sink closed during flush");
                            return;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    });

    let mut next_seq: u64 = 0;
    let mut fatal = false;
    let mut source_open = true;
    let mut drain_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            pair = source.next_pair(), if source_open => {
                match pair {
                    Some(pair) => {
                        dispatch_segment(&shared, &config.stream, &peer, pair, &mut next_seq).await;
                    }
                    None => {
                        source_open = false;
                        tracing::info!(stream_id = %stream_id, "segment source ended");
                        let _ = peer.send(ClientEvent::StreamEnd).await;
                        drain_deadline = Some(
                            tokio::time::Instant::now()
                                + Duration::from_millis(config.stream.timeout_ms * 2),
                        );
                    }
                }
            }
            notification = notify_rx.recv() => {
                let Some(notification) = notification else { break };
                if handle_notification(&shared, notification, &mut next_seq).await {
                    fatal = true;
                    break;
                }
            }
            // After end of stream, keep servicing results until everything
            // in flight has resolved or the drain deadline passes.
            _ = tokio::time::sleep(Duration::from_millis(50)), if !source_open => {
                let egress_done = shared.originals.lock().is_empty();
                if shared.tracker.is_empty() && shared.queue.is_complete() && egress_done {
                    break;
                }
                if drain_deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    tracing::warn!(
                        inflight = shared.tracker.len(),
                        pending = shared.queue.pending_count(),
                        "drain timed out at stream end"
                    );
                    break;
                }
            }
        }
    }

    // Flush remaining video with original audio so the tail of the stream
    // is never dropped.
    let batch_audio: HashMap<u64, Arc<[u8]>> = shared
        .originals
        .lock()
        .values()
        .map(|original| (original.batch_number, original.audio.clone()))
        .collect();
    let flushed = shared
        .av_sync
        .flush_with_fallback(|video| batch_audio.get(&video.batch_number).map(|a| a.to_vec()));
    for pair in flushed {
        shared.record_fallback();
        if flush_tx.send(pair).await.is_err() {
            break;
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = egress.await;
    shared.tracker.stop_sweeper();

    if fatal {
        Err(WorkerError::PeerExhausted)
    } else {
        Ok(())
    }
}

async fn dispatch_segment(
    shared: &Arc<Shared>,
    stream: &StreamConfig,
    peer: &PeerHandle,
    pair: SegmentPair,
    next_seq: &mut u64,
) {
    let seq = *next_seq;
    *next_seq += 1;

    shared
        .av_sync
        .push_video(pair.video_segment(&shared.stream_id), pair.video.clone());
    shared.originals.lock().insert(
        seq,
        OriginalAudio {
            batch_number: pair.batch_number,
            t0_ns: pair.t0_ns,
            duration_ns: pair.duration_ns,
            audio: pair.audio.clone(),
        },
    );

    let envelope = FragmentEnvelope {
        fragment_id: Uuid::new_v4(),
        stream_id: shared.stream_id.clone(),
        sequence_number: seq,
        timestamp_ms: pair.t0_ns / 1_000_000,
        audio: AudioPayload::from_bytes(
            stream.format,
            stream.sample_rate_hz,
            stream.channels,
            pair.duration_ns / 1_000_000,
            &pair.audio,
        ),
        pts_ns: Some(pair.t0_ns),
    };

    // Honor the service's SlowDown advice.
    let slowdown = shared.slowdown_ms.load(Ordering::Relaxed);
    if slowdown > 0 {
        tokio::time::sleep(Duration::from_millis(slowdown)).await;
    }

    // Breaker open or producer pause: skip the STS path entirely and let the
    // ordered queue carry a fallback marker.
    if shared.paused.load(Ordering::Relaxed) || !shared.breaker.allow_request() {
        shared
            .queue
            .add_result(FragmentResult::rejected(&envelope, ErrorCode::BackpressureExceeded));
        return;
    }

    match shared.tracker.register(envelope.clone()) {
        Ok(()) => {
            counter!("worker_audio_fragments_total", "stream_id" => shared.stream_id.clone())
                .increment(1);
            gauge!("worker_inflight_fragments", "stream_id" => shared.stream_id.clone())
                .set(shared.tracker.len() as f64);
            if !peer
                .send(ClientEvent::FragmentData { fragment: envelope })
                .await
            {
                tracing::warn!(sequence = seq, "peer handle closed, fragment left to time out");
            }
        }
        Err(e) => {
            tracing::warn!(sequence = seq, error = %e, "dispatch refused, using fallback");
            shared
                .queue
                .add_result(FragmentResult::rejected(&envelope, ErrorCode::BackpressureExceeded));
        }
    }
}

/// Returns true when the worker must exit (peer fatal).
async fn handle_notification(
    shared: &Arc<Shared>,
    notification: PeerNotification,
    next_seq: &mut u64,
) -> bool {
    match notification {
        PeerNotification::Connected { reconnect } => {
            if reconnect {
                counter!("worker_reconnection_total", "stream_id" => shared.stream_id.clone())
                    .increment(1);
                // The consumer treats reconnection as a new session segment.
                *next_seq = 0;
                shared.queue.clear(0);
            }
            shared.paused.store(false, Ordering::Relaxed);
            shared.slowdown_ms.store(0, Ordering::Relaxed);
        }
        PeerNotification::Event(event) => handle_server_event(shared, event),
        PeerNotification::Disconnected => {
            // Resolve every in-flight fragment with fallback audio.
            let drained = shared.tracker.drain();
            tracing::warn!(
                stream_id = %shared.stream_id,
                inflight = drained.len(),
                "peer disconnected, resolving in-flight fragments with fallback"
            );
            for envelope in drained {
                shared
                    .queue
                    .add_result(FragmentResult::rejected(&envelope, ErrorCode::Timeout));
            }
            gauge!("worker_inflight_fragments", "stream_id" => shared.stream_id.clone()).set(0.0);
        }
        PeerNotification::Fatal => return true,
    }
    false
}

fn handle_server_event(shared: &Arc<Shared>, event: ServerEvent) {
    match event {
        ServerEvent::StreamReady {
            session_id,
            max_inflight,
            ..
        } => {
            tracing::info!(
                stream_id = %shared.stream_id,
                session_id = %session_id,
                max_inflight,
                "STS stream ready"
            );
        }
        ServerEvent::FragmentAck { fragment_id, .. } => {
            tracing::trace!(fragment_id = %fragment_id, "fragment acknowledged");
        }
        ServerEvent::FragmentProcessed { result } => {
            if shared.tracker.resolve(result.fragment_id).is_none() {
                // Already expired or from a previous session segment.
                tracing::debug!(
                    sequence = result.sequence_number,
                    "late fragment result dropped"
                );
                return;
            }
            gauge!("worker_inflight_fragments", "stream_id" => shared.stream_id.clone())
                .set(shared.tracker.len() as f64);

            match result.status {
                ProcessingStatus::Failed => {
                    let retryable = result.error.as_ref().is_some_and(|e| e.retryable);
                    shared.breaker.record_failure(retryable);
                }
                _ => shared.breaker.record_success(),
            }
            shared.queue.add_result(result);
        }
        ServerEvent::BackpressureState { state } => {
            counter!(
                "worker_backpressure_events_total",
                "stream_id" => shared.stream_id.clone(),
                "action" => format!("{:?}", state.action).to_lowercase(),
            )
            .increment(1);
            match state.action {
                BackpressureAction::Pause => {
                    shared.paused.store(true, Ordering::Relaxed);
                }
                BackpressureAction::SlowDown => {
                    shared.paused.store(false, Ordering::Relaxed);
                    shared
                        .slowdown_ms
                        .store(state.recommended_delay_ms.unwrap_or(500), Ordering::Relaxed);
                }
                BackpressureAction::None => {
                    shared.paused.store(false, Ordering::Relaxed);
                    shared.slowdown_ms.store(0, Ordering::Relaxed);
                }
            }
        }
        ServerEvent::StreamComplete { stats } => {
            tracing::info!(
                stream_id = %shared.stream_id,
                total = stats.total_fragments,
                success = stats.success_count,
                failed = stats.failed_count,
                "STS stream complete"
            );
        }
        ServerEvent::Error { error } => {
            tracing::warn!(
                stream_id = %shared.stream_id,
                code = ?error.code,
                message = %error.message,
                "STS error event"
            );
            if error.retryable {
                shared.breaker.record_failure(true);
            }
        }
    }
}

/// Map an in-order result to audio bytes (dubbed or original fallback),
/// recombine with buffered video and forward downstream.
async fn recombine_and_forward(
    shared: &Arc<Shared>,
    result: FragmentResult,
    sink: &mut impl EgressSink,
) {
    let Some(original) = shared.originals.lock().remove(&result.sequence_number) else {
        tracing::debug!(
            sequence = result.sequence_number,
            "result without original segment, dropped"
        );
        return;
    };

    let audio_bytes: Arc<[u8]> = match result.status {
        ProcessingStatus::Success | ProcessingStatus::Partial => {
            match result.dubbed_audio.as_ref().and_then(|a| a.decode().ok()) {
                Some(bytes) => bytes.into(),
                None => {
                    shared.record_fallback();
                    original.audio.clone()
                }
            }
        }
        ProcessingStatus::Failed => {
            shared.record_fallback();
            original.audio.clone()
        }
    };

    let audio_segment = AudioSegment {
        stream_id: shared.stream_id.clone(),
        batch_number: original.batch_number,
        t0_ns: original.t0_ns,
        duration_ns: original.duration_ns,
    };

    if let Some(pair) = shared.av_sync.push_audio(audio_segment, audio_bytes) {
        gauge!("worker_av_sync_delta_ms", "stream_id" => shared.stream_id.clone())
            .set(shared.av_sync.sync_delta_ms());
        if sink.write_pair(pair).await.is_err() {
            tracing::warn!("egress sink closed");
        }
    }
}
