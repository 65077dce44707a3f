//! Stream sessions and the session store
//!
//! One session per socket connection, identified by `(socket_id, stream_id)`.
//! Sessions are ephemeral: they live in memory and die with the connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use livedub_core::events::{StreamCompleteStats, StreamConfig};
use livedub_core::fragment::{FragmentResult, ProcessingStatus};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Initializing,
    Ready,
    Paused,
    Ending,
    Completed,
}

/// Per-session statistics feeding `stream:complete`.
#[derive(Debug, Default, Clone)]
pub struct SessionStatistics {
    pub total_fragments: u64,
    pub success_count: u64,
    pub partial_count: u64,
    pub failed_count: u64,
    total_processing_time_ms: f64,
    processing_times: Vec<f64>,
}

impl SessionStatistics {
    pub fn record_fragment(&mut self, status: ProcessingStatus, processing_time_ms: u64) {
        self.total_fragments += 1;
        self.total_processing_time_ms += processing_time_ms as f64;
        self.processing_times.push(processing_time_ms as f64);
        match status {
            ProcessingStatus::Success => self.success_count += 1,
            ProcessingStatus::Partial => self.partial_count += 1,
            ProcessingStatus::Failed => self.failed_count += 1,
        }
    }

    pub fn avg_processing_time_ms(&self) -> f64 {
        if self.total_fragments == 0 {
            return 0.0;
        }
        self.total_processing_time_ms / self.total_fragments as f64
    }

    pub fn p95_processing_time_ms(&self) -> f64 {
        if self.processing_times.is_empty() {
            return 0.0;
        }
        let mut sorted = self.processing_times.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("no NaN timings"));
        let idx = (sorted.len() as f64 * 0.95) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn to_complete_stats(&self, duration_ms: u64) -> StreamCompleteStats {
        StreamCompleteStats {
            total_fragments: self.total_fragments,
            success_count: self.success_count,
            partial_count: self.partial_count,
            failed_count: self.failed_count,
            avg_processing_time_ms: self.avg_processing_time_ms(),
            p95_processing_time_ms: self.p95_processing_time_ms(),
            duration_ms,
        }
    }
}

/// Per-stream session state.
pub struct StreamSession {
    pub sid: String,
    pub stream_id: String,
    pub worker_id: String,
    pub session_id: String,
    pub state: StreamState,
    pub created_at: DateTime<Utc>,
    pub config: StreamConfig,
    pub inflight_count: usize,
    pub next_sequence_to_emit: u64,
    pending: HashMap<u64, FragmentResult>,
    pub statistics: SessionStatistics,
    stream_end_received: bool,
}

impl StreamSession {
    pub fn new(sid: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            sid: sid.into(),
            stream_id: config.stream_id.clone(),
            worker_id: config.worker_id.clone(),
            session_id: Uuid::new_v4().to_string(),
            state: StreamState::Initializing,
            created_at: Utc::now(),
            config,
            inflight_count: 0,
            next_sequence_to_emit: 0,
            pending: HashMap::new(),
            statistics: SessionStatistics::default(),
            stream_end_received: false,
        }
    }

    /// Transition if valid. Completed is terminal.
    pub fn transition_to(&mut self, new_state: StreamState) -> bool {
        let valid = match self.state {
            StreamState::Initializing => matches!(new_state, StreamState::Ready),
            StreamState::Ready => {
                matches!(new_state, StreamState::Paused | StreamState::Ending)
            }
            StreamState::Paused => {
                matches!(new_state, StreamState::Ready | StreamState::Ending)
            }
            StreamState::Ending => matches!(new_state, StreamState::Completed),
            StreamState::Completed => false,
        };
        if valid {
            tracing::debug!(
                stream_id = %self.stream_id,
                from = ?self.state,
                to = ?new_state,
                "session state transition"
            );
            self.state = new_state;
        }
        valid
    }

    /// Fragments are accepted only in Ready.
    pub fn can_accept_fragments(&self) -> bool {
        self.state == StreamState::Ready
    }

    pub fn mark_stream_end(&mut self) {
        self.stream_end_received = true;
        if matches!(self.state, StreamState::Ready | StreamState::Paused) {
            self.transition_to(StreamState::Ending);
        }
    }

    /// End received and all in-flight work drained.
    pub fn is_complete(&self) -> bool {
        self.stream_end_received && self.inflight_count == 0
    }

    pub fn increment_inflight(&mut self) {
        self.inflight_count += 1;
    }

    pub fn decrement_inflight(&mut self) {
        self.inflight_count = self.inflight_count.saturating_sub(1);
    }

    /// Buffer a completed result for in-order emission.
    pub fn add_pending_fragment(&mut self, result: FragmentResult) {
        self.pending.insert(result.sequence_number, result);
    }

    /// Drain the contiguous run starting at `next_sequence_to_emit`.
    pub fn fragments_to_emit(&mut self) -> Vec<FragmentResult> {
        let mut out = Vec::new();
        while let Some(result) = self.pending.remove(&self.next_sequence_to_emit) {
            out.push(result);
            self.next_sequence_to_emit += 1;
        }
        out
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn duration_ms(&self) -> u64 {
        (Utc::now() - self.created_at).num_milliseconds().max(0) as u64
    }
}

/// Dual-index in-memory session store.
///
/// Both maps are mutated only under the one mutex.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    by_sid: HashMap<String, Arc<tokio::sync::Mutex<StreamSession>>>,
    stream_to_sid: HashMap<String, String>,
}

pub type SessionRef = Arc<tokio::sync::Mutex<StreamSession>>;

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, sid: &str, config: StreamConfig) -> SessionRef {
        let session = StreamSession::new(sid, config);
        let stream_id = session.stream_id.clone();
        let session = Arc::new(tokio::sync::Mutex::new(session));

        let mut inner = self.inner.lock();
        inner.by_sid.insert(sid.to_string(), session.clone());
        inner.stream_to_sid.insert(stream_id, sid.to_string());
        metrics::gauge!("sts_sessions_active").set(inner.by_sid.len() as f64);
        session
    }

    pub fn get_by_sid(&self, sid: &str) -> Option<SessionRef> {
        self.inner.lock().by_sid.get(sid).cloned()
    }

    pub fn get_by_stream_id(&self, stream_id: &str) -> Option<SessionRef> {
        let inner = self.inner.lock();
        let sid = inner.stream_to_sid.get(stream_id)?;
        inner.by_sid.get(sid).cloned()
    }

    pub fn delete(&self, sid: &str) -> Option<SessionRef> {
        let mut inner = self.inner.lock();
        let session = inner.by_sid.remove(sid);
        if session.is_some() {
            inner.stream_to_sid.retain(|_, s| s.as_str() != sid);
        }
        metrics::gauge!("sts_sessions_active").set(inner.by_sid.len() as f64);
        session
    }

    pub fn delete_by_stream_id(&self, stream_id: &str) -> Option<SessionRef> {
        let sid = self.inner.lock().stream_to_sid.get(stream_id).cloned()?;
        self.delete(&sid)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().by_sid.len()
    }

    pub fn list_sids(&self) -> Vec<String> {
        self.inner.lock().by_sid.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stream_id: &str) -> StreamConfig {
        StreamConfig {
            stream_id: stream_id.into(),
            worker_id: "worker-1".into(),
            ..Default::default()
        }
    }

    fn ready_session() -> StreamSession {
        let mut session = StreamSession::new("sid-1", config("stream-1"));
        assert!(session.transition_to(StreamState::Ready));
        session
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = StreamSession::new("sid-1", config("stream-1"));
        assert_eq!(session.state, StreamState::Initializing);

        assert!(session.transition_to(StreamState::Ready));
        assert!(session.transition_to(StreamState::Paused));
        assert!(session.transition_to(StreamState::Ready));
        assert!(session.transition_to(StreamState::Ending));
        assert!(session.transition_to(StreamState::Completed));

        // Completed is terminal
        assert!(!session.transition_to(StreamState::Ready));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut session = StreamSession::new("sid-1", config("stream-1"));
        assert!(!session.transition_to(StreamState::Paused));
        assert!(!session.transition_to(StreamState::Completed));
        assert_eq!(session.state, StreamState::Initializing);
    }

    #[test]
    fn test_end_from_paused() {
        let mut session = ready_session();
        session.transition_to(StreamState::Paused);
        session.mark_stream_end();
        assert_eq!(session.state, StreamState::Ending);
    }

    #[test]
    fn test_accepts_fragments_only_when_ready() {
        let mut session = ready_session();
        assert!(session.can_accept_fragments());
        session.transition_to(StreamState::Paused);
        assert!(!session.can_accept_fragments());
    }

    #[test]
    fn test_completion_waits_for_inflight() {
        let mut session = ready_session();
        session.increment_inflight();
        session.mark_stream_end();
        assert!(!session.is_complete());
        session.decrement_inflight();
        assert!(session.is_complete());
    }

    #[test]
    fn test_pending_buffer_contiguous_drain() {
        use livedub_core::fragment::StageTimings;

        let mut session = ready_session();
        let result = |seq: u64| FragmentResult {
            fragment_id: Uuid::new_v4(),
            stream_id: "stream-1".into(),
            sequence_number: seq,
            status: ProcessingStatus::Success,
            dubbed_audio: None,
            transcript: None,
            translated_text: None,
            processing_time_ms: 10,
            stage_timings: StageTimings::default(),
            duration_metadata: None,
            error: None,
        };

        session.add_pending_fragment(result(2));
        assert!(session.fragments_to_emit().is_empty());

        session.add_pending_fragment(result(0));
        let emitted: Vec<u64> = session
            .fragments_to_emit()
            .iter()
            .map(|r| r.sequence_number)
            .collect();
        assert_eq!(emitted, vec![0]);

        session.add_pending_fragment(result(1));
        let emitted: Vec<u64> = session
            .fragments_to_emit()
            .iter()
            .map(|r| r.sequence_number)
            .collect();
        assert_eq!(emitted, vec![1, 2]);
        assert_eq!(session.next_sequence_to_emit, 3);
    }

    #[test]
    fn test_statistics_counts_and_p95() {
        let mut stats = SessionStatistics::default();
        for i in 0..20 {
            stats.record_fragment(ProcessingStatus::Success, 100 + i * 10);
        }
        stats.record_fragment(ProcessingStatus::Partial, 500);
        stats.record_fragment(ProcessingStatus::Failed, 900);

        assert_eq!(stats.total_fragments, 22);
        assert_eq!(stats.success_count, 20);
        assert_eq!(stats.partial_count, 1);
        assert_eq!(stats.failed_count, 1);
        assert!(stats.avg_processing_time_ms() > 0.0);
        assert!(stats.p95_processing_time_ms() >= stats.avg_processing_time_ms());
    }

    #[tokio::test]
    async fn test_store_dual_index() {
        let store = SessionStore::new();
        store.create("sid-1", config("stream-1"));

        assert!(store.get_by_sid("sid-1").is_some());
        let by_stream = store.get_by_stream_id("stream-1").unwrap();
        assert_eq!(by_stream.lock().await.sid, "sid-1");
        assert_eq!(store.count(), 1);

        store.delete("sid-1");
        assert!(store.get_by_sid("sid-1").is_none());
        assert!(store.get_by_stream_id("stream-1").is_none());
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_store_delete_by_stream_id() {
        let store = SessionStore::new();
        store.create("sid-1", config("stream-1"));
        assert!(store.delete_by_stream_id("stream-1").is_some());
        assert_eq!(store.count(), 0);
    }
}
