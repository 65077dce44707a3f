//! In-flight fragment tracker
//!
//! Bounded table of dispatched fragments keyed by fragment id. A background
//! sweeper synthesizes retryable `TIMEOUT` failures for expired entries and
//! frees the slot; a late result for an already-expired fragment is dropped
//! by the caller when `resolve` returns None.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use livedub_core::fragment::{FragmentEnvelope, FragmentResult};

/// Tracker configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Maximum simultaneously tracked fragments.
    pub capacity: usize,
    /// Deadline applied at registration.
    pub timeout: Duration,
    /// Sweep cadence.
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            timeout: Duration::from_millis(8_000),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker is full ({capacity} in flight)")]
    Full { capacity: usize },
    #[error("fragment {0} is already tracked")]
    Duplicate(Uuid),
}

struct InFlight {
    envelope: FragmentEnvelope,
    deadline: Instant,
}

/// Bounded in-flight table with timeout sweep.
pub struct FragmentTracker {
    config: TrackerConfig,
    inflight: Arc<Mutex<HashMap<Uuid, InFlight>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl FragmentTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Mutex::new(None),
        }
    }

    /// Register a dispatched fragment with `deadline = now + timeout`.
    pub fn register(&self, envelope: FragmentEnvelope) -> Result<(), TrackerError> {
        let mut inflight = self.inflight.lock();
        if inflight.len() >= self.config.capacity {
            return Err(TrackerError::Full {
                capacity: self.config.capacity,
            });
        }
        let id = envelope.fragment_id;
        if inflight.contains_key(&id) {
            return Err(TrackerError::Duplicate(id));
        }
        inflight.insert(
            id,
            InFlight {
                envelope,
                deadline: Instant::now() + self.config.timeout,
            },
        );
        Ok(())
    }

    /// Remove a fragment on acknowledgment or final result.
    ///
    /// Returns None when the fragment already expired (late result; the
    /// caller must drop it).
    pub fn resolve(&self, fragment_id: Uuid) -> Option<FragmentEnvelope> {
        self.inflight
            .lock()
            .remove(&fragment_id)
            .map(|entry| entry.envelope)
    }

    /// Drain every tracked fragment (peer disconnect path).
    pub fn drain(&self) -> Vec<FragmentEnvelope> {
        self.inflight
            .lock()
            .drain()
            .map(|(_, entry)| entry.envelope)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }

    /// Start the background sweeper. Each expired entry is freed and handed
    /// to `on_timeout` as a synthesized retryable timeout failure.
    ///
    /// The sweeper stops when the tracker is dropped or `stop_sweeper` is
    /// called.
    pub fn spawn_sweeper(
        &self,
        on_timeout: impl Fn(FragmentResult) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let inflight = self.inflight.clone();
        let timeout_ms = self.config.timeout.as_millis() as u64;
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let expired: Vec<FragmentEnvelope> = {
                            let mut table = inflight.lock();
                            let ids: Vec<Uuid> = table
                                .iter()
                                .filter(|(_, entry)| entry.deadline <= now)
                                .map(|(id, _)| *id)
                                .collect();
                            ids.into_iter()
                                .filter_map(|id| table.remove(&id))
                                .map(|entry| entry.envelope)
                                .collect()
                        };

                        for envelope in expired {
                            tracing::warn!(
                                stream_id = %envelope.stream_id,
                                fragment_id = %envelope.fragment_id,
                                sequence = envelope.sequence_number,
                                "fragment timed out in flight"
                            );
                            on_timeout(FragmentResult::timeout(&envelope, timeout_ms));
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stop the background sweeper, if running.
    pub fn stop_sweeper(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for FragmentTracker {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use livedub_core::error::ErrorCode;
    use livedub_core::fragment::{AudioFormat, AudioPayload, ProcessingStatus};

    fn envelope(seq: u64) -> FragmentEnvelope {
        FragmentEnvelope {
            fragment_id: Uuid::new_v4(),
            stream_id: "stream-1".into(),
            sequence_number: seq,
            timestamp_ms: seq * 6_000,
            audio: AudioPayload::from_bytes(AudioFormat::PcmF32le, 16_000, 1, 6_000, &[0u8; 16]),
            pts_ns: None,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let tracker = FragmentTracker::new(TrackerConfig::default());
        let env = envelope(0);
        let id = env.fragment_id;

        tracker.register(env).unwrap();
        assert_eq!(tracker.len(), 1);

        let resolved = tracker.resolve(id).unwrap();
        assert_eq!(resolved.sequence_number, 0);
        assert!(tracker.is_empty());

        // Second resolve is a late result: dropped
        assert!(tracker.resolve(id).is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let tracker = FragmentTracker::new(TrackerConfig {
            capacity: 2,
            ..Default::default()
        });
        tracker.register(envelope(0)).unwrap();
        tracker.register(envelope(1)).unwrap();
        assert!(matches!(
            tracker.register(envelope(2)),
            Err(TrackerError::Full { capacity: 2 })
        ));
    }

    #[test]
    fn test_duplicate_rejected() {
        let tracker = FragmentTracker::new(TrackerConfig::default());
        let env = envelope(0);
        let dup = env.clone();
        tracker.register(env).unwrap();
        assert!(matches!(
            tracker.register(dup),
            Err(TrackerError::Duplicate(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_synthesizes_timeouts() {
        let tracker = FragmentTracker::new(TrackerConfig {
            capacity: 8,
            timeout: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(100),
        });

        let timeouts = Arc::new(Mutex::new(Vec::new()));
        let sink = timeouts.clone();
        let handle = tracker.spawn_sweeper(move |result| {
            sink.lock().push(result);
        });

        tracker.register(envelope(3)).unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(tracker.len(), 1);

        tokio::time::advance(Duration::from_millis(400)).await;
        // Let the sweeper task run
        tokio::task::yield_now().await;

        let results = timeouts.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sequence_number, 3);
        assert_eq!(results[0].status, ProcessingStatus::Failed);
        let error = results[0].error.as_ref().unwrap();
        assert_eq!(error.code, ErrorCode::Timeout);
        assert!(error.retryable);
        drop(results);

        // Slot was freed regardless of a late result arriving
        assert!(tracker.is_empty());

        tracker.stop_sweeper();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_counts_each_fragment_once() {
        let tracker = FragmentTracker::new(TrackerConfig {
            capacity: 8,
            timeout: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(100),
        });

        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        tracker.spawn_sweeper(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        tracker.register(envelope(0)).unwrap();
        tracker.register(envelope(1)).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
        tracker.stop_sweeper();
    }

    #[test]
    fn test_drain_returns_everything() {
        let tracker = FragmentTracker::new(TrackerConfig::default());
        tracker.register(envelope(0)).unwrap();
        tracker.register(envelope(1)).unwrap();

        let drained = tracker.drain();
        assert_eq!(drained.len(), 2);
        assert!(tracker.is_empty());
    }
}
