//! A/V synchronization manager
//!
//! Buffers video and audio segments and pairs them by batch number. Video is
//! a FIFO ordered by arrival; audio is keyed by batch number so out-of-order
//! dubbed audio still pairs correctly. Both buffers share one critical
//! section because a pair query reads both.
//!
//! Drift between the producers is tracked as an EWMA of arrival skew and
//! corrected by a gradual PTS slew, never a hard jump: each emitted pair
//! adjusts by at most `drift_threshold_ns / 4`, so a step disturbance
//! converges within four pairs.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::segment::{AudioSegment, VideoSegment};

/// Manager configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvSyncConfig {
    /// Configured lead of dubbed audio behind original video. Shifts the
    /// emitted PTS but never affects pairing.
    pub av_offset_ns: u64,
    /// Drift beyond this sets `needs_correction`.
    pub drift_threshold_ns: u64,
    /// Soft cap per buffer; the oldest element is evicted on overflow.
    pub max_buffer_size: usize,
}

impl Default for AvSyncConfig {
    fn default() -> Self {
        Self {
            av_offset_ns: 6_000_000_000,
            drift_threshold_ns: 120_000_000,
            max_buffer_size: 10,
        }
    }
}

/// Matched segment tuple leaving the manager toward egress.
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub video: VideoSegment,
    pub video_data: Arc<[u8]>,
    pub audio: AudioSegment,
    pub audio_data: Arc<[u8]>,
    /// Emission PTS: video t0 shifted by the configured A/V offset and the
    /// current slew correction.
    pub pts_ns: u64,
}

/// Buffer eviction notice, emitted for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropEvent {
    Video { batch_number: u64 },
    Audio { batch_number: u64 },
}

type DropCallback = Box<dyn Fn(DropEvent) + Send + Sync>;

struct Inner {
    video: VecDeque<(VideoSegment, Arc<[u8]>, Instant)>,
    audio: BTreeMap<u64, (AudioSegment, Arc<[u8]>, Instant)>,
    /// EWMA of audio-behind-video arrival skew, in milliseconds.
    sync_delta_ms: f64,
    /// Accumulated PTS correction applied by the slew loop.
    correction_ns: i64,
    pairs_emitted: u64,
    drops: u64,
}

/// Pairs video and audio segments by batch number.
pub struct AvSyncManager {
    config: AvSyncConfig,
    inner: Mutex<Inner>,
    on_drop: Option<DropCallback>,
}

impl AvSyncManager {
    pub fn new(config: AvSyncConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                video: VecDeque::new(),
                audio: BTreeMap::new(),
                sync_delta_ms: 0.0,
                correction_ns: 0,
                pairs_emitted: 0,
                drops: 0,
            }),
            on_drop: None,
        }
    }

    pub fn with_drop_callback(mut self, callback: impl Fn(DropEvent) + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(callback));
        self
    }

    /// Insert a video segment; returns a pair if matching audio is buffered.
    pub fn push_video(
        &self,
        segment: VideoSegment,
        data: impl Into<Arc<[u8]>>,
    ) -> Option<SyncPair> {
        let data: Arc<[u8]> = data.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some((audio, audio_data, audio_at)) = inner.audio.remove(&segment.batch_number) {
            return Some(self.emit_pair(
                &mut inner,
                segment,
                data,
                now,
                audio,
                audio_data,
                audio_at,
            ));
        }

        inner.video.push_back((segment, data, now));
        if inner.video.len() > self.config.max_buffer_size {
            if let Some((dropped, _, _)) = inner.video.pop_front() {
                inner.drops += 1;
                self.report_drop(DropEvent::Video {
                    batch_number: dropped.batch_number,
                });
            }
        }
        None
    }

    /// Insert an audio segment; returns a pair if matching video is buffered.
    pub fn push_audio(
        &self,
        segment: AudioSegment,
        data: impl Into<Arc<[u8]>>,
    ) -> Option<SyncPair> {
        let data: Arc<[u8]> = data.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(pos) = inner
            .video
            .iter()
            .position(|(v, _, _)| v.batch_number == segment.batch_number)
        {
            let (video, video_data, video_at) =
                inner.video.remove(pos).expect("position is in range");
            return Some(self.emit_pair(
                &mut inner,
                video,
                video_data,
                video_at,
                segment,
                data,
                now,
            ));
        }

        inner.audio.insert(segment.batch_number, (segment, data, now));
        if inner.audio.len() > self.config.max_buffer_size {
            if let Some((batch, _)) = inner.audio.pop_first() {
                inner.drops += 1;
                self.report_drop(DropEvent::Audio { batch_number: batch });
            }
        }
        None
    }

    /// Non-blocking drain of every currently pairable batch.
    pub fn ready_pairs(&self) -> Vec<SyncPair> {
        let mut pairs = Vec::new();
        let mut inner = self.inner.lock();

        let mut index = 0;
        while index < inner.video.len() {
            let batch = inner.video[index].0.batch_number;
            if inner.audio.contains_key(&batch) {
                let (video, video_data, video_at) =
                    inner.video.remove(index).expect("index is in range");
                let (audio, audio_data, audio_at) =
                    inner.audio.remove(&batch).expect("key just checked");
                let pair =
                    self.emit_pair(&mut inner, video, video_data, video_at, audio, audio_data, audio_at);
                pairs.push(pair);
            } else {
                index += 1;
            }
        }

        pairs
    }

    /// Flush remaining video at stream end, substituting audio from the
    /// resolver where no dubbed audio arrived. Audio without video is
    /// discarded. Both buffers are left empty.
    pub fn flush_with_fallback(
        &self,
        mut resolver: impl FnMut(&VideoSegment) -> Option<Vec<u8>>,
    ) -> Vec<SyncPair> {
        let mut inner = self.inner.lock();
        let mut pairs = Vec::new();

        while let Some((video, video_data, video_at)) = inner.video.pop_front() {
            let matched = inner.audio.remove(&video.batch_number);
            let (audio, audio_data, audio_at) = match matched {
                Some((audio, data, at)) => (audio, data, at),
                None => {
                    let Some(fallback) = resolver(&video) else {
                        inner.drops += 1;
                        self.report_drop(DropEvent::Video {
                            batch_number: video.batch_number,
                        });
                        continue;
                    };
                    let audio = AudioSegment {
                        stream_id: video.stream_id.clone(),
                        batch_number: video.batch_number,
                        t0_ns: video.t0_ns,
                        duration_ns: video.duration_ns,
                    };
                    (audio, fallback.into(), video_at)
                }
            };
            let pair =
                self.emit_pair(&mut inner, video, video_data, video_at, audio, audio_data, audio_at);
            pairs.push(pair);
        }

        for (batch, _) in std::mem::take(&mut inner.audio) {
            inner.drops += 1;
            self.report_drop(DropEvent::Audio { batch_number: batch });
        }

        pairs
    }

    /// Empty both buffers and reset sync state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.video.clear();
        inner.audio.clear();
        inner.sync_delta_ms = 0.0;
        inner.correction_ns = 0;
    }

    pub fn video_buffer_size(&self) -> usize {
        self.inner.lock().video.len()
    }

    pub fn audio_buffer_size(&self) -> usize {
        self.inner.lock().audio.len()
    }

    pub fn sync_delta_ms(&self) -> f64 {
        self.inner.lock().sync_delta_ms
    }

    pub fn av_offset_ms(&self) -> u64 {
        self.config.av_offset_ns / 1_000_000
    }

    pub fn needs_correction(&self) -> bool {
        let threshold_ms = self.config.drift_threshold_ns as f64 / 1_000_000.0;
        self.inner.lock().sync_delta_ms.abs() > threshold_ms
    }

    pub fn pairs_emitted(&self) -> u64 {
        self.inner.lock().pairs_emitted
    }

    pub fn dropped_segments(&self) -> u64 {
        self.inner.lock().drops
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_pair(
        &self,
        inner: &mut Inner,
        video: VideoSegment,
        video_data: Arc<[u8]>,
        video_at: Instant,
        audio: AudioSegment,
        audio_data: Arc<[u8]>,
        audio_at: Instant,
    ) -> SyncPair {
        // Arrival skew feeds the drift EWMA (audio later than video is
        // positive).
        let skew_ms = if audio_at >= video_at {
            audio_at.duration_since(video_at).as_secs_f64() * 1000.0
        } else {
            -(video_at.duration_since(audio_at).as_secs_f64() * 1000.0)
        };
        inner.sync_delta_ms = inner.sync_delta_ms * 0.8 + skew_ms * 0.2;

        // Bounded linear slew: correct at most threshold/4 per pair.
        let threshold_ms = self.config.drift_threshold_ns as f64 / 1_000_000.0;
        if inner.sync_delta_ms.abs() > threshold_ms {
            let max_step_ns = (self.config.drift_threshold_ns / 4) as i64;
            let drift_ns = (inner.sync_delta_ms * 1_000_000.0) as i64;
            let step = drift_ns.clamp(-max_step_ns, max_step_ns);
            inner.correction_ns -= step;
            inner.sync_delta_ms -= step as f64 / 1_000_000.0;
        }

        let pts_ns = (video.t0_ns as i64
            + self.config.av_offset_ns as i64
            + inner.correction_ns)
            .max(0) as u64;

        inner.pairs_emitted += 1;
        SyncPair {
            video,
            video_data,
            audio,
            audio_data,
            pts_ns,
        }
    }

    fn report_drop(&self, event: DropEvent) {
        let kind = match event {
            DropEvent::Video { .. } => "video",
            DropEvent::Audio { .. } => "audio",
        };
        counter!("av_sync_dropped_segments_total", "kind" => kind).increment(1);
        tracing::debug!(event = ?event, "A/V sync buffer drop");
        if let Some(callback) = &self.on_drop {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn video(batch: u64) -> VideoSegment {
        VideoSegment {
            stream_id: "test-stream".into(),
            batch_number: batch,
            t0_ns: batch * 6_000_000_000,
            duration_ns: 6_000_000_000,
        }
    }

    fn audio(batch: u64) -> AudioSegment {
        AudioSegment {
            stream_id: "test-stream".into(),
            batch_number: batch,
            t0_ns: batch * 6_000_000_000,
            duration_ns: 6_000_000_000,
        }
    }

    fn manager() -> AvSyncManager {
        AvSyncManager::new(AvSyncConfig::default())
    }

    #[test]
    fn test_video_buffers_without_audio() {
        let sync = manager();
        assert!(sync.push_video(video(0), vec![0; 1000]).is_none());
        assert_eq!(sync.video_buffer_size(), 1);
        assert_eq!(sync.audio_buffer_size(), 0);
    }

    #[test]
    fn test_audio_then_video_pairs() {
        let sync = manager();
        assert!(sync.push_audio(audio(0), vec![0; 500]).is_none());
        let pair = sync.push_video(video(0), vec![0; 1000]).unwrap();
        assert_eq!(pair.video.batch_number, 0);
        assert_eq!(pair.audio.batch_number, 0);
        assert_eq!(sync.video_buffer_size(), 0);
        assert_eq!(sync.audio_buffer_size(), 0);
    }

    #[test]
    fn test_video_then_audio_pairs() {
        let sync = manager();
        assert!(sync.push_video(video(0), vec![0; 1000]).is_none());
        let pair = sync.push_audio(audio(0), vec![0; 500]).unwrap();
        assert_eq!(pair.video.batch_number, 0);
        assert_eq!(sync.video_buffer_size(), 0);
    }

    #[test]
    fn test_out_of_order_audio_pairs_by_batch() {
        let sync = manager();
        sync.push_video(video(0), vec![0]);
        sync.push_video(video(1), vec![1]);
        sync.push_video(video(2), vec![2]);

        // Audio arrives out of order; pairing is by batch number only.
        let pair = sync.push_audio(audio(2), vec![2]).unwrap();
        assert_eq!(pair.video.batch_number, 2);
        let pair = sync.push_audio(audio(0), vec![0]).unwrap();
        assert_eq!(pair.video.batch_number, 0);
        assert_eq!(sync.video_buffer_size(), 1);
    }

    #[test]
    fn test_pts_includes_av_offset() {
        let sync = manager();
        sync.push_audio(audio(1), vec![0]);
        let pair = sync.push_video(video(1), vec![0]).unwrap();
        assert_eq!(pair.pts_ns, 6_000_000_000 + 6_000_000_000);
    }

    #[test]
    fn test_video_eviction_oldest_first() {
        let drops = Arc::new(AtomicUsize::new(0));
        let drops_seen = drops.clone();
        let sync = AvSyncManager::new(AvSyncConfig {
            max_buffer_size: 2,
            ..Default::default()
        })
        .with_drop_callback(move |event| {
            assert_eq!(event, DropEvent::Video { batch_number: 0 });
            drops_seen.fetch_add(1, Ordering::SeqCst);
        });

        for batch in 0..3 {
            sync.push_video(video(batch), vec![0]);
        }
        assert_eq!(sync.video_buffer_size(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(sync.dropped_segments(), 1);
    }

    #[test]
    fn test_audio_eviction_oldest_first() {
        let sync = AvSyncManager::new(AvSyncConfig {
            max_buffer_size: 2,
            ..Default::default()
        });
        for batch in 0..3 {
            sync.push_audio(audio(batch), vec![0]);
        }
        assert_eq!(sync.audio_buffer_size(), 2);
        // Batch 0 was evicted; 1 and 2 remain pairable
        assert!(sync.push_video(video(1), vec![0]).is_some());
        assert!(sync.push_video(video(2), vec![0]).is_some());
        assert!(sync.push_video(video(0), vec![0]).is_none());
    }

    #[test]
    fn test_ready_pairs_empty_when_nothing_matches() {
        // Push pairing is eager, so the buffers never co-hold a batch;
        // ready_pairs is the non-blocking drain for leftover state.
        let sync = manager();
        sync.push_video(video(0), vec![0]);
        sync.push_audio(audio(1), vec![1]);
        assert!(sync.ready_pairs().is_empty());
        assert_eq!(sync.video_buffer_size(), 1);
        assert_eq!(sync.audio_buffer_size(), 1);
    }

    #[test]
    fn test_flush_with_fallback_substitutes_audio() {
        let sync = manager();
        sync.push_video(video(0), vec![0]);
        sync.push_video(video(1), vec![1]);
        // batch 1 pairs out immediately, leaving 0 and 2 without audio
        assert!(sync.push_audio(audio(1), vec![9]).is_some());
        sync.push_video(video(2), vec![2]);
        sync.push_audio(audio(7), vec![7]); // never matches, discarded

        let pairs = sync.flush_with_fallback(|v| Some(vec![v.batch_number as u8; 4]));
        // Remaining videos: 0 and 2, both resolved via fallback
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].video.batch_number, 0);
        assert_eq!(pairs[0].audio_data.as_ref(), &[0, 0, 0, 0]);
        assert_eq!(pairs[1].video.batch_number, 2);
        assert_eq!(sync.video_buffer_size(), 0);
        assert_eq!(sync.audio_buffer_size(), 0);
    }

    #[test]
    fn test_flush_skips_video_when_resolver_declines() {
        let sync = manager();
        sync.push_video(video(0), vec![0]);
        let pairs = sync.flush_with_fallback(|_| None);
        assert!(pairs.is_empty());
        assert_eq!(sync.dropped_segments(), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let sync = manager();
        sync.push_video(video(0), vec![0]);
        sync.push_audio(audio(9), vec![9]);
        sync.reset();
        assert_eq!(sync.video_buffer_size(), 0);
        assert_eq!(sync.audio_buffer_size(), 0);
        assert_eq!(sync.sync_delta_ms(), 0.0);
        assert!(!sync.needs_correction());
    }

    #[test]
    fn test_introspection_defaults() {
        let sync = manager();
        assert_eq!(sync.av_offset_ms(), 6_000);
        assert_eq!(sync.sync_delta_ms(), 0.0);
        assert!(!sync.needs_correction());
        assert_eq!(sync.pairs_emitted(), 0);
    }
}
