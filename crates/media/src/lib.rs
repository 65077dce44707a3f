//! Segment pairing and A/V synchronization
//!
//! The ingest side of the dubbing pipeline: fixed-duration segment pairs,
//! the A/V sync manager that re-pairs dubbed audio with buffered video, and
//! the configuration for the external RTSP/RTMP muxer elements.

pub mod av_sync;
pub mod io;
pub mod segment;

pub use av_sync::{AvSyncConfig, AvSyncManager, DropEvent, SyncPair};
pub use io::{
    ChannelEgressSink, ChannelSegmentSource, EgressConfig, EgressSink, IngestConfig,
    MediaIoError, SegmentSource, SegmenterConfig,
};
pub use segment::{AudioSegment, SegmentPair, VideoSegment};
