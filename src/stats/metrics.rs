//! Statistics for the server and for viewers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide counters, shared by the accept path, broadcaster and sweep
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Viewers ever accepted
    pub total_connections: AtomicU64,
    /// Frames handed to the broadcaster
    pub frames_broadcast: AtomicU64,
    /// Frames overwritten before the broadcaster reached them
    pub frames_skipped: AtomicU64,
    /// Successful per-viewer frame sends
    pub frames_delivered: AtomicU64,
    /// Viewers evicted after a failed or timed out send
    pub send_evictions: AtomicU64,
    /// Viewers evicted by the idle sweep
    pub idle_evictions: AtomicU64,
    /// Heartbeats that could not be delivered
    pub heartbeat_failures: AtomicU64,
    /// Inbound viewer messages that could not be decoded
    pub malformed_messages: AtomicU64,
    /// Connections closed after `read_timeout` without inbound traffic
    pub read_timeouts: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to a counter
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            send_evictions: self.send_evictions.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub total_connections: u64,
    pub frames_broadcast: u64,
    pub frames_skipped: u64,
    pub frames_delivered: u64,
    pub send_evictions: u64,
    pub idle_evictions: u64,
    pub heartbeat_failures: u64,
    pub malformed_messages: u64,
    pub read_timeouts: u64,
}

/// Viewer-side frame statistics
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    /// Video frames accepted for display
    pub video_frames: u64,
    /// Video frames dropped by the rate limiter
    pub dropped_video_frames: u64,
    /// Audio blocks buffered for playback
    pub audio_frames: u64,
    /// Audio blocks pushed out of a full jitter buffer
    pub dropped_audio_blocks: u64,
    /// Binary messages that failed to decode
    pub errors: u64,
    /// Events dropped because the event receiver was full
    pub dropped_events: u64,
    /// When the last video frame was accepted
    pub last_video_at: Option<Instant>,
    /// When the last audio block was buffered
    pub last_audio_at: Option<Instant>,
}

impl ViewerStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of received video frames dropped by rate limiting
    pub fn video_drop_ratio(&self) -> f64 {
        let total = self.video_frames + self.dropped_video_frames;
        if total > 0 {
            self.dropped_video_frames as f64 / total as f64
        } else {
            0.0
        }
    }
}
