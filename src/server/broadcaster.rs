//! Frame broadcaster
//!
//! Delivers each produced frame to every registered viewer with failure
//! isolation:
//!
//! 1. The wire message (header + payload) is encoded once and shared.
//! 2. One task per viewer sends it, bounded by `send_timeout`.
//! 3. A viewer that times out or errors is evicted and closed; there are
//!    no retries, the next frame supersedes this one.
//! 4. A successful send refreshes the viewer's activity timestamp.
//! 5. The fan-out completes once every per-viewer task has settled.
//!
//! Nothing is queued per viewer: delivery is best-effort, latest-wins.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};

use crate::media::{FrameReceiver, MediaFrame};
use crate::protocol::frame;
use crate::registry::{CloseReason, Outbound, SendError, Session, SessionRegistry};
use crate::stats::ServerStats;

use super::config::ServerConfig;

/// Result of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Viewers a send was attempted to
    pub attempted: usize,
    /// Viewers that accepted the frame
    pub delivered: usize,
    /// Viewers removed because of this frame
    pub evicted: usize,
}

/// Why a send to one viewer failed
#[derive(Debug)]
enum DeliveryFailure {
    Timeout(Duration),
    Send(SendError),
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Timeout(after) => write!(f, "send timed out after {:?}", after),
            DeliveryFailure::Send(e) => write!(f, "{}", e),
        }
    }
}

/// Fans frames out to the session registry
pub struct FrameBroadcaster {
    registry: Arc<SessionRegistry>,
    stats: Arc<ServerStats>,
    send_timeout: Duration,
    max_frame_size: usize,
}

impl FrameBroadcaster {
    /// Create a broadcaster using the timeouts and limits from `config`
    pub fn new(
        registry: Arc<SessionRegistry>,
        stats: Arc<ServerStats>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            stats,
            send_timeout: config.send_timeout,
            max_frame_size: config.max_frame_size,
        }
    }

    /// Deliver one frame to every current viewer
    pub async fn broadcast(&self, media: &MediaFrame) -> BroadcastOutcome {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            return BroadcastOutcome::default();
        }

        let wire = match frame::encode(media, self.max_frame_size) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(kind = ?media.kind, error = %e, "Frame dropped before fan-out");
                return BroadcastOutcome::default();
            }
        };

        ServerStats::add(&self.stats.frames_broadcast, 1);

        let mut outcome = BroadcastOutcome {
            attempted: sessions.len(),
            ..Default::default()
        };

        let mut sends = JoinSet::new();
        for session in sessions {
            let message = Outbound::Binary(wire.clone());
            let timeout = self.send_timeout;

            sends.spawn(async move {
                let result = match tokio::time::timeout(timeout, session.send(message)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(DeliveryFailure::Send(e)),
                    Err(_) => Err(DeliveryFailure::Timeout(timeout)),
                };
                (session, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((session, Ok(()))) => {
                    session.touch();
                    outcome.delivered += 1;
                }
                Ok((session, Err(failure))) => {
                    if self.evict(&session, &failure).await {
                        outcome.evicted += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Send task failed");
                }
            }
        }

        ServerStats::add(&self.stats.frames_delivered, outcome.delivered as u64);

        tracing::trace!(
            kind = ?media.kind,
            size = media.size(),
            delivered = outcome.delivered,
            evicted = outcome.evicted,
            "Frame fan-out complete"
        );

        outcome
    }

    /// Remove a failed viewer and close its channel in the background
    ///
    /// Returns true if this call performed the removal.
    async fn evict(&self, session: &Arc<Session>, failure: &DeliveryFailure) -> bool {
        if self.registry.remove(session.id()).await.is_none() {
            return false;
        }

        ServerStats::add(&self.stats.send_evictions, 1);
        tracing::warn!(
            session_id = %session.id(),
            reason = %failure,
            "Viewer evicted after failed send"
        );

        let session = Arc::clone(session);
        let timeout = self.send_timeout;
        tokio::spawn(async move {
            let _ = tokio::time::timeout(timeout, session.close(CloseReason::Normal)).await;
        });

        true
    }

    /// Pump frames from the capture channel until it closes
    ///
    /// Frames are fanned out one at a time. If capture outpaces delivery the
    /// channel overwrites the oldest pending frames.
    pub async fn run(&self, mut frames: FrameReceiver) {
        loop {
            match frames.recv().await {
                Ok(media) => {
                    self.broadcast(&media).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    ServerStats::add(&self.stats.frames_skipped, skipped);
                    tracing::debug!(skipped, "Broadcaster behind capture, stale frames skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::debug!("Frame channel closed, broadcaster stopped");
    }

    /// Spawn the pump as a background task
    pub fn spawn(self: &Arc<Self>, frames: FrameReceiver) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move { broadcaster.run(frames).await })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::media::frame_channel;
    use crate::registry::sink::testing::{Behavior, FakeSink};

    struct Fixture {
        registry: Arc<SessionRegistry>,
        stats: Arc<ServerStats>,
        broadcaster: FrameBroadcaster,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let stats = Arc::new(ServerStats::new());
        let broadcaster =
            FrameBroadcaster::new(registry.clone(), stats.clone(), &ServerConfig::default());
        Fixture {
            registry,
            stats,
            broadcaster,
        }
    }

    async fn add(registry: &SessionRegistry, id: &str, behavior: Behavior) -> Arc<FakeSink> {
        let sink = Arc::new(FakeSink::new(behavior));
        registry.add(Arc::new(Session::new(id, sink.clone()))).await.unwrap();
        sink
    }

    fn video() -> MediaFrame {
        MediaFrame::video(0, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]))
    }

    #[tokio::test]
    async fn test_broadcast_delivers_encoded_frame() {
        let f = fixture();
        let a = add(&f.registry, "a", Behavior::Accept).await;
        let b = add(&f.registry, "b", Behavior::Accept).await;

        let outcome = f.broadcaster.broadcast(&video()).await;
        assert_eq!(
            outcome,
            BroadcastOutcome {
                attempted: 2,
                delivered: 2,
                evicted: 0
            }
        );

        let expected = Outbound::Binary(Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x00, 0x04, 0xFF, 0xD8, 0xFF, 0xD9,
        ]));
        assert_eq!(a.sent.lock().unwrap().as_slice(), &[expected.clone()]);
        assert_eq!(b.sent.lock().unwrap().as_slice(), &[expected]);
    }

    #[tokio::test]
    async fn test_broadcast_without_viewers() {
        let f = fixture();
        assert_eq!(f.broadcaster.broadcast(&video()).await, BroadcastOutcome::default());
        assert_eq!(f.stats.snapshot().frames_broadcast, 0);
    }

    #[tokio::test]
    async fn test_failed_viewer_is_evicted_once() {
        let f = fixture();
        let good = add(&f.registry, "good", Behavior::Accept).await;
        let bad = add(&f.registry, "bad", Behavior::Fail).await;
        let bad_session = f.registry.get("bad").await.unwrap();

        let outcome = f.broadcaster.broadcast(&video()).await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.evicted, 1);
        assert!(!f.registry.contains("bad").await);
        // Its read loop is told to stop
        assert!(bad_session.is_released());

        // Later frames never reach the evicted viewer
        f.broadcaster.broadcast(&video()).await;
        f.broadcaster.broadcast(&video()).await;
        assert_eq!(bad.attempts(), 1);
        assert_eq!(good.sent_count(), 3);
        assert_eq!(f.stats.snapshot().send_evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_viewers_do_not_stall_fan_out() {
        let f = fixture();
        let mut fast = Vec::new();
        for i in 0..50 {
            fast.push(add(&f.registry, &format!("fast{}", i), Behavior::Accept).await);
        }
        let mut slow = Vec::new();
        for i in 0..5 {
            slow.push(add(&f.registry, &format!("slow{}", i), Behavior::Hang).await);
        }

        let started = Instant::now();
        let outcome = f.broadcaster.broadcast(&video()).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);
        assert_eq!(outcome.attempted, 55);
        assert_eq!(outcome.delivered, 50);
        assert_eq!(outcome.evicted, 5);
        assert_eq!(f.registry.len().await, 50);
        assert!(fast.iter().all(|sink| sink.sent_count() == 1));

        // Let the background closes run
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(slow
            .iter()
            .all(|sink| sink.close_reason() == Some(CloseReason::Normal)));

        f.broadcaster.broadcast(&video()).await;
        assert!(slow.iter().all(|sink| sink.attempts() == 1));
    }

    #[tokio::test]
    async fn test_successful_send_refreshes_activity() {
        let f = fixture();
        add(&f.registry, "a", Behavior::Accept).await;
        let session = f.registry.get("a").await.unwrap();
        let before = session.last_activity();

        tokio::time::sleep(Duration::from_millis(5)).await;
        f.broadcaster.broadcast(&video()).await;

        assert!(session.last_activity() > before);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped() {
        let f = fixture();
        let sink = add(&f.registry, "a", Behavior::Accept).await;
        let huge = MediaFrame::video(0, Bytes::from(vec![0u8; 2 * 1024 * 1024]));

        assert_eq!(f.broadcaster.broadcast(&huge).await, BroadcastOutcome::default());
        assert_eq!(sink.attempts(), 0);
        assert!(f.registry.contains("a").await);
    }

    #[tokio::test]
    async fn test_pump_runs_until_channel_closes() {
        let f = fixture();
        let sink = add(&f.registry, "a", Behavior::Accept).await;
        let broadcaster = Arc::new(f.broadcaster);

        let (sender, rx) = frame_channel(4);
        let pump = broadcaster.spawn(rx);

        assert!(sender.push(video()));
        assert!(sender.push(MediaFrame::audio(1, Bytes::from_static(&[0, 0]))));
        drop(sender);
        pump.await.unwrap();

        assert_eq!(sink.sent_count(), 2);
    }
}
