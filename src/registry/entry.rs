//! Session entry
//!
//! One `Session` exists per accepted viewer, from handshake until its channel
//! is closed. The session owns the write side of the channel; the read loop
//! runs separately in the server's connection task and ends once the session
//! is released.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::protocol::unix_millis;

use super::error::SendError;
use super::sink::{CloseReason, Outbound, ViewerSink};

/// Generate a session identifier
///
/// Wall-clock milliseconds plus 64 random bits, so collisions are not a
/// practical concern.
pub fn generate_session_id() -> String {
    format!("client_{}_{:016x}", unix_millis(), rand::random::<u64>())
}

/// A connected viewer
pub struct Session {
    /// Unique session ID
    id: String,

    /// Remote peer address, when known
    peer_addr: Option<SocketAddr>,

    /// Write side of the viewer channel
    sink: Arc<dyn ViewerSink>,

    /// Last inbound message or successful outbound send
    last_activity: Mutex<Instant>,

    /// When the session was accepted
    connected_at: Instant,

    /// Set once the session has been removed or closed
    released: watch::Sender<bool>,
}

impl Session {
    /// Create a session with a fresh activity timestamp
    pub fn new(id: impl Into<String>, sink: Arc<dyn ViewerSink>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            peer_addr: None,
            sink,
            last_activity: Mutex::new(now),
            connected_at: now,
            released: watch::channel(false).0,
        }
    }

    /// Attach the remote address
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Time since the session was accepted
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Last recorded activity
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record activity now
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Record activity at `now`; the timestamp never moves backwards
    pub fn touch_at(&self, now: Instant) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if now > *last {
            *last = now;
        }
    }

    /// Idle time as seen at `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Send one message to the viewer
    pub async fn send(&self, message: Outbound) -> Result<(), SendError> {
        self.sink.send(message).await
    }

    /// Send a text message to the viewer
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.sink.send(Outbound::Text(text.into())).await
    }

    /// Close the viewer's channel
    ///
    /// Releases the session first, so the read loop ends even if the peer
    /// never answers the close.
    pub async fn close(&self, reason: CloseReason) {
        self.release();
        self.sink.close(reason).await;
    }

    /// Mark the session finished; wakes every [`released`](Self::released) waiter
    pub fn release(&self) {
        self.released.send_replace(true);
    }

    /// Check whether the session has been released
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Resolves once the session is released
    pub async fn released(&self) {
        let mut rx = self.released.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("last_activity", &self.last_activity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::sink::testing::{Behavior, FakeSink};
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("client_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_touch_is_monotonic() {
        let session = Session::new("s1", Arc::new(FakeSink::new(Behavior::Accept)));
        let start = session.last_activity();

        session.touch_at(start + Duration::from_secs(5));
        assert_eq!(session.last_activity(), start + Duration::from_secs(5));

        // Older timestamps are ignored
        session.touch_at(start + Duration::from_secs(1));
        assert_eq!(session.last_activity(), start + Duration::from_secs(5));

        assert_eq!(
            session.idle_for(start + Duration::from_secs(8)),
            Duration::from_secs(3)
        );
        assert_eq!(session.idle_for(start), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_send_goes_through_sink() {
        let sink = Arc::new(FakeSink::new(Behavior::Accept));
        let session = Session::new("s1", sink.clone());

        session.send_text("hello").await.unwrap();
        session.close(CloseReason::Normal).await;

        assert_eq!(sink.sent_count(), 1);
        assert_eq!(sink.close_reason(), Some(CloseReason::Normal));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let session = Arc::new(Session::new("s1", Arc::new(FakeSink::new(Behavior::Accept))));
        assert!(!session.is_released());

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.released().await })
        };

        session.close(CloseReason::Normal).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_released());

        // Waiting on an already released session returns at once
        tokio::time::timeout(Duration::from_millis(10), session.released())
            .await
            .unwrap();
    }
}
