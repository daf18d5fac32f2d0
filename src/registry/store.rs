//! Session registry implementation
//!
//! The single piece of shared mutable state on the server side. The accept
//! path adds sessions; the read loop, the broadcaster and the liveness sweep
//! remove them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::media::CaptureCommand;

use super::entry::Session;
use super::error::RegistryError;

/// Registry of connected viewers
///
/// Thread-safe via `RwLock`. Broadcasts iterate over a [`snapshot`], so
/// concurrent joins and evictions never block or tear an in-flight fan-out.
///
/// [`snapshot`]: SessionRegistry::snapshot
pub struct SessionRegistry {
    /// Map of session ID to session
    sessions: RwLock<HashMap<String, Arc<Session>>>,

    /// Receives empty↔non-empty transitions, in registry order
    capture_tx: Option<mpsc::UnboundedSender<CaptureCommand>>,

    /// Set by [`close`](SessionRegistry::close); only changed under the write lock
    closed: AtomicBool,
}

impl SessionRegistry {
    /// Create a registry without capture transitions
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capture_tx: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a registry that reports occupancy transitions
    ///
    /// `Start` is sent when the first session is added, `Stop` when the last
    /// one is removed. Commands are sent while the write lock is held, so
    /// their order always matches the registry state.
    pub fn with_capture_commands(tx: mpsc::UnboundedSender<CaptureCommand>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capture_tx: Some(tx),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a session
    ///
    /// Returns the number of sessions after the insert, or
    /// [`RegistryError::Closed`] once the registry has been closed.
    pub async fn add(&self, session: Arc<Session>) -> Result<usize, RegistryError> {
        let mut sessions = self.sessions.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }
        let was_empty = sessions.is_empty();

        sessions.insert(session.id().to_string(), Arc::clone(&session));
        let count = sessions.len();

        if was_empty {
            self.notify(CaptureCommand::Start);
        }

        tracing::info!(
            session_id = %session.id(),
            peer = ?session.peer_addr(),
            clients = count,
            "Viewer registered"
        );

        Ok(count)
    }

    /// Remove a session
    ///
    /// Idempotent: returns the session only for the call that removed it.
    /// The removed session is released, which ends its read loop.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id)?;
        removed.release();

        if sessions.is_empty() {
            self.notify(CaptureCommand::Stop);
        }

        tracing::info!(
            session_id = %id,
            clients = sessions.len(),
            connected_secs = removed.duration().as_secs(),
            "Viewer removed"
        );

        Some(removed)
    }

    /// Remove and release every session at once
    pub async fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        self.drain_locked(&mut sessions)
    }

    /// Drain the registry and refuse every later [`add`](Self::add)
    ///
    /// Used on server shutdown, so a viewer upgraded after the drain cannot
    /// restart capture.
    pub async fn close(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        self.closed.store(true, Ordering::Release);
        self.drain_locked(&mut sessions)
    }

    /// Check whether the registry has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn drain_locked(&self, sessions: &mut HashMap<String, Arc<Session>>) -> Vec<Arc<Session>> {
        if sessions.is_empty() {
            return Vec::new();
        }

        let drained: Vec<_> = sessions.drain().map(|(_, session)| session).collect();
        for session in &drained {
            session.release();
        }
        self.notify(CaptureCommand::Stop);

        tracing::info!(clients = drained.len(), "Registry drained");
        drained
    }

    /// Point-in-time view of the registered sessions
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Look up a session
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Check whether a session is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Check whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn notify(&self, command: CaptureCommand) {
        if let Some(ref tx) = self.capture_tx {
            if tx.send(command).is_err() {
                tracing::debug!(?command, "Capture controller gone, transition dropped");
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
