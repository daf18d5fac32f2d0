//! Viewer sink capability
//!
//! The registry and everything that fans out through it only ever need to
//! "send bytes to this viewer, report failure" and "close this viewer". The
//! WebSocket implementation lives in the server; tests use in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::protocol::constants::{CLOSE_GOING_AWAY, CLOSE_NORMAL};

use super::error::SendError;

/// A message addressed to one viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Control message or liveness token
    Text(String),
    /// Encoded media frame (shared, not copied, across viewers)
    Binary(Bytes),
    /// Transport-level keepalive ping
    Ping,
}

/// Why a viewer's channel is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal closure (idle timeout, eviction)
    Normal,
    /// Server is shutting down
    GoingAway,
}

impl CloseReason {
    /// WebSocket close code
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => CLOSE_NORMAL,
            CloseReason::GoingAway => CLOSE_GOING_AWAY,
        }
    }

    /// Human readable close reason
    pub fn description(self) -> &'static str {
        match self {
            CloseReason::Normal => "timeout",
            CloseReason::GoingAway => "server stopping",
        }
    }
}

/// Write side of one viewer connection
#[async_trait]
pub trait ViewerSink: Send + Sync + 'static {
    /// Send one message, resolving once the transport has accepted it
    async fn send(&self, message: Outbound) -> Result<(), SendError>;

    /// Close the channel; errors are swallowed, the viewer is gone either way
    async fn close(&self, reason: CloseReason);
}
