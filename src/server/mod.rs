//! Media fan-out server
//!
//! Provides:
//! - the `/media` WebSocket endpoint and `/status` document
//! - per-frame fan-out with per-viewer timeouts and eviction
//! - heartbeats and the idle sweep

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod listener;
pub mod liveness;
pub mod status;

pub use broadcaster::{BroadcastOutcome, FrameBroadcaster};
pub use config::{ServerConfig, StreamInfo};
pub use connection::WsViewerSink;
pub use listener::MediaServer;
pub use liveness::{HeartbeatOutcome, LivenessHandle, LivenessMonitor};
pub use status::StatusResponse;
