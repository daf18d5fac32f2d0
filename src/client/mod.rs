//! Media stream viewer
//!
//! Provides the viewer side of the protocol:
//! - a pure connection state machine with backoff, ping/pong and visibility
//!   handling
//! - video rate limiting and an audio jitter buffer
//! - an async driver running both over `tokio-tungstenite`

pub mod config;
pub mod consumer;
pub mod jitter;
pub mod state;
pub mod viewer;

pub use config::ClientConfig;
pub use consumer::{AudioPlayback, AudioState, Consumed, FrameConsumer};
pub use jitter::JitterBuffer;
pub use state::{ConnectionAction, ConnectionEvent, ConnectionPhase, Timer, ViewerConnection};
pub use viewer::{Viewer, ViewerEvent, ViewerHandle};
