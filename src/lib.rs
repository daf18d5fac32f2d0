//! Real-time video/audio fan-out over WebSocket
//!
//! A single producer (camera and microphone capture) feeds JPEG frames and
//! PCM16 audio blocks to any number of viewers:
//!
//! - [`server`]: accepts viewers on `/media`, broadcasts every frame with a
//!   per-viewer send deadline, evicts slow or silent viewers, and starts or
//!   stops capture as the first viewer joins and the last one leaves.
//! - [`client`]: a viewer that reconnects with backoff, checks liveness with
//!   ping/pong, rate-limits video and smooths audio through a jitter buffer.
//!
//! # Example
//! ```no_run
//! use mediacast::{MediaFrame, MediaServer, ServerConfig};
//!
//! # async fn example() -> mediacast::error::Result<()> {
//! let server = MediaServer::new(ServerConfig::default());
//! let frames = server.frame_sender();
//!
//! tokio::spawn(async move {
//!     // push frames from the capture pipeline
//!     frames.push(MediaFrame::video(0, bytes::Bytes::from_static(b"jpeg")));
//! });
//!
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use client::{ClientConfig, Viewer, ViewerEvent};
pub use error::{Error, Result};
pub use media::{CaptureControl, FrameKind, MediaFrame};
pub use server::{MediaServer, ServerConfig};
