//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;

/// Stream description advertised to viewers in the `metadata` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Audio sample rate in Hz
    pub audio_sample_rate: u32,
    /// Audio channel count
    pub audio_channels: u8,
    /// Audio sample format
    pub audio_format: String,
    /// Video width in pixels
    pub video_width: u32,
    /// Video height in pixels
    pub video_height: u32,
    /// Nominal capture rate
    pub video_fps: u32,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            audio_sample_rate: AUDIO_SAMPLE_RATE,
            audio_channels: AUDIO_CHANNELS,
            audio_format: AUDIO_FORMAT.to_string(),
            video_width: VIDEO_WIDTH,
            video_height: VIDEO_HEIGHT,
            video_fps: VIDEO_FPS,
        }
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewers (0 = unlimited)
    pub max_connections: usize,

    /// Deadline for delivering one frame to one viewer
    pub send_timeout: Duration,

    /// Interval between heartbeats
    pub heartbeat_interval: Duration,

    /// Interval between stale-session sweeps
    pub sweep_interval: Duration,

    /// Idle time after which a viewer is evicted
    pub idle_timeout: Duration,

    /// Interval between WebSocket protocol pings to each viewer
    pub protocol_ping_interval: Duration,

    /// Connection closed when nothing arrives from the viewer for this long
    pub read_timeout: Duration,

    /// Largest media payload that will be broadcast
    pub max_frame_size: usize,

    /// Largest message accepted from a viewer
    pub max_control_message_size: usize,

    /// Frames buffered between capture and broadcaster
    pub frame_queue_capacity: usize,

    /// Stream description sent in metadata
    pub stream: StreamInfo,

    /// Version reported by the status endpoint
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            send_timeout: DEFAULT_SEND_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            protocol_ping_interval: DEFAULT_PROTOCOL_PING_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_control_message_size: DEFAULT_MAX_CONTROL_MESSAGE_SIZE,
            frame_queue_capacity: 4,
            stream: StreamInfo::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-viewer send deadline
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the transport keepalive: protocol ping interval and read deadline
    pub fn keepalive(mut self, ping_interval: Duration, read_timeout: Duration) -> Self {
        self.protocol_ping_interval = ping_interval;
        self.read_timeout = read_timeout;
        self
    }

    /// Set the largest broadcast payload
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.min(u32::MAX as usize);
        self
    }

    /// Set the stream description
    pub fn stream(mut self, stream: StreamInfo) -> Self {
        self.stream = stream;
        self
    }
}
