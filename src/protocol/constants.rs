//! Protocol constants shared by server and viewer

use std::time::Duration;

/// WebSocket path serving the media stream
pub const MEDIA_PATH: &str = "/media";

/// HTTP path serving the status document
pub const STATUS_PATH: &str = "/status";

/// Size of the binary frame header: 1 byte kind + 4 bytes big-endian length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Kind byte for a video (JPEG) frame
pub const KIND_VIDEO: u8 = 0;

/// Kind byte for an audio (PCM16) frame
pub const KIND_AUDIO: u8 = 1;

/// Liveness request token
pub const PING: &str = "ping";

/// Liveness reply token
pub const PONG: &str = "pong";

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 8080;

/// Default largest media payload broadcast to viewers
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default largest message accepted from a viewer
pub const DEFAULT_MAX_CONTROL_MESSAGE_SIZE: usize = 64 * 1024;

/// Per-viewer send deadline for one broadcast
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Interval between server heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between stale-session sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Idle time after which the sweep evicts a session
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between WebSocket protocol pings to each viewer
pub const DEFAULT_PROTOCOL_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Longest a viewer connection may go without any inbound traffic
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Audio stream description advertised in metadata
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
/// Mono
pub const AUDIO_CHANNELS: u8 = 1;
/// Signed 16-bit PCM
pub const AUDIO_FORMAT: &str = "pcm16";

/// Default video geometry advertised in metadata
pub const VIDEO_WIDTH: u32 = 640;
/// Default video height
pub const VIDEO_HEIGHT: u32 = 480;
/// Default capture rate
pub const VIDEO_FPS: u32 = 15;

/// WebSocket close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for an endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;
