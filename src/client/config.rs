//! Viewer configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::DEFAULT_MAX_FRAME_SIZE;

/// Viewer configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the media endpoint (`ws://host:port/media`)
    pub url: String,

    /// Delay before the first reconnect attempt
    pub reconnect_interval: Duration,

    /// Upper bound on the reconnect delay
    pub max_reconnect_interval: Duration,

    /// Growth factor between successive reconnect delays
    pub reconnect_decay: f64,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Time allowed for a connection to open
    pub connection_timeout: Duration,

    /// Interval between `ping` tokens while open
    pub ping_interval: Duration,

    /// Time allowed for a `pong` (or heartbeat) after a ping
    pub pong_timeout: Duration,

    /// Minimum spacing between displayed video frames
    pub min_video_interval: Duration,

    /// Audio blocks held by the jitter buffer
    pub jitter_capacity: usize,

    /// Largest media payload accepted from the server
    pub max_frame_size: usize,

    /// Audio output starts suspended until a user gesture
    pub audio_requires_gesture: bool,

    /// Events held for the receiver before new ones are dropped
    pub event_capacity: usize,

    /// Reported in `clientInfo`
    pub user_agent: String,

    /// Reported in `clientInfo`
    pub platform: String,

    /// Reported in `clientInfo` as `WIDTHxHEIGHT`
    pub screen_size: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/media".to_string(),
            reconnect_interval: Duration::from_millis(2000),
            max_reconnect_interval: Duration::from_millis(30_000),
            reconnect_decay: 1.5,
            max_reconnect_attempts: 20,
            connection_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(10),
            min_video_interval: Duration::from_millis(33),
            jitter_capacity: 5,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            audio_requires_gesture: false,
            event_capacity: 256,
            user_agent: concat!("mediacast/", env!("CARGO_PKG_VERSION")).to_string(),
            platform: std::env::consts::OS.to_string(),
            screen_size: String::new(),
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Check that the URL is a WebSocket URL
    pub fn validate(&self) -> Result<()> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            Ok(())
        } else {
            Err(Error::InvalidUrl(self.url.clone()))
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// `min(max_reconnect_interval, reconnect_interval * decay^(attempt - 1))`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.reconnect_interval.as_millis() as f64;
        let max = self.max_reconnect_interval.as_millis() as f64;

        let delay = (base * self.reconnect_decay.powi(exponent)).min(max);
        Duration::from_millis(delay.round() as u64)
    }

    /// Set the reconnect backoff parameters
    pub fn reconnect(mut self, interval: Duration, max_interval: Duration, decay: f64) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_interval = max_interval;
        self.reconnect_decay = decay;
        self
    }

    /// Set maximum reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the ping interval and pong timeout
    pub fn keepalive(mut self, ping_interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = ping_interval;
        self.pong_timeout = pong_timeout;
        self
    }

    /// Set how many undelivered events are held for the receiver
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Require a user gesture before audio plays
    pub fn audio_requires_gesture(mut self, required: bool) -> Self {
        self.audio_requires_gesture = required;
        self
    }

    /// Set the screen size reported to the server
    pub fn screen_size(mut self, width: u32, height: u32) -> Self {
        self.screen_size = format!("{}x{}", width, height);
        self
    }
}
