//! Viewer connection state machine
//!
//! Pure logic, no I/O: every method takes the current time and returns the
//! actions the driver has to perform. All timers are deadlines owned by the
//! machine, so leaving a phase cancels its timers by construction and a
//! stale timer can never act on a newer connection.
//!
//! ```text
//!                connect()              transport open
//! ┌──────────────┐ ───────► ┌────────────┐ ─────────► ┌──────┐
//! │ Disconnected │          │ Connecting │            │ Open │
//! └──────────────┘ ◄─────── └────────────┘            └──────┘
//!        ▲   ▲     timeout / error (schedule reconnect)  │  │
//!        │   └───────────────────────────────────────────┘  │ disconnect()
//!        │       error / close / serverShutdown /           ▼
//!        │       pong timeout (schedule reconnect)     ┌─────────┐
//!        └──────────────────────────────────────────── │ Closing │
//!                       transport closed               └─────────┘
//! ```
//!
//! Each transport is tagged with a generation number. Events carrying an old
//! generation are ignored.

use std::time::{Duration, Instant};

use crate::error::ProtocolError;
use crate::protocol::constants::{PING, PONG};
use crate::protocol::{
    encode_json, unix_millis, ClientInfo, ClientMessage, ServerMessage, StreamMetadata, TextFrame,
};

use super::config::ClientConfig;

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No transport
    Disconnected,
    /// Transport requested, waiting for it to open
    Connecting,
    /// Transport open, ping/pong running
    Open,
    /// Local disconnect in progress
    Closing,
}

/// Timers owned by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    ConnectTimeout,
    Ping,
    PongTimeout,
    Reconnect,
}

/// Notable transitions, surfaced to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Phase changed
    PhaseChanged(ConnectionPhase),
    /// A reconnect will be attempted after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Reconnect budget used up; only an explicit connect resumes
    ReconnectExhausted { attempts: u32 },
    /// Stream description received
    Metadata(StreamMetadata),
    /// Server announced it is stopping
    ServerShutdown,
}

/// Work for the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new transport, tagging its events with `generation`
    OpenTransport { generation: u64 },
    /// Close and forget the current transport
    CloseTransport,
    /// Send a text message on the current transport
    SendText(String),
    /// Initialize audio playback (idempotent)
    InitAudio,
    /// Report an event
    Emit(ConnectionEvent),
}

/// Viewer-side connection lifecycle
#[derive(Debug, Clone)]
pub struct ViewerConnection {
    config: ClientConfig,
    phase: ConnectionPhase,
    generation: u64,
    attempts: u32,
    exhausted: bool,
    client_id: Option<String>,
    last_pong: Option<Instant>,

    connect_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,
    pong_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
}

impl ViewerConnection {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            phase: ConnectionPhase::Disconnected,
            generation: 0,
            attempts: 0,
            exhausted: false,
            client_id: None,
            last_pong: None,
            connect_deadline: None,
            ping_deadline: None,
            pong_deadline: None,
            reconnect_deadline: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Generation of the current (or most recent) transport
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reconnect attempts since the last successful open
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the reconnect budget has been used up
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Identifier assigned by the server in `metadata`
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Last time the server proved it was alive
    #[must_use]
    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Deadline of a running timer
    #[must_use]
    pub fn timer(&self, timer: Timer) -> Option<Instant> {
        match timer {
            Timer::ConnectTimeout => self.connect_deadline,
            Timer::Ping => self.ping_deadline,
            Timer::PongTimeout => self.pong_deadline,
            Timer::Reconnect => self.reconnect_deadline,
        }
    }

    /// Earliest running timer, if any
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.ping_deadline,
            self.pong_deadline,
            self.reconnect_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Start a connection attempt
    ///
    /// Any transport still connecting is abandoned. Does not reset the attempt
    /// counter; only a successful open does.
    pub fn connect(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.phase == ConnectionPhase::Open {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.phase != ConnectionPhase::Disconnected {
            actions.push(ConnectionAction::CloseTransport);
        }

        self.clear_timers();
        self.exhausted = false;
        self.generation += 1;
        self.connect_deadline = Some(now + self.config.connection_timeout);

        tracing::debug!(
            generation = self.generation,
            attempt = self.attempts,
            url = %self.config.url,
            "Connecting"
        );

        actions.push(ConnectionAction::OpenTransport {
            generation: self.generation,
        });
        self.set_phase(ConnectionPhase::Connecting, &mut actions);
        actions
    }

    /// Transport `generation` opened
    pub fn on_open(&mut self, generation: u64, now: Instant) -> Vec<ConnectionAction> {
        if generation != self.generation || self.phase != ConnectionPhase::Connecting {
            return Vec::new();
        }

        self.connect_deadline = None;
        self.attempts = 0;
        self.last_pong = Some(now);
        self.ping_deadline = Some(now + self.config.ping_interval);
        self.pong_deadline = None;

        let mut actions = Vec::new();
        self.set_phase(ConnectionPhase::Open, &mut actions);

        match self.client_info() {
            Ok(text) => actions.push(ConnectionAction::SendText(text)),
            Err(e) => tracing::warn!(error = %e, "Failed to encode client info"),
        }
        actions.push(ConnectionAction::InitAudio);

        tracing::info!(generation, "Connected");
        actions
    }

    /// Text message received on transport `generation`
    pub fn on_text(
        &mut self,
        generation: u64,
        text: &str,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ProtocolError> {
        if generation != self.generation || self.phase != ConnectionPhase::Open {
            return Ok(Vec::new());
        }

        let actions = match TextFrame::<ServerMessage>::parse(text)? {
            TextFrame::Pong => {
                self.record_pong(now);
                Vec::new()
            }
            TextFrame::Ping => vec![ConnectionAction::SendText(PONG.to_string())],
            TextFrame::Message(ServerMessage::Heartbeat(heartbeat)) => {
                tracing::trace!(clients = heartbeat.client_count, "Heartbeat");
                self.record_pong(now);
                Vec::new()
            }
            TextFrame::Message(ServerMessage::Metadata(metadata)) => {
                tracing::debug!(client_id = %metadata.client_id, "Metadata received");
                self.client_id = Some(metadata.client_id.clone());
                vec![ConnectionAction::Emit(ConnectionEvent::Metadata(metadata))]
            }
            TextFrame::Message(ServerMessage::ServerShutdown) => {
                tracing::info!("Server shutting down");
                let mut actions = vec![ConnectionAction::Emit(ConnectionEvent::ServerShutdown)];
                actions.extend(self.fail(now));
                actions
            }
            TextFrame::Message(ServerMessage::Unknown) => {
                tracing::debug!("Ignoring unknown control message");
                Vec::new()
            }
        };

        Ok(actions)
    }

    /// Transport `generation` failed (including a failed connect)
    pub fn on_error(&mut self, generation: u64, now: Instant) -> Vec<ConnectionAction> {
        if generation != self.generation {
            return Vec::new();
        }
        self.fail(now)
    }

    /// Transport `generation` closed
    pub fn on_close(&mut self, generation: u64, now: Instant) -> Vec<ConnectionAction> {
        if generation != self.generation {
            return Vec::new();
        }
        self.fail(now)
    }

    /// The consuming surface became visible
    pub fn on_visible(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if self.phase == ConnectionPhase::Open {
            return Vec::new();
        }
        tracing::debug!("Visible while not connected, connecting now");
        self.connect(now)
    }

    /// Close locally without reconnecting
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.clear_timers();

        let mut actions = Vec::new();
        match self.phase {
            ConnectionPhase::Disconnected | ConnectionPhase::Closing => {}
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                actions.push(ConnectionAction::CloseTransport);
                self.set_phase(ConnectionPhase::Closing, &mut actions);
            }
        }
        actions
    }

    /// Fire every timer due at `now`
    pub fn on_tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        if is_due(self.reconnect_deadline, now) {
            self.reconnect_deadline = None;
            return self.connect(now);
        }

        if is_due(self.connect_deadline, now) {
            tracing::warn!(generation = self.generation, "Connection timed out");
            return self.fail(now);
        }

        if is_due(self.pong_deadline, now) {
            tracing::warn!(generation = self.generation, "No pong from server, reconnecting");
            return self.fail(now);
        }

        let mut actions = Vec::new();
        if is_due(self.ping_deadline, now) {
            actions.push(ConnectionAction::SendText(PING.to_string()));
            self.ping_deadline = Some(now + self.config.ping_interval);
            if self.pong_deadline.is_none() {
                self.pong_deadline = Some(now + self.config.pong_timeout);
            }
        }
        actions
    }

    /// Single exit path from Connecting/Open/Closing
    fn fail(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        self.clear_timers();

        match self.phase {
            ConnectionPhase::Disconnected => return actions,
            ConnectionPhase::Closing => {
                self.set_phase(ConnectionPhase::Disconnected, &mut actions);
                return actions;
            }
            ConnectionPhase::Connecting | ConnectionPhase::Open => {
                actions.push(ConnectionAction::CloseTransport);
                self.set_phase(ConnectionPhase::Disconnected, &mut actions);
            }
        }

        if self.attempts >= self.config.max_reconnect_attempts {
            self.exhausted = true;
            tracing::error!(attempts = self.attempts, "Reconnect attempts exhausted");
            actions.push(ConnectionAction::Emit(ConnectionEvent::ReconnectExhausted {
                attempts: self.attempts,
            }));
            return actions;
        }

        self.attempts += 1;
        let delay = self.config.backoff_delay(self.attempts);
        self.reconnect_deadline = Some(now + delay);

        tracing::info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        actions.push(ConnectionAction::Emit(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay,
        }));
        actions
    }

    fn record_pong(&mut self, now: Instant) {
        self.pong_deadline = None;
        self.last_pong = Some(now);
    }

    fn clear_timers(&mut self) {
        self.connect_deadline = None;
        self.ping_deadline = None;
        self.pong_deadline = None;
        self.reconnect_deadline = None;
    }

    fn set_phase(&mut self, phase: ConnectionPhase, actions: &mut Vec<ConnectionAction>) {
        if self.phase != phase {
            self.phase = phase;
            actions.push(ConnectionAction::Emit(ConnectionEvent::PhaseChanged(phase)));
        }
    }

    fn client_info(&self) -> Result<String, ProtocolError> {
        encode_json(&ClientMessage::ClientInfo(ClientInfo {
            user_agent: self.config.user_agent.clone(),
            platform: self.config.platform.clone(),
            screen_size: self.config.screen_size.clone(),
            timestamp: unix_millis(),
        }))
    }
}

fn is_due(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|at| at <= now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ViewerConnection {
        ViewerConnection::new(ClientConfig::default())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn emitted(actions: &[ConnectionAction]) -> Vec<ConnectionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Emit(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn open(conn: &mut ViewerConnection, now: Instant) {
        conn.connect(now);
        let generation = conn.generation();
        conn.on_open(generation, now);
        assert_eq!(conn.phase(), ConnectionPhase::Open);
    }

    #[test]
    fn test_connect_and_open() {
        let mut conn = machine();
        let t0 = Instant::now();

        let actions = conn.connect(t0);
        assert_eq!(
            actions,
            vec![
                ConnectionAction::OpenTransport { generation: 1 },
                ConnectionAction::Emit(ConnectionEvent::PhaseChanged(ConnectionPhase::Connecting)),
            ]
        );
        assert_eq!(conn.timer(Timer::ConnectTimeout), Some(t0 + secs(10)));

        let actions = conn.on_open(1, t0 + secs(1));
        assert_eq!(conn.phase(), ConnectionPhase::Open);
        assert_eq!(conn.timer(Timer::ConnectTimeout), None);
        assert_eq!(conn.timer(Timer::Ping), Some(t0 + secs(6)));
        assert_eq!(conn.last_pong(), Some(t0 + secs(1)));

        let info = actions
            .iter()
            .find_map(|a| match a {
                ConnectionAction::SendText(text) => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&info).unwrap();
        assert_eq!(json["type"], "clientInfo");
        assert!(json.get("userAgent").is_some());
        assert!(actions.contains(&ConnectionAction::InitAudio));
    }

    #[test]
    fn test_connect_timeout_schedules_reconnect() {
        let mut conn = machine();
        let t0 = Instant::now();
        conn.connect(t0);

        assert!(conn.on_tick(t0 + Duration::from_millis(9_999)).is_empty());

        let actions = conn.on_tick(t0 + secs(10));
        assert_eq!(conn.phase(), ConnectionPhase::Disconnected);
        assert!(actions.contains(&ConnectionAction::CloseTransport));
        assert_eq!(
            emitted(&actions).last(),
            Some(&ConnectionEvent::ReconnectScheduled {
                attempt: 1,
                delay: secs(2)
            })
        );
        assert_eq!(conn.next_deadline(), Some(t0 + secs(12)));

        // Reconnect fires and starts a fresh attempt
        let actions = conn.on_tick(t0 + secs(12));
        assert!(actions.contains(&ConnectionAction::OpenTransport { generation: 2 }));
        assert_eq!(conn.phase(), ConnectionPhase::Connecting);
        assert_eq!(conn.attempts(), 1);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut conn = machine();
        let t0 = Instant::now();
        conn.connect(t0);
        conn.on_error(1, t0);
        conn.on_tick(t0 + secs(2));
        conn.on_error(2, t0 + secs(2));
        assert_eq!(conn.attempts(), 2);

        conn.on_tick(t0 + secs(5));
        conn.on_open(3, t0 + secs(5));
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_backoff_delays_follow_attempts() {
        let mut conn = machine();
        let mut now = Instant::now();
        conn.connect(now);

        let mut delays = Vec::new();
        for _ in 0..5 {
            let actions = conn.on_error(conn.generation(), now);
            for event in emitted(&actions) {
                if let ConnectionEvent::ReconnectScheduled { delay, .. } = event {
                    delays.push(delay.as_millis() as u64);
                }
            }
            now = conn.next_deadline().unwrap();
            conn.on_tick(now);
        }

        assert_eq!(delays, vec![2000, 3000, 4500, 6750, 10125]);
    }

    #[test]
    fn test_exhaustion_is_terminal() {
        let mut conn = machine();
        let mut now = Instant::now();
        conn.connect(now);

        for _ in 0..20 {
            conn.on_error(conn.generation(), now);
            now = conn.next_deadline().unwrap();
            conn.on_tick(now);
        }
        assert_eq!(conn.attempts(), 20);

        let actions = conn.on_error(conn.generation(), now);
        assert_eq!(
            emitted(&actions).last(),
            Some(&ConnectionEvent::ReconnectExhausted { attempts: 20 })
        );
        assert!(conn.is_exhausted());
        assert_eq!(conn.next_deadline(), None);
        assert!(conn.on_tick(now + secs(3600)).is_empty());

        // Manual connect resumes
        let actions = conn.connect(now + secs(3600));
        assert!(matches!(actions[0], ConnectionAction::OpenTransport { .. }));
        assert!(!conn.is_exhausted());
    }

    #[test]
    fn test_ping_and_pong_timeout() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        let actions = conn.on_tick(t0 + secs(5));
        assert_eq!(actions, vec![ConnectionAction::SendText("ping".to_string())]);
        assert_eq!(conn.timer(Timer::PongTimeout), Some(t0 + secs(15)));

        // Second ping does not push the pong deadline out
        conn.on_tick(t0 + secs(10));
        assert_eq!(conn.timer(Timer::PongTimeout), Some(t0 + secs(15)));

        let actions = conn.on_tick(t0 + secs(15));
        assert_eq!(conn.phase(), ConnectionPhase::Disconnected);
        assert!(actions.contains(&ConnectionAction::CloseTransport));
        assert_eq!(conn.timer(Timer::Ping), None);
        assert_eq!(conn.timer(Timer::PongTimeout), None);
    }

    #[test]
    fn test_pong_or_heartbeat_keeps_alive() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        conn.on_tick(t0 + secs(5));
        conn.on_text(1, "pong", t0 + secs(6)).unwrap();
        assert_eq!(conn.timer(Timer::PongTimeout), None);
        assert_eq!(conn.last_pong(), Some(t0 + secs(6)));

        conn.on_tick(t0 + secs(10));
        conn.on_text(1, r#"{"type":"heartbeat","timestamp":1,"clientCount":2}"#, t0 + secs(11))
            .unwrap();
        assert_eq!(conn.timer(Timer::PongTimeout), None);

        assert!(conn.on_tick(t0 + secs(14)).is_empty());
        assert_eq!(conn.phase(), ConnectionPhase::Open);
    }

    #[test]
    fn test_server_ping_answered() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        let actions = conn.on_text(1, "ping", t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::SendText("pong".to_string())]);
    }

    #[test]
    fn test_metadata_records_client_id() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        let text = r#"{"type":"metadata","audioSampleRate":44100,"audioChannels":1,
            "audioFormat":"pcm16","clientId":"client_1_ab","timestamp":5,"clientCount":1,
            "videoWidth":640,"videoHeight":480,"videoFps":15}"#;
        let actions = conn.on_text(1, text, t0).unwrap();

        assert_eq!(conn.client_id(), Some("client_1_ab"));
        assert!(matches!(
            emitted(&actions).as_slice(),
            [ConnectionEvent::Metadata(m)] if m.audio_sample_rate == 44100
        ));
    }

    #[test]
    fn test_server_shutdown_reconnects() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        let actions = conn.on_text(1, r#"{"type":"serverShutdown"}"#, t0).unwrap();
        let events = emitted(&actions);

        assert_eq!(events[0], ConnectionEvent::ServerShutdown);
        assert!(events.contains(&ConnectionEvent::ReconnectScheduled {
            attempt: 1,
            delay: secs(2)
        }));
        assert_eq!(conn.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_unknown_and_invalid_text() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        assert!(conn.on_text(1, r#"{"type":"status"}"#, t0).unwrap().is_empty());
        assert!(matches!(
            conn.on_text(1, "not json", t0),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(conn.phase(), ConnectionPhase::Open);
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut conn = machine();
        let t0 = Instant::now();
        conn.connect(t0);

        // Visibility restarts the attempt while connecting
        let actions = conn.on_visible(t0 + secs(1));
        assert_eq!(actions[0], ConnectionAction::CloseTransport);
        assert_eq!(conn.generation(), 2);

        assert!(conn.on_open(1, t0 + secs(2)).is_empty());
        assert!(conn.on_error(1, t0 + secs(2)).is_empty());
        assert_eq!(conn.phase(), ConnectionPhase::Connecting);

        conn.on_open(2, t0 + secs(2));
        assert_eq!(conn.phase(), ConnectionPhase::Open);
    }

    #[test]
    fn test_visibility_bypasses_backoff_without_reset() {
        let mut conn = machine();
        let t0 = Instant::now();
        conn.connect(t0);
        conn.on_error(1, t0);
        conn.on_tick(t0 + secs(2));
        conn.on_error(2, t0 + secs(2));
        assert_eq!(conn.attempts(), 2);
        assert!(conn.timer(Timer::Reconnect).is_some());

        let actions = conn.on_visible(t0 + secs(3));
        assert!(actions.contains(&ConnectionAction::OpenTransport { generation: 3 }));
        assert_eq!(conn.timer(Timer::Reconnect), None);
        assert_eq!(conn.attempts(), 2);

        // Visible while open does nothing
        conn.on_open(3, t0 + secs(3));
        assert!(conn.on_visible(t0 + secs(4)).is_empty());
    }

    #[test]
    fn test_disconnect_does_not_reconnect() {
        let mut conn = machine();
        let t0 = Instant::now();
        open(&mut conn, t0);

        let actions = conn.disconnect();
        assert_eq!(
            actions,
            vec![
                ConnectionAction::CloseTransport,
                ConnectionAction::Emit(ConnectionEvent::PhaseChanged(ConnectionPhase::Closing)),
            ]
        );
        assert_eq!(conn.next_deadline(), None);

        let actions = conn.on_close(1, t0 + secs(1));
        assert_eq!(
            emitted(&actions),
            vec![ConnectionEvent::PhaseChanged(ConnectionPhase::Disconnected)]
        );
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let mut conn = machine();
        let t0 = Instant::now();
        conn.connect(t0);
        conn.on_error(1, t0);
        assert!(conn.timer(Timer::Reconnect).is_some());

        assert!(conn.disconnect().is_empty());
        assert_eq!(conn.next_deadline(), None);
        assert!(conn.on_tick(t0 + secs(60)).is_empty());
    }
}
