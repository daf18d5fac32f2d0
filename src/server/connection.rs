//! Per-viewer connection handling
//!
//! Each accepted WebSocket is split in two: the write half becomes the
//! session's [`ViewerSink`] (used by the broadcaster, heartbeats and close),
//! the read half is driven here until one of:
//!
//! - the viewer closes or the transport errors
//! - the session is released (evicted, swept or drained on shutdown)
//! - nothing arrives within `read_timeout`; protocol pings go out every
//!   `protocol_ping_interval` so a live viewer always has something to answer

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use crate::protocol::constants::PONG;
use crate::protocol::{
    encode_json, unix_millis, ClientMessage, ServerMessage, StreamMetadata, TextFrame,
};
use crate::registry::{
    generate_session_id, CloseReason, Outbound, SendError, Session, ViewerSink,
};
use crate::stats::ServerStats;

use super::listener::AppState;

/// Write half of a viewer's WebSocket
pub struct WsViewerSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsViewerSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

#[async_trait]
impl ViewerSink for WsViewerSink {
    async fn send(&self, message: Outbound) -> Result<(), SendError> {
        let message = match message {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Binary(data) => Message::Binary(data),
            Outbound::Ping => Message::Ping(Bytes::new()),
        };

        let mut tx = self.tx.lock().await;
        tx.send(message)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    async fn close(&self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: Utf8Bytes::from_static(reason.description()),
        };

        let mut tx = self.tx.lock().await;
        let _ = tx.send(Message::Close(Some(frame))).await;
        let _ = tx.close().await;
    }
}

/// Serve one upgraded viewer until it disconnects
pub(crate) async fn serve_viewer(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (tx, mut rx) = socket.split();

    let session = Arc::new(
        Session::new(generate_session_id(), Arc::new(WsViewerSink::new(tx))).with_peer_addr(peer),
    );
    let clients = match state.registry.add(Arc::clone(&session)).await {
        Ok(clients) => clients,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Viewer refused during shutdown");
            let _ = tokio::time::timeout(
                state.config.send_timeout,
                session.close(CloseReason::GoingAway),
            )
            .await;
            return;
        }
    };
    ServerStats::add(&state.stats.total_connections, 1);

    if let Err(e) = send_metadata(&session, clients, &state).await {
        tracing::warn!(session_id = %session.id(), error = %e, "Failed to send metadata");
        state.registry.remove(session.id()).await;
        return;
    }

    let read_timeout = state.config.read_timeout;
    let mut read_deadline = Instant::now() + read_timeout;
    let mut pings = tokio::time::interval_at(
        Instant::now() + state.config.protocol_ping_interval,
        state.config.protocol_ping_interval,
    );
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            _ = session.released() => {
                tracing::debug!(session_id = %session.id(), "Session released, ending read loop");
                break;
            }
            _ = tokio::time::sleep_until(read_deadline) => {
                tracing::info!(
                    session_id = %session.id(),
                    timeout_secs = read_timeout.as_secs(),
                    "Viewer unresponsive, closing"
                );
                ServerStats::add(&state.stats.read_timeouts, 1);
                let _ = tokio::time::timeout(
                    state.config.send_timeout,
                    session.close(CloseReason::Normal),
                )
                .await;
                break;
            }
            _ = pings.tick() => {
                if let Err(e) = send_bounded(&session, Outbound::Ping, &state).await {
                    tracing::debug!(session_id = %session.id(), error = %e, "Protocol ping failed");
                }
                continue;
            }
            message = rx.next() => message,
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Viewer read error");
                break;
            }
            None => break,
        };

        session.touch();
        read_deadline = Instant::now() + read_timeout;

        match message {
            Message::Text(text) => handle_text(&session, text.as_str(), &state).await,
            Message::Binary(data) => {
                tracing::debug!(
                    session_id = %session.id(),
                    len = data.len(),
                    "Ignoring binary message from viewer"
                );
            }
            // Pings are answered by the transport; pongs only count as activity
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(frame) => {
                tracing::debug!(
                    session_id = %session.id(),
                    code = frame.as_ref().map(|f| f.code),
                    "Viewer closed connection"
                );
                break;
            }
        }
    }

    if state.registry.remove(session.id()).await.is_some() {
        tracing::info!(
            session_id = %session.id(),
            duration_secs = session.duration().as_secs(),
            "Viewer disconnected"
        );
    }
}

async fn send_metadata(
    session: &Session,
    client_count: usize,
    state: &AppState,
) -> Result<(), SendError> {
    let stream = &state.config.stream;
    let metadata = ServerMessage::Metadata(StreamMetadata {
        audio_sample_rate: stream.audio_sample_rate,
        audio_channels: stream.audio_channels,
        audio_format: stream.audio_format.clone(),
        client_id: session.id().to_string(),
        timestamp: unix_millis(),
        client_count,
        video_width: stream.video_width,
        video_height: stream.video_height,
        video_fps: stream.video_fps,
    });

    let text = encode_json(&metadata).map_err(|e| SendError::Transport(e.to_string()))?;
    send_bounded(session, Outbound::Text(text), state).await
}

async fn send_bounded(
    session: &Session,
    message: Outbound,
    state: &AppState,
) -> Result<(), SendError> {
    match tokio::time::timeout(state.config.send_timeout, session.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Transport("send timed out".to_string())),
    }
}

async fn handle_text(session: &Session, text: &str, state: &AppState) {
    match TextFrame::<ClientMessage>::parse(text) {
        Ok(TextFrame::Ping) => {
            tracing::trace!(session_id = %session.id(), "Ping from viewer");
            if let Err(e) = send_bounded(session, Outbound::Text(PONG.to_string()), state).await {
                tracing::debug!(session_id = %session.id(), error = %e, "Failed to answer ping");
            }
        }
        Ok(TextFrame::Pong) => {
            tracing::trace!(session_id = %session.id(), "Pong from viewer");
        }
        Ok(TextFrame::Message(ClientMessage::ClientInfo(info))) => {
            tracing::info!(
                session_id = %session.id(),
                user_agent = %info.user_agent,
                platform = %info.platform,
                screen_size = %info.screen_size,
                "Viewer info"
            );
        }
        Ok(TextFrame::Message(ClientMessage::Unknown)) => {
            tracing::debug!(session_id = %session.id(), "Ignoring unknown control message");
        }
        Err(e) => {
            ServerStats::add(&state.stats.malformed_messages, 1);
            tracing::debug!(session_id = %session.id(), error = %e, "Malformed viewer message");
        }
    }
}
