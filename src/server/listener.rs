//! Media server listener
//!
//! Serves `/media` (WebSocket viewers) and `/status` on one HTTP listener and
//! owns the background tasks that go with it: the capture controller, the
//! broadcaster pump and the liveness timers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::media::{
    frame_channel, spawn_capture_controller, CaptureCommand, CaptureControl, FrameReceiver,
    FrameSender, NoopCapture,
};
use crate::protocol::constants::{MEDIA_PATH, STATUS_PATH};
use crate::protocol::{encode_json, ServerMessage};
use crate::registry::{CloseReason, SessionRegistry};
use crate::server::broadcaster::FrameBroadcaster;
use crate::server::config::ServerConfig;
use crate::server::connection::serve_viewer;
use crate::server::liveness::LivenessMonitor;
use crate::server::status::get_status;
use crate::stats::ServerStats;

/// State shared by the HTTP handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) stats: Arc<ServerStats>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) started_at: Instant,
    pub(crate) connection_semaphore: Option<Arc<Semaphore>>,
}

/// Resources consumed by the first `run`
struct Pending {
    frames: FrameReceiver,
    capture_commands: mpsc::UnboundedReceiver<CaptureCommand>,
}

/// WebSocket media fan-out server
pub struct MediaServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    stats: Arc<ServerStats>,
    frame_sender: FrameSender,
    capture: Arc<dyn CaptureControl>,
    pending: Mutex<Option<Pending>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl MediaServer {
    /// Create a server; frames are pushed through [`frame_sender`](Self::frame_sender)
    pub fn new(config: ServerConfig) -> Self {
        let (capture_tx, capture_commands) = mpsc::unbounded_channel();
        let (frame_sender, frames) = frame_channel(config.frame_queue_capacity);

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::with_capture_commands(capture_tx)),
            stats: Arc::new(ServerStats::new()),
            frame_sender,
            capture: Arc::new(NoopCapture),
            pending: Mutex::new(Some(Pending {
                frames,
                capture_commands,
            })),
            connection_semaphore,
        }
    }

    /// Attach the capture collaborator started and stopped with viewer occupancy
    pub fn with_capture(mut self, capture: Arc<dyn CaptureControl>) -> Self {
        self.capture = capture;
        self
    }

    /// Handle for pushing captured frames
    pub fn frame_sender(&self) -> FrameSender {
        self.frame_sender.clone()
    }

    /// Get a reference to the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Server counters
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener, shutdown).await
    }

    /// Run on an already bound listener
    pub async fn run_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(Error::AlreadyRunning)?;

        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, path = MEDIA_PATH, "Media server listening");

        // Exits once the registry (and its command sender) is dropped
        let _capture = spawn_capture_controller(Arc::clone(&self.capture), pending.capture_commands);

        let broadcaster = Arc::new(FrameBroadcaster::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            &self.config,
        ));
        let pump = broadcaster.spawn(pending.frames);

        let liveness = Arc::new(LivenessMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            &self.config,
        ))
        .spawn();

        let state = AppState {
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            config: Arc::clone(&self.config),
            started_at: Instant::now(),
            connection_semaphore: self.connection_semaphore.clone(),
        };
        let app = router(state);

        let registry = Arc::clone(&self.registry);
        let send_timeout = self.config.send_timeout;
        let graceful = async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            close_all(&registry, send_timeout).await;
        };

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(graceful)
        .await;

        liveness.stop();
        pump.abort();

        tracing::info!(addr = %addr, "Media server stopped");
        result.map_err(Error::from)
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(MEDIA_PATH, get(upgrade_viewer))
        .route(STATUS_PATH, get(get_status))
        .with_state(state)
}

async fn upgrade_viewer(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    // Check connection limit
    let permit = if let Some(ref sem) = state.connection_semaphore {
        match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer, "Connection rejected: limit reached");
                return (StatusCode::SERVICE_UNAVAILABLE, "Server at capacity").into_response();
            }
        }
    } else {
        None
    };

    tracing::debug!(peer = %peer, "New connection");

    ws.max_message_size(state.config.max_control_message_size)
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            serve_viewer(socket, peer, state).await;
        })
}

/// Tell every viewer the server is going away and close the registry
///
/// Viewers upgraded after this point are refused by the closed registry.
pub(crate) async fn close_all(registry: &SessionRegistry, timeout: std::time::Duration) {
    let sessions = registry.close().await;
    if sessions.is_empty() {
        return;
    }

    let notice = match encode_json(&ServerMessage::ServerShutdown) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode shutdown notice");
            None
        }
    };

    let count = sessions.len();
    let mut closes = JoinSet::new();
    for session in sessions {
        let notice = notice.clone();
        closes.spawn(async move {
            let _ = tokio::time::timeout(timeout, async {
                if let Some(text) = notice {
                    let _ = session.send_text(text).await;
                }
                session.close(CloseReason::GoingAway).await;
            })
            .await;
        });
    }
    while closes.join_next().await.is_some() {}

    tracing::info!(clients = count, "All viewers closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::sink::testing::{Behavior, FakeSink};
    use crate::registry::{Outbound, Session};

    #[tokio::test]
    async fn test_close_all_notifies_and_drains() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::with_capture_commands(tx);

        let a = Arc::new(FakeSink::new(Behavior::Accept));
        let b = Arc::new(FakeSink::new(Behavior::Accept));
        registry.add(Arc::new(Session::new("a", a.clone()))).await.unwrap();
        registry.add(Arc::new(Session::new("b", b.clone()))).await.unwrap();

        close_all(&registry, Duration::from_millis(200)).await;

        assert!(registry.is_empty().await);
        assert!(registry.is_closed());
        for sink in [a, b] {
            assert_eq!(
                sink.sent.lock().unwrap().as_slice(),
                &[Outbound::Text(r#"{"type":"serverShutdown"}"#.to_string())]
            );
            assert_eq!(sink.close_reason(), Some(CloseReason::GoingAway));
        }

        // A viewer that finishes its upgrade late is refused, capture stays stopped
        let late = Arc::new(Session::new("late", Arc::new(FakeSink::new(Behavior::Accept))));
        assert!(registry.add(late).await.is_err());

        assert_eq!(rx.recv().await, Some(CaptureCommand::Start));
        assert_eq!(rx.recv().await, Some(CaptureCommand::Stop));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_bounded_by_hung_viewer() {
        let registry = SessionRegistry::new();
        let hung = Arc::new(FakeSink::new(Behavior::Hang));
        registry.add(Arc::new(Session::new("hung", hung))).await.unwrap();

        let started = tokio::time::Instant::now();
        close_all(&registry, Duration::from_millis(200)).await;

        assert!(started.elapsed() <= Duration::from_millis(250));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let server = Arc::new(MediaServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = Arc::clone(&server);
        let task = tokio::spawn(async move {
            running
                .run_on(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server.run_on(second, async {}).await;
        assert!(matches!(result, Err(Error::AlreadyRunning)));

        stop_tx.send(()).unwrap();
        tokio_test::assert_ok!(task.await.unwrap());
    }
}
