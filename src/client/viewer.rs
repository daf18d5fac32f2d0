//! Async viewer driver
//!
//! Runs a [`ViewerConnection`] against a real WebSocket transport: executes
//! its actions, feeds it transport events and fires its timers. Binary media
//! goes to the [`FrameConsumer`]; displayable video frames and connection
//! events come out of the event channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use crate::error::Result;
use crate::protocol::constants::FRAME_HEADER_SIZE;
use crate::stats::ViewerStats;

use super::config::ClientConfig;
use super::consumer::{AudioPlayback, Consumed, FrameConsumer};
use super::state::{ConnectionAction, ConnectionEvent, ConnectionPhase, ViewerConnection};

/// Time allowed for a close handshake before the transport is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Events from the viewer
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Connection lifecycle
    Connection(ConnectionEvent),
    /// New image to display (latest wins)
    Video(Bytes),
}

/// Requests from the handle to the driver
#[derive(Debug)]
enum Command {
    Connect,
    Visible,
    UserGesture,
    SetAudio(bool),
    Shutdown,
}

/// Transport activity, tagged with the generation that produced it
enum TransportEvent {
    Opened(u64, WsSink),
    Text(u64, String),
    Binary(u64, Bytes),
    Closed(u64),
    Failed(u64, String),
}

/// Headless viewer of a media stream
///
/// # Example
/// ```no_run
/// use mediacast::client::{ClientConfig, Viewer, ViewerEvent};
///
/// # async fn example() -> mediacast::error::Result<()> {
/// let config = ClientConfig::new("ws://localhost:8080/media");
/// let (viewer, mut events) = Viewer::new(config)?;
/// let handle = viewer.spawn();
/// handle.connect();
///
/// while let Some(event) = events.recv().await {
///     if let ViewerEvent::Video(jpeg) = event {
///         println!("frame: {} bytes", jpeg.len());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Viewer {
    config: ClientConfig,
    event_tx: mpsc::Sender<ViewerEvent>,
    consumer: Arc<Mutex<FrameConsumer>>,
}

impl Viewer {
    /// Create a new viewer.
    ///
    /// Returns the viewer and a receiver for events.
    pub fn new(config: ClientConfig) -> Result<(Self, mpsc::Receiver<ViewerEvent>)> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));

        let viewer = Self {
            consumer: Arc::new(Mutex::new(FrameConsumer::new(&config))),
            config,
            event_tx: tx,
        };

        Ok((viewer, rx))
    }

    /// Start the driver task; nothing connects until [`ViewerHandle::connect`]
    pub fn spawn(self) -> ViewerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let playback = lock(&self.consumer).playback();
        let consumer = Arc::clone(&self.consumer);

        let task = tokio::spawn(self.run(command_rx));

        ViewerHandle {
            commands: command_tx,
            consumer,
            playback,
            task,
        }
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut driver = Driver::new(self);

        loop {
            let deadline = driver.machine.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => driver.on_command(command).await,
                    }
                }
                Some(event) = driver.transport_rx.recv() => {
                    driver.on_transport(event).await;
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(Instant::from_std(at)).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let actions = driver.machine.on_tick(Instant::now().into_std());
                    driver.apply(actions).await;
                }
            }
        }

        let actions = driver.machine.disconnect();
        driver.apply(actions).await;
        tracing::debug!("Viewer stopped");
    }
}

/// Control handle for a running viewer
pub struct ViewerHandle {
    commands: mpsc::UnboundedSender<Command>,
    consumer: Arc<Mutex<FrameConsumer>>,
    playback: AudioPlayback,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    /// Connect now (also resumes after the reconnect budget is exhausted)
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// The viewing surface became visible
    pub fn notify_visible(&self) {
        let _ = self.commands.send(Command::Visible);
    }

    /// A user gesture happened (resumes suspended audio)
    pub fn user_gesture(&self) {
        let _ = self.commands.send(Command::UserGesture);
    }

    /// Turn audio playback on or off
    pub fn set_audio_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetAudio(enabled));
    }

    /// Handle for the audio output callback
    pub fn playback(&self) -> AudioPlayback {
        self.playback.clone()
    }

    /// Current frame statistics
    pub fn stats(&self) -> ViewerStats {
        lock(&self.consumer).stats().clone()
    }

    /// Close the connection and stop the driver
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

struct Driver {
    config: ClientConfig,
    machine: ViewerConnection,
    consumer: Arc<Mutex<FrameConsumer>>,
    event_tx: mpsc::Sender<ViewerEvent>,

    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    sink: Option<WsSink>,
    transport_task: Option<JoinHandle<()>>,
}

impl Driver {
    fn new(viewer: Viewer) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        Self {
            machine: ViewerConnection::new(viewer.config.clone()),
            config: viewer.config,
            consumer: viewer.consumer,
            event_tx: viewer.event_tx,
            transport_tx,
            transport_rx,
            sink: None,
            transport_task: None,
        }
    }

    async fn on_command(&mut self, command: Command) {
        let now = Instant::now().into_std();
        let actions = match command {
            Command::Connect => self.machine.connect(now),
            Command::Visible => self.machine.on_visible(now),
            Command::UserGesture => {
                lock(&self.consumer).on_user_gesture();
                Vec::new()
            }
            Command::SetAudio(enabled) => {
                lock(&self.consumer).set_audio_enabled(enabled);
                Vec::new()
            }
            Command::Shutdown => Vec::new(),
        };
        self.apply(actions).await;
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        let now = Instant::now().into_std();
        let current = self.machine.generation();

        let actions = match event {
            TransportEvent::Opened(generation, sink) => {
                if generation != current {
                    return;
                }
                self.sink = Some(sink);
                self.machine.on_open(generation, now)
            }
            TransportEvent::Text(generation, text) => {
                match self.machine.on_text(generation, &text, now) {
                    Ok(actions) => actions,
                    Err(e) => {
                        lock(&self.consumer).record_error();
                        tracing::debug!(error = %e, "Ignoring malformed text message");
                        Vec::new()
                    }
                }
            }
            TransportEvent::Binary(generation, data) => {
                if generation == current {
                    self.on_binary(data, now);
                }
                Vec::new()
            }
            TransportEvent::Closed(generation) => {
                tracing::info!(generation, "Connection closed");
                self.machine.on_close(generation, now)
            }
            TransportEvent::Failed(generation, error) => {
                tracing::warn!(generation, error = %error, "Connection error");
                self.machine.on_error(generation, now)
            }
        };

        self.apply(actions).await;
    }

    fn on_binary(&mut self, data: Bytes, now: std::time::Instant) {
        let consumed = lock(&self.consumer).on_binary(data, now);
        match consumed {
            Ok(Consumed::Display(jpeg)) => self.emit(ViewerEvent::Video(jpeg)),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Dropping malformed frame"),
        }
    }

    async fn apply(&mut self, actions: Vec<ConnectionAction>) {
        let mut queue: VecDeque<_> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                ConnectionAction::OpenTransport { generation } => {
                    self.open_transport(generation);
                }
                ConnectionAction::CloseTransport => {
                    self.close_transport().await;
                    if self.machine.phase() == ConnectionPhase::Closing {
                        let generation = self.machine.generation();
                        queue.extend(self.machine.on_close(generation, Instant::now().into_std()));
                    }
                }
                ConnectionAction::SendText(text) => {
                    if let Some(sink) = self.sink.as_mut() {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let generation = self.machine.generation();
                            tracing::warn!(error = %e, "Send failed");
                            queue.extend(
                                self.machine.on_error(generation, Instant::now().into_std()),
                            );
                        }
                    }
                }
                ConnectionAction::InitAudio => lock(&self.consumer).init_audio(),
                ConnectionAction::Emit(event) => self.emit(ViewerEvent::Connection(event)),
            }
        }
    }

    /// Hand an event to the receiver without waiting; a full queue drops it
    fn emit(&mut self, event: ViewerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                lock(&self.consumer).record_dropped_event();
                if let ViewerEvent::Connection(event) = event {
                    tracing::warn!(?event, "Event receiver full, connection event dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Event receiver dropped");
            }
        }
    }

    fn open_transport(&mut self, generation: u64) {
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
        self.sink = None;

        let url = self.config.url.clone();
        let ws_config = transport_config(&self.config);
        let tx = self.transport_tx.clone();
        self.transport_task = Some(tokio::spawn(async move {
            let stream = match connect_async_with_config(url.as_str(), Some(ws_config), false).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    let _ = tx.send(TransportEvent::Failed(generation, e.to_string()));
                    return;
                }
            };

            let (sink, mut stream) = stream.split();
            if tx.send(TransportEvent::Opened(generation, sink)).is_err() {
                return;
            }

            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => TransportEvent::Text(generation, text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => TransportEvent::Binary(generation, data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Failed(generation, e.to_string()));
                        return;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }

            let _ = tx.send(TransportEvent::Closed(generation));
        }));
    }

    async fn close_transport(&mut self) {
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }
}

/// Transport limits matching the largest frame the consumer will decode
fn transport_config(config: &ClientConfig) -> WebSocketConfig {
    let limit = config.max_frame_size.saturating_add(FRAME_HEADER_SIZE);
    WebSocketConfig::default()
        .max_message_size(Some(limit))
        .max_frame_size(Some(limit))
}

fn lock(consumer: &Mutex<FrameConsumer>) -> std::sync::MutexGuard<'_, FrameConsumer> {
    consumer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
