//! Capture collaborator boundary
//!
//! Camera and microphone acquisition live outside this crate. The core talks
//! to them through two narrow seams:
//!
//! - [`CaptureControl`]: start/stop requests, driven by registry occupancy
//!   transitions and applied by a dedicated controller task so that a slow or
//!   failing device never touches the registry or the broadcast path.
//! - [`FrameSender`]: a push handle the capture side uses to hand over
//!   encoded frames. It is backed by a bounded `broadcast` channel, so when
//!   the broadcaster falls behind the oldest queued frames are overwritten
//!   and the newest ones win.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::frame::MediaFrame;

/// Failure reported by the capture collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureError(pub String);

impl CaptureError {
    /// Create an error from any message
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capture error: {}", self.0)
    }
}

impl std::error::Error for CaptureError {}

/// Start/stop control over the capture hardware
#[async_trait]
pub trait CaptureControl: Send + Sync + 'static {
    /// Begin producing frames
    async fn start(&self) -> Result<(), CaptureError>;

    /// Stop producing frames
    async fn stop(&self) -> Result<(), CaptureError>;
}

/// Capture control that does nothing (frames are pushed externally)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCapture;

#[async_trait]
impl CaptureControl for NoopCapture {
    async fn start(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Occupancy transition emitted by the session registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    /// First viewer joined
    Start,
    /// Last viewer left
    Stop,
}

/// Apply capture commands in order until the sending side is dropped
///
/// Failures are logged and otherwise ignored; viewers keep being served even
/// when no frames can be produced.
pub fn spawn_capture_controller(
    control: Arc<dyn CaptureControl>,
    mut commands: mpsc::UnboundedReceiver<CaptureCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let result = match command {
                CaptureCommand::Start => control.start().await,
                CaptureCommand::Stop => control.stop().await,
            };

            match result {
                Ok(()) => tracing::info!(?command, "Capture transition applied"),
                Err(e) => tracing::warn!(?command, error = %e, "Capture transition failed"),
            }
        }

        tracing::debug!("Capture controller stopped");
    })
}

/// Receiving half of the frame channel, owned by the broadcaster pump
pub type FrameReceiver = broadcast::Receiver<MediaFrame>;

/// Push handle given to the capture side
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: broadcast::Sender<MediaFrame>,
}

impl FrameSender {
    /// Hand over one frame
    ///
    /// Returns false when no broadcaster is running; the frame is discarded.
    pub fn push(&self, frame: MediaFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Create another receiver (one per broadcaster pump)
    pub fn subscribe(&self) -> FrameReceiver {
        self.tx.subscribe()
    }
}

/// Create the capture → broadcaster channel
///
/// `capacity` bounds the number of frames buffered ahead of the broadcaster.
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (FrameSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct RecordingCapture {
        calls: Mutex<Vec<CaptureCommand>>,
        fail_start: bool,
    }

    #[async_trait]
    impl CaptureControl for RecordingCapture {
        async fn start(&self) -> Result<(), CaptureError> {
            self.calls.lock().unwrap().push(CaptureCommand::Start);
            if self.fail_start {
                return Err(CaptureError::new("no camera"));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), CaptureError> {
            self.calls.lock().unwrap().push(CaptureCommand::Stop);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_controller_applies_in_order() {
        let capture = Arc::new(RecordingCapture::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_capture_controller(capture.clone(), rx);

        tx.send(CaptureCommand::Start).unwrap();
        tx.send(CaptureCommand::Stop).unwrap();
        tx.send(CaptureCommand::Start).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            *capture.calls.lock().unwrap(),
            vec![CaptureCommand::Start, CaptureCommand::Stop, CaptureCommand::Start]
        );
    }

    #[tokio::test]
    async fn test_controller_survives_failures() {
        let capture = Arc::new(RecordingCapture {
            fail_start: true,
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_capture_controller(capture.clone(), rx);

        tx.send(CaptureCommand::Start).unwrap();
        tx.send(CaptureCommand::Stop).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(capture.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_frame_channel_keeps_newest() {
        let (sender, mut rx) = frame_channel(2);

        for ts in 0..5 {
            assert!(sender.push(MediaFrame::video(ts, Bytes::new())));
        }

        // Oldest frames were overwritten
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().timestamp, 3);
        assert_eq!(rx.recv().await.unwrap().timestamp, 4);
    }

    #[test]
    fn test_push_without_receiver() {
        let (sender, rx) = frame_channel(1);
        drop(rx);
        assert!(!sender.push(MediaFrame::audio(0, Bytes::new())));
    }
}
