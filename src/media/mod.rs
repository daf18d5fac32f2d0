//! Media handling
//!
//! This module provides:
//! - the `MediaFrame` value produced by capture
//! - PCM16 sample conversion
//! - the capture collaborator boundary (start/stop control, frame channel)

pub mod capture;
pub mod frame;
pub mod pcm;

pub use capture::{
    frame_channel, spawn_capture_controller, CaptureCommand, CaptureControl, CaptureError,
    FrameReceiver, FrameSender, NoopCapture,
};
pub use frame::{FrameKind, MediaFrame};
