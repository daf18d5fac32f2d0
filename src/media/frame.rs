//! Media frame types
//!
//! A `MediaFrame` is produced once per capture event and consumed once by the
//! broadcaster. It is cheap to clone: the payload is reference counted.

use bytes::Bytes;

use crate::protocol::constants::{KIND_AUDIO, KIND_VIDEO};

/// Kind of media carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// JPEG still image
    Video,
    /// Signed 16-bit PCM samples
    Audio,
}

impl FrameKind {
    /// Parse a wire kind byte
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            KIND_VIDEO => Some(FrameKind::Video),
            KIND_AUDIO => Some(FrameKind::Audio),
            _ => None,
        }
    }

    /// Wire kind byte
    pub fn as_byte(self) -> u8 {
        match self {
            FrameKind::Video => KIND_VIDEO,
            FrameKind::Audio => KIND_AUDIO,
        }
    }
}

/// An immutable captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// Media kind
    pub kind: FrameKind,
    /// Encoded payload (JPEG or PCM16)
    pub payload: Bytes,
    /// Capture time in milliseconds
    pub timestamp: u64,
}

impl MediaFrame {
    /// Create a video frame
    pub fn video(timestamp: u64, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Video,
            payload,
            timestamp,
        }
    }

    /// Create an audio frame
    pub fn audio(timestamp: u64, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Audio,
            payload,
            timestamp,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is a video frame
    pub fn is_video(&self) -> bool {
        self.kind == FrameKind::Video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes() {
        assert_eq!(FrameKind::from_byte(0), Some(FrameKind::Video));
        assert_eq!(FrameKind::from_byte(1), Some(FrameKind::Audio));
        assert_eq!(FrameKind::from_byte(2), None);
        assert_eq!(FrameKind::Audio.as_byte(), 1);
    }

    #[test]
    fn test_constructors() {
        let frame = MediaFrame::video(42, Bytes::from_static(&[1, 2, 3]));
        assert!(frame.is_video());
        assert_eq!(frame.size(), 3);
        assert_eq!(frame.timestamp, 42);

        let frame = MediaFrame::audio(7, Bytes::new());
        assert_eq!(frame.kind, FrameKind::Audio);
    }
}
