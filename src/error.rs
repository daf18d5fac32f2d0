//! Error types
//!
//! Errors are recovered at the smallest scope possible: a malformed frame is
//! dropped, a failed viewer is evicted, a failed connection attempt is retried.
//! Only binding the listener can fail a whole server.

use std::fmt;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug)]
pub enum Error {
    /// Socket or listener failure
    Io(std::io::Error),
    /// Wire protocol violation
    Protocol(ProtocolError),
    /// WebSocket transport failure (viewer side)
    WebSocket(String),
    /// `run` was called on a server that is already running
    AlreadyRunning,
    /// Viewer URL could not be used
    InvalidUrl(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            Error::AlreadyRunning => write!(f, "Server is already running"),
            Error::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

/// Wire protocol errors
///
/// None of these close a connection; the offending message is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Binary message shorter than the 5-byte header
    FrameTooShort(usize),
    /// Declared payload length exceeds the bytes that follow the header
    LengthMismatch {
        /// Length from the header
        declared: u32,
        /// Bytes actually available after the header
        available: usize,
    },
    /// Kind byte is neither video (0) nor audio (1)
    UnknownFrameKind(u8),
    /// Payload larger than the configured maximum
    FrameTooLarge {
        /// Payload size
        size: usize,
        /// Configured limit
        max: usize,
    },
    /// Text message is neither a token nor a valid control object
    InvalidJson(String),
    /// Audio payload is not a whole number of 16-bit samples
    InvalidPcm(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::FrameTooShort(len) => {
                write!(f, "Binary message too short: {} bytes", len)
            }
            ProtocolError::LengthMismatch {
                declared,
                available,
            } => write!(
                f,
                "Declared length {} exceeds available {} bytes",
                declared, available
            ),
            ProtocolError::UnknownFrameKind(kind) => write!(f, "Unknown frame kind: {}", kind),
            ProtocolError::FrameTooLarge { size, max } => {
                write!(f, "Frame of {} bytes exceeds maximum {}", size, max)
            }
            ProtocolError::InvalidJson(msg) => write!(f, "Invalid control message: {}", msg),
            ProtocolError::InvalidPcm(len) => {
                write!(f, "Audio payload of {} bytes is not 16-bit aligned", len)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
