//! Registry error types
//!
//! Error types for delivering messages to a registered viewer.

/// Failure to deliver a message to one viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The viewer's channel is already closed
    Closed,
    /// The transport reported an error
    Transport(String),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed => write!(f, "Viewer channel closed"),
            SendError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for SendError {}

/// Registry operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry was closed for server shutdown
    Closed,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Closed => write!(f, "Registry closed"),
        }
    }
}

impl std::error::Error for RegistryError {}
