//! Session registry
//!
//! The registry tracks connected viewers and is the only shared mutable state
//! on the server side.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<SessionRegistry>
//!                  ┌──────────────────────────┐
//!   accept ──add──►│ sessions: HashMap<id,    │──► CaptureCommand
//!                  │   Arc<Session> {         │    (Start / Stop)
//!                  │     sink: dyn ViewerSink │
//!                  │     last_activity        │
//!                  │   }                      │
//!                  └────────────┬─────────────┘
//!                               │ snapshot()
//!            ┌──────────────────┼──────────────────┐
//!            ▼                  ▼                  ▼
//!     FrameBroadcaster   LivenessMonitor     read loop
//!     (evict on send     (evict idle         (remove on
//!      failure)           sessions)           disconnect)
//! ```
//!
//! # Zero-Copy Design
//!
//! Binary frames are sent as `bytes::Bytes`, so every viewer shares the same
//! allocation for a given frame.

pub mod entry;
pub mod error;
pub mod sink;
pub mod store;

pub use entry::{generate_session_id, Session};
pub use error::{RegistryError, SendError};
pub use sink::{CloseReason, Outbound, ViewerSink};
pub use store::SessionRegistry;
