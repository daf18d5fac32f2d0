//! Wire protocol shared by server and viewer
//!
//! One WebSocket connection carries two classes of message:
//! - text: `ping` / `pong` tokens and JSON control objects ([`message`])
//! - binary: length-prefixed media frames ([`frame`])

pub mod constants;
pub mod frame;
pub mod message;

use std::time::{SystemTime, UNIX_EPOCH};

pub use frame::{decode, encode, encode_header, WireFrame};
pub use message::{
    encode_json, ClientInfo, ClientMessage, Heartbeat, ServerMessage, StreamMetadata, TextFrame,
};

/// Wall clock in milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
