//! Text control messages
//!
//! Control traffic is either a bare liveness token (`ping` / `pong`) or a JSON
//! object discriminated by its `type` field. Messages are decoded once, at the
//! connection boundary, into [`TextFrame`]; nothing downstream matches on
//! strings.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

use super::constants::{PING, PONG};

/// Stream description sent to a viewer right after it connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Audio sample rate in Hz
    pub audio_sample_rate: u32,
    /// Audio channel count
    pub audio_channels: u8,
    /// Audio sample format (always `pcm16`)
    pub audio_format: String,
    /// Identifier assigned to this viewer's session
    pub client_id: String,
    /// Server wall clock in milliseconds
    pub timestamp: u64,
    /// Viewers connected, including this one
    pub client_count: usize,
    /// Video width in pixels
    pub video_width: u32,
    /// Video height in pixels
    pub video_height: u32,
    /// Nominal capture rate
    pub video_fps: u32,
}

/// Periodic server liveness message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Heartbeat {
    /// Server wall clock in milliseconds
    pub timestamp: u64,
    /// Viewers currently connected
    pub client_count: usize,
}

/// Description a viewer sends about itself after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientInfo {
    /// Viewer software identification
    pub user_agent: String,
    /// Viewer operating platform
    pub platform: String,
    /// Display size as `WIDTHxHEIGHT`
    pub screen_size: String,
    /// Viewer wall clock in milliseconds
    pub timestamp: u64,
}

/// JSON control messages sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent once on accept
    Metadata(StreamMetadata),
    /// Sent periodically to every viewer
    Heartbeat(Heartbeat),
    /// Server is stopping; viewers should reconnect later
    ServerShutdown,
    /// Any other `type` (e.g. `status`); logged and ignored
    #[serde(other)]
    Unknown,
}

/// JSON control messages sent by a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Sent once after the connection opens
    ClientInfo(ClientInfo),
    /// Any other `type`; logged and ignored
    #[serde(other)]
    Unknown,
}

/// One decoded text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFrame<M> {
    /// Literal `ping`
    Ping,
    /// Literal `pong`
    Pong,
    /// JSON control object
    Message(M),
}

impl<M: DeserializeOwned> TextFrame<M> {
    /// Decode a text message
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text {
            PING => Ok(TextFrame::Ping),
            PONG => Ok(TextFrame::Pong),
            _ => serde_json::from_str(text)
                .map(TextFrame::Message)
                .map_err(|e| ProtocolError::InvalidJson(e.to_string())),
        }
    }
}

impl<M: Serialize> TextFrame<M> {
    /// Encode for the wire
    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            TextFrame::Ping => Ok(PING.to_string()),
            TextFrame::Pong => Ok(PONG.to_string()),
            TextFrame::Message(msg) => encode_json(msg),
        }
    }
}

/// Serialize a control message to its JSON text
pub fn encode_json<M: Serialize>(msg: &M) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(TextFrame::<ServerMessage>::parse("ping").unwrap(), TextFrame::Ping);
        assert_eq!(TextFrame::<ServerMessage>::parse("pong").unwrap(), TextFrame::Pong);
        assert_eq!(TextFrame::<ClientMessage>::Pong.encode().unwrap(), "pong");
    }

    #[test]
    fn test_metadata_wire_format() {
        let msg = ServerMessage::Metadata(StreamMetadata {
            audio_sample_rate: 44100,
            audio_channels: 1,
            audio_format: "pcm16".into(),
            client_id: "client_1".into(),
            timestamp: 1000,
            client_count: 2,
            video_width: 640,
            video_height: 480,
            video_fps: 15,
        });

        let json: serde_json::Value = serde_json::from_str(&encode_json(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "metadata");
        assert_eq!(json["audioSampleRate"], 44100);
        assert_eq!(json["audioChannels"], 1);
        assert_eq!(json["audioFormat"], "pcm16");
        assert_eq!(json["clientId"], "client_1");
        assert_eq!(json["clientCount"], 2);
        assert_eq!(json["videoWidth"], 640);
        assert_eq!(json["videoHeight"], 480);
        assert_eq!(json["videoFps"], 15);
    }

    #[test]
    fn test_shutdown_wire_format() {
        assert_eq!(
            encode_json(&ServerMessage::ServerShutdown).unwrap(),
            r#"{"type":"serverShutdown"}"#
        );
    }

    #[test]
    fn test_bare_heartbeat_decodes() {
        let frame = TextFrame::<ServerMessage>::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(frame, TextFrame::Message(ServerMessage::Heartbeat(Heartbeat::default())));
    }

    #[test]
    fn test_heartbeat_fields() {
        let frame =
            TextFrame::<ServerMessage>::parse(r#"{"type":"heartbeat","timestamp":5,"clientCount":3}"#)
                .unwrap();
        assert_eq!(
            frame,
            TextFrame::Message(ServerMessage::Heartbeat(Heartbeat {
                timestamp: 5,
                client_count: 3
            }))
        );
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let frame = TextFrame::<ServerMessage>::parse(r#"{"type":"status","x":1}"#).unwrap();
        assert_eq!(frame, TextFrame::Message(ServerMessage::Unknown));
    }

    #[test]
    fn test_client_info_decodes() {
        let text = r#"{"type":"clientInfo","userAgent":"ua","platform":"linux","screenSize":"800x600","timestamp":7}"#;
        let frame = TextFrame::<ClientMessage>::parse(text).unwrap();
        assert_eq!(
            frame,
            TextFrame::Message(ClientMessage::ClientInfo(ClientInfo {
                user_agent: "ua".into(),
                platform: "linux".into(),
                screen_size: "800x600".into(),
                timestamp: 7,
            }))
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            TextFrame::<ClientMessage>::parse("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            TextFrame::<ClientMessage>::parse(r#"{"no_type":true}"#),
            Err(ProtocolError::InvalidJson(_))
        ));
    }
}
