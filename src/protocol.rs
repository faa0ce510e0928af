//! Relay wire contract: one JSON frame per line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{MessageId, Millis};

/// Frames a session sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on a connection.
    Join { participant_id: String },
    Send {
        id: MessageId,
        sender_id: String,
        text: String,
        sent_at: Millis,
    },
    Typing { sender_id: String, at: Millis },
}

/// Frames the relay delivers to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Message {
        id: MessageId,
        sender_id: String,
        text: String,
        sent_at: Millis,
    },
    Ack {
        id: MessageId,
        /// Authoritative relay timestamp, overriding the optimistic one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<Millis>,
    },
    Reject { id: MessageId, reason: String },
    Typing { sender_id: String, at: Millis },
    Disconnect { reason: String },
}

/// Serializes a frame and terminates it with a newline.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_wire_shape() {
        let frame = ClientFrame::Send {
            id: "m1".into(),
            sender_id: "u1".into(),
            text: "hi".into(),
            sent_at: 42,
        };
        let line = encode_frame(&frame).unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["id"], "m1");
        assert_eq!(value["sender_id"], "u1");
        assert_eq!(value["sent_at"], 42);
    }

    #[test]
    fn test_ack_without_timestamp() {
        let frame: RelayFrame = decode_frame("{\"type\":\"ack\",\"id\":\"m1\"}\n").unwrap();
        assert_eq!(
            frame,
            RelayFrame::Ack {
                id: "m1".into(),
                sent_at: None
            }
        );
    }

    #[test]
    fn test_decode_relay_typing() {
        let frame: RelayFrame =
            decode_frame(r#"  {"type":"typing","sender_id":"bob","at":7}  "#).unwrap();
        assert_eq!(
            frame,
            RelayFrame::Typing {
                sender_id: "bob".into(),
                at: 7
            }
        );
    }

    #[test]
    fn test_malformed_frame_is_codec_error() {
        let err = decode_frame::<RelayFrame>("{\"type\":\"launch\"}").unwrap_err();
        assert!(matches!(err, crate::error::SessionError::Codec(_)));
    }
}
