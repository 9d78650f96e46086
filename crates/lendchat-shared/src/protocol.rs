use serde::{Deserialize, Serialize};

use crate::error::SharedError;
use crate::types::Message;

/// Frames the client writes to the real-time connection.
///
/// Every frame is a JSON object tagged by `type`; routed frames carry the
/// channel's `goId` next to their `data` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Chat message envelope
    Message {
        #[serde(rename = "goId")]
        go_id: String,
        data: Message,
    },

    /// Heartbeat
    Ping,

    /// Answer to a peer heartbeat
    Pong,

    /// Read receipt for one or more messages
    Read {
        #[serde(rename = "goId")]
        go_id: String,
        data: ReadReceipt,
    },

    /// Typing indicator
    Typing {
        #[serde(rename = "goId")]
        go_id: String,
        data: TypingNotice,
    },

    /// Sent once right after the connection opens
    ConnectedOk { data: ConnectedAck },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAck {
    pub timestamp: i64,
}

impl OutboundFrame {
    pub fn message(message: &Message) -> Self {
        OutboundFrame::Message {
            go_id: message.route_id().to_string(),
            data: message.clone(),
        }
    }

    /// Frame kind as written in the `type` field, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Message { .. } => "message",
            OutboundFrame::Ping => "ping",
            OutboundFrame::Pong => "pong",
            OutboundFrame::Read { .. } => "read",
            OutboundFrame::Typing { .. } => "typing",
            OutboundFrame::ConnectedOk { .. } => "connected_ok",
        }
    }

    pub fn to_text(&self) -> Result<String, SharedError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Frames received from the server, classified by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Message {
        go_id: Option<String>,
        data: Message,
    },
    Ping,
    Pong,
    Typing {
        go_id: Option<String>,
        data: TypingNotice,
    },
    Read {
        go_id: Option<String>,
        data: ReadReceipt,
    },
    /// A `type` this client does not understand.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "goId", default)]
    go_id: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl InboundFrame {
    /// Parse one text frame. Unknown types are not an error; malformed JSON
    /// or a payload that does not fit its declared type is.
    pub fn parse(text: &str) -> Result<Self, SharedError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| SharedError::Protocol(format!("malformed frame: {e}")))?;

        let frame = match raw.kind.as_str() {
            "message" => InboundFrame::Message {
                go_id: raw.go_id,
                data: payload(raw.data, "message")?,
            },
            "ping" => InboundFrame::Ping,
            "pong" => InboundFrame::Pong,
            "typing" => InboundFrame::Typing {
                go_id: raw.go_id,
                data: payload(raw.data, "typing")?,
            },
            "read" => InboundFrame::Read {
                go_id: raw.go_id,
                data: payload(raw.data, "read")?,
            },
            _ => InboundFrame::Unknown(raw.kind),
        };
        Ok(frame)
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    data: serde_json::Value,
    kind: &str,
) -> Result<T, SharedError> {
    serde_json::from_value(data)
        .map_err(|e| SharedError::Protocol(format!("invalid {kind} payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageKind, Sender};

    #[test]
    fn test_outbound_envelope_shape() {
        let mut msg = Message::text("c1", "Lender", "hello");
        msg.id = Some("m1".into());
        msg.go_id = Some("g7".into());

        let json: serde_json::Value =
            serde_json::from_str(&OutboundFrame::message(&msg).to_text().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["goId"], "g7");
        assert_eq!(json["data"]["content"], "hello");

        let ping: serde_json::Value =
            serde_json::from_str(&OutboundFrame::Ping.to_text().unwrap()).unwrap();
        assert_eq!(ping, serde_json::json!({ "type": "ping" }));

        let ack = OutboundFrame::ConnectedOk {
            data: ConnectedAck { timestamp: 42 },
        };
        let ack: serde_json::Value = serde_json::from_str(&ack.to_text().unwrap()).unwrap();
        assert_eq!(ack["type"], "connected_ok");
        assert_eq!(ack["data"]["timestamp"], 42);
    }

    #[test]
    fn test_read_receipt_shape() {
        let frame = OutboundFrame::Read {
            go_id: "c1".into(),
            data: ReadReceipt {
                chat_id: "c1".into(),
                message_ids: vec!["m1".into()],
            },
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_text().unwrap()).unwrap();
        assert_eq!(json["data"]["chatId"], "c1");
        assert_eq!(json["data"]["messageIds"][0], "m1");
    }

    #[test]
    fn test_parse_inbound_message() {
        let text = r#"{"type":"message","goId":"g1","data":{"id":"m9","chatId":"me","toId":"c1","type":"image","content":"u","timestamp":5}}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::Message { go_id, data } => {
                assert_eq!(go_id.as_deref(), Some("g1"));
                assert_eq!(data.kind, MessageKind::Image);
                assert_eq!(data.sender, Sender::Client);
                assert_eq!(data.status, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_parse_inbound_message_tolerates_odd_fields() {
        let text = r#"{"type":"message","goId":"g1","data":{"id":"m9","chatId":"c1","chatName":null,"toName":null,"type":"audio","sender":"server","status":"unread","content":"hi","timestamp":"soon"}}"#;
        match InboundFrame::parse(text).unwrap() {
            InboundFrame::Message { data, .. } => {
                assert_eq!(data.id.as_deref(), Some("m9"));
                assert_eq!(data.chat_id, "c1");
                assert_eq!(data.chat_name, "");
                assert_eq!(data.to_name, None);
                assert_eq!(data.kind, MessageKind::Text);
                assert_eq!(data.sender, Sender::Client);
                assert_eq!(data.status, None);
                assert_eq!(data.content, "hi");
                assert_eq!(data.timestamp, 0);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        assert_eq!(
            InboundFrame::parse(r#"{"type":"presence"}"#).unwrap(),
            InboundFrame::Unknown("presence".into())
        );
        assert_eq!(InboundFrame::parse(r#"{"type":"ping"}"#).unwrap(), InboundFrame::Ping);
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"{"type":"message"}"#).is_err());
    }
}
