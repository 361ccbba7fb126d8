#![forbid(unsafe_code)]

// Channel protocol - Engine.IO v4 / Socket.IO v4 packet codec and chat event mapping

use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Record separator between packets of one long-polling payload
pub const RECORD_SEPARATOR: char = '\x1e';

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0:?}")]
    UnknownType(char),

    #[error("binary packets are not supported")]
    Binary,

    #[error("malformed event packet")]
    MalformedEvent,

    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open packet body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Used when the server advertises no ping timing
const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(25_000 + 20_000);

impl Handshake {
    /// Longest silence tolerated from the server: one ping interval plus
    /// the ping timeout.
    pub fn heartbeat(&self) -> Duration {
        match self.ping_interval.saturating_add(self.ping_timeout) {
            0 => DEFAULT_HEARTBEAT,
            ms => Duration::from_millis(ms),
        }
    }
}

/// One packet on the wire, Engine.IO and Socket.IO levels flattened together.
/// Only the default namespace is used.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{...}`
    Open(Handshake),
    /// `1`
    Close,
    /// `2`
    Ping,
    /// `3`
    Pong,
    /// `6`, also stands in for packets this client ignores
    Noop,
    /// `40` with optional auth or ack body
    Connect(Option<Value>),
    /// `41`
    Disconnect,
    /// `42["name",payload]`
    Event { name: String, payload: Value },
    /// `44{...}`
    ConnectError(Value),
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => {
                format!("0{}", serde_json::to_value(handshake).unwrap_or(Value::Null))
            }
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(body)) => format!("40{body}"),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, payload } => {
                format!("42{}", Value::Array(vec![Value::String(name.clone()), payload.clone()]))
            }
            Packet::ConnectError(body) => format!("44{body}"),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Packet::Close),
            // "2probe" during upgrade is still a ping
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket(rest),
            '5' | '6' => Ok(Packet::Noop),
            'b' => Err(ProtocolError::Binary),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

fn decode_socket(text: &str) -> Result<Packet, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let body = skip_namespace(chars.as_str());
    match kind {
        '0' => Ok(Packet::Connect(optional_json(body)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        // acks are never requested
        '3' => Ok(Packet::Noop),
        '4' => Ok(Packet::ConnectError(optional_json(body)?.unwrap_or(Value::Null))),
        '5' | '6' => Err(ProtocolError::Binary),
        other => Err(ProtocolError::UnknownType(other)),
    }
}

/// Drops a `/nsp,` prefix when present.
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn optional_json(body: &str) -> Result<Option<Value>, ProtocolError> {
    if body.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::from_str(body)?))
    }
}

fn decode_event(body: &str) -> Result<Packet, ProtocolError> {
    // ack id digits precede the array
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let value: Value = serde_json::from_str(body)?;
    let mut items = match value {
        Value::Array(items) => items.into_iter(),
        _ => return Err(ProtocolError::MalformedEvent),
    };
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(ProtocolError::MalformedEvent),
    };
    Ok(Packet::Event {
        name,
        payload: items.next().unwrap_or(Value::Null),
    })
}

/// Joins packets into one long-polling request body.
pub fn encode_payload(packets: &[Packet]) -> String {
    packets
        .iter()
        .map(Packet::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

/// Splits a long-polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<Packet>, ProtocolError> {
    body.split(RECORD_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(Packet::decode)
        .collect()
}

/// Chat operations a session sends over the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    JoinRoom {
        room_id: String,
    },
    ChatMessage {
        room: String,
        kind: String,
        content: String,
    },
    MarkRead {
        room_id: String,
        message_ids: Vec<String>,
    },
}

#[derive(Serialize)]
struct ChatMessageBody<'a> {
    room: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody<'a> {
    room_id: &'a str,
    message_ids: &'a [String],
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::JoinRoom { .. } => "joinRoom",
            Outbound::ChatMessage { .. } => "chatMessage",
            Outbound::MarkRead { .. } => "markMessagesAsRead",
        }
    }

    pub fn into_packet(self) -> Result<Packet, MessageError> {
        let name = self.event_name().to_string();
        let payload = match &self {
            Outbound::JoinRoom { room_id } => Ok(Value::String(room_id.clone())),
            Outbound::ChatMessage { room, kind, content } => serde_json::to_value(ChatMessageBody {
                room,
                kind,
                content,
            }),
            Outbound::MarkRead { room_id, message_ids } => {
                serde_json::to_value(MarkReadBody { room_id, message_ids })
            }
        }
        .map_err(|e| MessageError::Encode(e.to_string()))?;
        Ok(Packet::Event { name, payload })
    }
}

/// Inbound occurrences the session state machine reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    JoinAccepted { participants: usize },
    JoinRejected { reason: String },
    MessageReceived { id: Option<String> },
    ReadAck,
    ChannelError { info: String },
    /// Terminal; the channel delivers nothing after this
    Disconnected { reason: String },
}

impl ChannelEvent {
    /// Maps a server event. Events the session has no use for yield `None`.
    pub fn from_event(name: &str, payload: &Value) -> Option<Self> {
        match name {
            "joinRoomSuccess" => Some(ChannelEvent::JoinAccepted {
                participants: payload
                    .get("participants")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len),
            }),
            "joinRoomError" => Some(ChannelEvent::JoinRejected {
                reason: describe(payload),
            }),
            "message" => Some(ChannelEvent::MessageReceived {
                id: payload
                    .get("_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            }),
            "messagesRead" => Some(ChannelEvent::ReadAck),
            "error" => Some(ChannelEvent::ChannelError {
                info: describe(payload),
            }),
            _ => None,
        }
    }
}

/// Human-readable form of an error payload: its `message` field, a bare
/// string, or the raw JSON.
pub fn describe(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => payload.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = Packet::decode(
            r#"0{"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            Packet::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25000);
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_engine_control_packets() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("2probe").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("3").unwrap(), Packet::Pong);
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
        assert_eq!(Packet::decode("6").unwrap(), Packet::Noop);
        assert!(matches!(Packet::decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(Packet::decode("9"), Err(ProtocolError::UnknownType('9'))));
    }

    #[test]
    fn test_decode_connect_variants() {
        assert_eq!(
            Packet::decode(r#"40{"sid":"s1"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "s1"})))
        );
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(
            Packet::decode(r#"44{"message":"Invalid token"}"#).unwrap(),
            Packet::ConnectError(json!({"message": "Invalid token"}))
        );
        assert_eq!(Packet::decode("41").unwrap(), Packet::Disconnect);
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let expected = Packet::Event {
            name: "message".to_string(),
            payload: json!({"_id": "m1"}),
        };
        assert_eq!(Packet::decode(r#"42["message",{"_id":"m1"}]"#).unwrap(), expected);
        assert_eq!(Packet::decode(r#"4212["message",{"_id":"m1"}]"#).unwrap(), expected);
        assert_eq!(Packet::decode(r#"42/chat,["message",{"_id":"m1"}]"#).unwrap(), expected);
    }

    #[test]
    fn test_event_without_payload_is_null() {
        assert_eq!(
            Packet::decode(r#"42["messagesRead"]"#).unwrap(),
            Packet::Event {
                name: "messagesRead".to_string(),
                payload: Value::Null,
            }
        );
        assert!(matches!(
            Packet::decode(r#"42[1,2]"#),
            Err(ProtocolError::MalformedEvent)
        ));
    }

    #[test]
    fn test_encode_outbound_events() {
        let join = Outbound::JoinRoom { room_id: "r1".into() }.into_packet().unwrap();
        assert_eq!(join.encode(), r#"42["joinRoom","r1"]"#);

        let chat = Outbound::ChatMessage {
            room: "r1".into(),
            kind: "text".into(),
            content: "hi".into(),
        }
        .into_packet()
        .unwrap();
        let decoded = Packet::decode(&chat.encode()).unwrap();
        assert_eq!(
            decoded,
            Packet::Event {
                name: "chatMessage".into(),
                payload: json!({"room": "r1", "type": "text", "content": "hi"}),
            }
        );

        let read = Outbound::MarkRead {
            room_id: "r1".into(),
            message_ids: vec!["m1".into()],
        }
        .into_packet()
        .unwrap();
        match read {
            Packet::Event { name, payload } => {
                assert_eq!(name, "markMessagesAsRead");
                assert_eq!(payload, json!({"roomId": "r1", "messageIds": ["m1"]}));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_connect_with_auth() {
        let packet = Packet::Connect(Some(json!({"token": "t"})));
        assert_eq!(packet.encode(), r#"40{"token":"t"}"#);
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(Packet::Disconnect.encode(), "41");
    }

    #[test]
    fn test_payload_split_on_record_separator() {
        let body = "2\x1e42[\"messagesRead\"]\x1e3";
        let packets = decode_payload(body).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], Packet::Ping);
        assert_eq!(packets[2], Packet::Pong);
        assert_eq!(encode_payload(&[Packet::Pong, Packet::Disconnect]), "3\x1e41");
    }

    #[test]
    fn test_channel_event_mapping() {
        assert_eq!(
            ChannelEvent::from_event("joinRoomSuccess", &json!({"participants": [{}, {}, {}]})),
            Some(ChannelEvent::JoinAccepted { participants: 3 })
        );
        assert_eq!(
            ChannelEvent::from_event("joinRoomSuccess", &json!({})),
            Some(ChannelEvent::JoinAccepted { participants: 0 })
        );
        assert_eq!(
            ChannelEvent::from_event("joinRoomError", &json!({"message": "Room not found"})),
            Some(ChannelEvent::JoinRejected { reason: "Room not found".into() })
        );
        assert_eq!(
            ChannelEvent::from_event("message", &json!({"content": "x"})),
            Some(ChannelEvent::MessageReceived { id: None })
        );
        assert_eq!(
            ChannelEvent::from_event("message", &json!({"_id": "m9"})),
            Some(ChannelEvent::MessageReceived { id: Some("m9".into()) })
        );
        assert_eq!(ChannelEvent::from_event("messagesRead", &Value::Null), Some(ChannelEvent::ReadAck));
        assert_eq!(ChannelEvent::from_event("participantsUpdate", &json!([])), None);
    }

    #[test]
    fn test_describe_error_payloads() {
        assert_eq!(describe(&json!({"message": "boom"})), "boom");
        assert_eq!(describe(&json!("plain")), "plain");
        assert_eq!(describe(&json!({"code": 7})), r#"{"code":7}"#);
    }

    #[test]
    fn test_heartbeat_from_open_packet() {
        let handshake = Handshake {
            sid: "s".into(),
            upgrades: vec![],
            ping_interval: 100,
            ping_timeout: 50,
        };
        assert_eq!(handshake.heartbeat(), Duration::from_millis(150));

        let silent = Handshake { ping_interval: 0, ping_timeout: 0, ..handshake };
        assert_eq!(silent.heartbeat(), Duration::from_secs(45));
    }
}
