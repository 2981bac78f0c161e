//! Websocket message wire types.
//!
//! On the boundary every message is encoded as
//! `{ "type": "Text" | "Binary" | "Ping" | "Pong" | "Close", "data": ... }`.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Status code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Reason sent by [`Session::disconnect`](crate::Session::disconnect).
pub const CLIENT_DISCONNECT_REASON: &str = "Disconnected by client";

/// Payload of a `Close` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The frame sent when the client closes the connection itself.
    pub fn client_disconnect() -> Self {
        Self::new(NORMAL_CLOSURE, CLIENT_DISCONNECT_REASON)
    }
}

/// A websocket protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl Message {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "Text",
            Self::Binary(_) => "Binary",
            Self::Ping(_) => "Ping",
            Self::Pong(_) => "Pong",
            Self::Close(_) => "Close",
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Payload size in bytes (close reason length for `Close`).
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => data.len(),
            Self::Close(frame) => frame.as_ref().map_or(0, |f| f.reason.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize an untyped JSON value into a message.
    ///
    /// A string becomes `Text`, an array of integers in `0..=255` becomes
    /// `Binary`, and an object must carry a known `type` tag with a payload
    /// of the matching shape. Everything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Array(items) => bytes_from_values(&items).map(Self::Binary),
            Value::Object(mut fields) => {
                let kind = match fields.remove("type") {
                    Some(Value::String(kind)) => kind,
                    Some(other) => {
                        return Err(ValidationError::InvalidPayload {
                            kind: "message",
                            reason: format!("`type` must be a string, got {}", value_kind(&other)),
                        })
                    }
                    None => {
                        return Err(ValidationError::UnsupportedInput {
                            found: "an object without a `type` field",
                        })
                    }
                };
                let data = fields.remove("data").unwrap_or(Value::Null);
                tagged(&kind, data)
            }
            other => Err(ValidationError::UnsupportedInput {
                found: value_kind(&other),
            }),
        }
    }
}

fn tagged(kind: &str, data: Value) -> Result<Message, ValidationError> {
    match kind {
        "Text" => match data {
            Value::String(text) => Ok(Message::Text(text)),
            other => Err(payload_mismatch("Text", "a string", &other)),
        },
        "Binary" => tagged_bytes("Binary", data).map(Message::Binary),
        "Ping" => tagged_bytes("Ping", data).map(Message::Ping),
        "Pong" => tagged_bytes("Pong", data).map(Message::Pong),
        "Close" => match data {
            Value::Null => Ok(Message::Close(None)),
            frame @ Value::Object(_) => serde_json::from_value::<CloseFrame>(frame)
                .map(|frame| Message::Close(Some(frame)))
                .map_err(|e| ValidationError::InvalidPayload {
                    kind: "Close",
                    reason: e.to_string(),
                }),
            other => Err(payload_mismatch("Close", "a close frame or null", &other)),
        },
        other => Err(ValidationError::UnknownType(other.to_string())),
    }
}

fn tagged_bytes(kind: &'static str, data: Value) -> Result<Vec<u8>, ValidationError> {
    match data {
        Value::Array(items) => bytes_from_values(&items),
        other => Err(payload_mismatch(kind, "a byte array", &other)),
    }
}

fn bytes_from_values(items: &[Value]) -> Result<Vec<u8>, ValidationError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| ValidationError::ByteOutOfRange {
                    index,
                    value: item.to_string(),
                })
        })
        .collect()
}

fn payload_mismatch(kind: &'static str, expected: &str, found: &Value) -> ValidationError {
    ValidationError::InvalidPayload {
        kind,
        reason: format!("expected {expected}, got {}", value_kind(found)),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(data.to_vec())
    }
}

/// Anything [`Session::send`](crate::Session::send) accepts.
///
/// Typed inputs convert infallibly; untyped JSON goes through
/// [`Message::from_value`].
pub trait IntoMessage {
    fn into_message(self) -> Result<Message, ValidationError>;
}

impl IntoMessage for Message {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(self)
    }
}

impl IntoMessage for String {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(Message::Text(self))
    }
}

impl IntoMessage for &str {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(Message::from(self))
    }
}

impl IntoMessage for Vec<u8> {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(Message::Binary(self))
    }
}

impl IntoMessage for &[u8] {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(Message::from(self))
    }
}

impl<const N: usize> IntoMessage for [u8; N] {
    fn into_message(self) -> Result<Message, ValidationError> {
        Ok(Message::Binary(self.to_vec()))
    }
}

impl IntoMessage for Value {
    fn into_message(self) -> Result<Message, ValidationError> {
        Message::from_value(self)
    }
}

/// What a listener receives: a protocol message, a transport error, or the
/// bare termination signal (`null` on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Message(Message),
    Error(String),
    Closed,
}

impl DispatchEvent {
    /// Returns `true` for events after which the connection is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Error(_) | Self::Message(Message::Close(_))
        )
    }
}

impl From<Message> for DispatchEvent {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl Serialize for DispatchEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Message(message) => message.serialize(serializer),
            Self::Error(description) => {
                let mut state = serializer.serialize_struct("DispatchEvent", 2)?;
                state.serialize_field("type", "Error")?;
                state.serialize_field("data", description)?;
                state.end()
            }
            Self::Closed => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for DispatchEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Self::Closed);
        }
        if value.get("type").and_then(Value::as_str) == Some("Error") {
            let description = value
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::custom("`Error` event requires a string `data`"))?;
            return Ok(Self::Error(description.to_owned()));
        }
        Message::deserialize(value)
            .map(Self::Message)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_adjacently_tagged() {
        let text = serde_json::to_value(Message::Text("hi".into())).unwrap();
        assert_eq!(text, json!({ "type": "Text", "data": "hi" }));

        let close = serde_json::to_value(Message::Close(Some(CloseFrame::client_disconnect()))).unwrap();
        assert_eq!(
            close,
            json!({ "type": "Close", "data": { "code": 1000, "reason": "Disconnected by client" } })
        );

        let bare = serde_json::to_value(Message::Close(None)).unwrap();
        assert_eq!(bare, json!({ "type": "Close", "data": null }));
    }

    #[test]
    fn string_becomes_text() {
        let msg = Message::from_value(json!("hello")).unwrap();
        assert_eq!(msg, Message::Text("hello".into()));
    }

    #[test]
    fn byte_array_becomes_binary() {
        let msg = Message::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(msg, Message::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn tagged_object_passes_through() {
        let msg = Message::from_value(json!({ "type": "Ping", "data": [] })).unwrap();
        assert_eq!(msg, Message::Ping(vec![]));

        let close = Message::from_value(json!({ "type": "Close" })).unwrap();
        assert_eq!(close, Message::Close(None));
    }

    #[test]
    fn bare_number_is_rejected() {
        let err = Message::from_value(json!(42)).unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedInput { found: "a number" });
    }

    #[test]
    fn tag_and_payload_must_agree() {
        let err = Message::from_value(json!({ "type": "Text", "data": [1, 2] })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPayload { kind: "Text", .. }));

        let err = Message::from_value(json!({ "type": "Binary", "data": "abc" })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPayload { kind: "Binary", .. }));

        let err = Message::from_value(json!({ "type": "Close", "data": { "code": "x" } })).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPayload { kind: "Close", .. }));
    }

    #[test]
    fn unknown_tag_and_bad_bytes_are_rejected() {
        let err = Message::from_value(json!({ "type": "Frame", "data": [] })).unwrap_err();
        assert_eq!(err, ValidationError::UnknownType("Frame".into()));

        let err = Message::from_value(json!([1, 256])).unwrap_err();
        assert_eq!(err, ValidationError::ByteOutOfRange { index: 1, value: "256".into() });

        let err = Message::from_value(json!([-1])).unwrap_err();
        assert!(matches!(err, ValidationError::ByteOutOfRange { index: 0, .. }));
    }

    #[test]
    fn dispatch_event_encodes_error_and_null() {
        let err = serde_json::to_value(DispatchEvent::Error("reset".into())).unwrap();
        assert_eq!(err, json!({ "type": "Error", "data": "reset" }));
        assert_eq!(serde_json::to_value(DispatchEvent::Closed).unwrap(), Value::Null);

        let parsed: DispatchEvent = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(parsed, DispatchEvent::Closed);
        let parsed: DispatchEvent = serde_json::from_value(json!({ "type": "Error", "data": "x" })).unwrap();
        assert_eq!(parsed, DispatchEvent::Error("x".into()));
        let parsed: DispatchEvent = serde_json::from_value(json!({ "type": "Pong", "data": [9] })).unwrap();
        assert_eq!(parsed, DispatchEvent::Message(Message::Pong(vec![9])));
    }

    #[test]
    fn terminal_events() {
        assert!(DispatchEvent::Closed.is_terminal());
        assert!(DispatchEvent::Error("x".into()).is_terminal());
        assert!(DispatchEvent::Message(Message::Close(None)).is_terminal());
        assert!(!DispatchEvent::Message(Message::Ping(vec![])).is_terminal());
    }
}
