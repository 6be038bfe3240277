use serde::Serialize;
use serde_json::Value;

use crate::ws::traits::Frame;

/// Protocol frames the client sends upstream.
///
/// Serialized as `{"type": "<variant>", ...}`.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame<'a> {
    /// Ask the server to start routing a channel to this client
    Subscribe { channel: &'a str },
    /// Stop routing a channel to this client
    Unsubscribe { channel: &'a str },
    /// Heartbeat request; the server answers with `{"type":"pong"}`
    Ping,
    /// Application data published on a channel
    Message { channel: &'a str, data: &'a Value },
}

impl ClientFrame<'_> {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound user data handed to `send`.
///
/// Strings are transmitted verbatim as text frames, JSON values are serialized, bytes
/// go out as a binary frame.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    /// Frame put on the wire for this payload.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Text(text) => Frame::Text(text.clone()),
            Self::Json(value) => Frame::Text(value.to_string()),
            Self::Binary(bytes) => Frame::Binary(bytes.clone()),
        }
    }

    /// Build a channel publication, `{"type":"message","channel":..,"data":..}`.
    pub fn channel_message(channel: &str, data: &Value) -> crate::Result<Self> {
        ClientFrame::Message { channel, data }
            .to_json()
            .map(Self::Text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn control_frames_match_wire_format() {
        assert_eq!(
            ClientFrame::Subscribe { channel: "chat" }.to_json().unwrap(),
            r#"{"type":"subscribe","channel":"chat"}"#
        );
        assert_eq!(
            ClientFrame::Unsubscribe { channel: "chat" }.to_json().unwrap(),
            r#"{"type":"unsubscribe","channel":"chat"}"#
        );
        assert_eq!(ClientFrame::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn channel_message_uses_message_type() {
        let data = json!({"text": "hello", "n": 1});
        let payload = Payload::channel_message("chat", &data).unwrap();

        let Frame::Text(text) = payload.to_frame() else {
            panic!("channel messages are text frames");
        };
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"type": "message", "channel": "chat", "data": {"text": "hello", "n": 1}})
        );
    }

    #[test]
    fn payloads_map_to_frames() {
        assert_eq!(Payload::from("not json").to_frame(), Frame::text("not json"));
        assert_eq!(
            Payload::from(json!({"x": 1})).to_frame(),
            Frame::text(r#"{"x":1}"#)
        );
        assert_eq!(
            Payload::from(vec![0xff_u8, 0xfe, 0x01]).to_frame(),
            Frame::Binary(vec![0xff, 0xfe, 0x01])
        );
    }
}
