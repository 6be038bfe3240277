use serde::Deserialize;
use serde_json::Value;

/// Channel the server uses for connection-level notices.
pub const SYSTEM_CHANNEL: &str = "system";

/// Protocol frames the server sends downstream.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Answer to a heartbeat PING
    Pong,
    /// Data routed on a channel
    Message {
        channel: String,
        #[serde(default)]
        data: Value,
    },
}

/// Payload of a message on the `system` channel, sent right after the connection opens.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SystemNotice {
    /// Identifier the server assigned to this connection
    #[serde(rename = "clientId", default)]
    pub client_id: Option<String>,
    /// Human-readable greeting or notice
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of the generic `message` event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Frame decoded as JSON
    Json(Value),
    /// Text that was not valid JSON, delivered untouched
    Raw(String),
    /// Binary frame whose bytes are not UTF-8, delivered untouched
    Binary(Vec<u8>),
}

/// Classification of one inbound text frame.
#[non_exhaustive]
#[derive(Debug)]
pub enum Decoded {
    /// Heartbeat answer; consumed internally
    Pong,
    /// Connection notice on the `system` channel; consumed internally
    System(SystemNotice),
    /// Data for channel subscribers
    Channel {
        channel: String,
        data: Value,
        frame: Value,
    },
    /// Valid JSON that is not a known protocol frame
    Other(Value),
    /// Not JSON at all
    Undecodable(serde_json::Error),
}

/// Decode one inbound text frame.
#[must_use]
pub fn decode(text: &str) -> Decoded {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Decoded::Undecodable(e),
    };

    match ServerFrame::deserialize(&value) {
        Ok(ServerFrame::Pong) => Decoded::Pong,
        Ok(ServerFrame::Message { channel, data }) if channel == SYSTEM_CHANNEL => {
            Decoded::System(SystemNotice::deserialize(&data).unwrap_or_default())
        }
        Ok(ServerFrame::Message { channel, data }) => Decoded::Channel {
            channel,
            data,
            frame: value,
        },
        Err(_) => Decoded::Other(value),
    }
}
