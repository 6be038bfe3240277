#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// WebSocket error variants.
///
/// None of these are returned from `connect`, `send` or `disconnect`; they travel
/// inside [`Event::Error`](super::events::Event::Error) so callers can observe them.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// The transport could not be constructed or the handshake failed
    OpenFailed(Box<dyn StdError + Send + Sync + 'static>),
    /// Error communicating with the WebSocket server on an open transport
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
    /// No PONG arrived within the configured timeout
    HeartbeatTimeout {
        /// Time elapsed since the last PONG
        silence: Duration,
    },
    /// The reconnect budget was spent without reaching an open connection
    ReconnectExhausted {
        /// Attempts that were made
        attempts: u32,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed(e) => write!(f, "Unable to open WebSocket transport: {e}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::HeartbeatTimeout { silence } => {
                write!(f, "Heartbeat timeout: no PONG for {silence:?}")
            }
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {attempts} attempts")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::OpenFailed(e) => Some(e.as_ref()),
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
