//! Core traits for the transport seam.
//!
//! The connection manager never touches sockets directly. A [`Connector`] opens one
//! fresh [`Transport`] per connection attempt; the manager drives it until it closes
//! and then throws it away.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use url::Url;

use crate::Result;

/// A single frame on the wire, independent of the WebSocket implementation.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame; every protocol message is JSON text
    Text(String),
    /// Binary frame; decoded like text when the bytes are UTF-8, delivered as bytes otherwise
    Binary(Vec<u8>),
    /// Close frame with optional status code and reason
    Close(Option<CloseReason>),
}

impl Frame {
    /// Construct a text frame.
    #[must_use]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::Text(text.into())
    }
}

/// Status code and reason carried by a close frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = crate::error::Error> + Send>>;

/// Inbound half of a transport. Ends (`None`) when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An open, full-duplex connection produced by a [`Connector`].
#[non_exhaustive]
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens transports.
///
/// # Example
///
/// ```ignore
/// pub struct LoopbackConnector;
///
/// #[async_trait]
/// impl Connector for LoopbackConnector {
///     async fn connect(&self, url: &Url, _protocols: &[String]) -> Result<Transport> {
///         let (tx, rx) = futures::channel::mpsc::unbounded();
///         Ok(Transport::new(
///             Box::pin(tx.sink_map_err(|e| Error::with_source(Kind::Internal, e))),
///             Box::pin(rx.map(Ok)),
///         ))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the opening handshake against `url`, offering `protocols` as
    /// sub-protocols. Resolves once the transport is open.
    async fn connect(&self, url: &Url, protocols: &[String]) -> Result<Transport>;
}
