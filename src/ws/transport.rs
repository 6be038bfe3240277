use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::error::WsError;
use super::traits::{CloseReason, Connector, Frame, Transport};
use crate::Result;
use crate::error::{Error, Kind};

/// [`Connector`] backed by `tokio-tungstenite` (plain `ws://` and rustls `wss://`).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url, protocols: &[String]) -> Result<Transport> {
        let mut request = url.as_str().into_client_request()?;
        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::with_source(Kind::WebSocket, WsError::OpenFailed(Box::new(e))))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(Error::from)
            .with(|frame: Frame| future::ready(Ok::<_, Error>(into_message(frame))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// Control frames (PING/PONG) are answered by tungstenite itself and never surface.
fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Close(frame) => Some(Frame::Close(
            frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.as_str().to_owned())),
        )),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_round_trips_through_tungstenite() {
        let message = into_message(Frame::Close(Some(CloseReason::new(1000, "bye"))));

        assert_eq!(
            from_message(message),
            Some(Frame::Close(Some(CloseReason::new(1000, "bye"))))
        );
    }

    #[test]
    fn transport_level_pings_are_swallowed() {
        assert_eq!(from_message(Message::Ping(vec![1, 2].into())), None);
        assert_eq!(from_message(Message::Pong(Vec::new().into())), None);
    }
}
