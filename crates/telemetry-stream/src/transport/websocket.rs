//! WebSocket transport (tokio-tungstenite)

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WsCloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::{ChannelMessage, CloseFrame, DuplexChannel, StreamTransport, TransportError};
use crate::streaming::SubscriptionTarget;

/// Default live feed endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/live-trend";

/// Opens one WebSocket per subscription target
///
/// The target is encoded as `vehicle_id` and `metric` query parameters on the
/// handshake request.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: Url,
}

impl WebSocketTransport {
    /// Create a transport for a `ws://` or `wss://` endpoint
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        match endpoint.scheme() {
            "ws" | "wss" => Ok(Self { endpoint }),
            other => Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{}', expected ws or wss",
                other
            ))),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Full handshake URL for a target
    pub fn endpoint_url(&self, target: &SubscriptionTarget) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("vehicle_id", &target.vehicle_id)
            .append_pair("metric", &target.metric);
        url
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn DuplexChannel>, TransportError> {
        let url = self.endpoint_url(target);
        debug!(%url, "Opening WebSocket");

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn recv(&mut self) -> Option<Result<ChannelMessage, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let message = match message {
                Message::Text(text) => ChannelMessage::Text(text),
                Message::Binary(data) => ChannelMessage::Binary(Bytes::from(data)),
                Message::Close(frame) => ChannelMessage::Close(frame.map(|f| CloseFrame {
                    code: u16::from(f.code),
                    reason: f.reason.into_owned(),
                })),
                // Pings are answered by tungstenite on the next read
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("WebSocket control frame");
                    continue;
                }
            };

            return Some(Ok(message));
        }
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        let ws_frame = WsCloseFrame {
            code: CloseCode::from(frame.code),
            reason: Cow::Owned(frame.reason),
        };

        // The peer's reply is not awaited; dropping the stream releases the socket
        match self.stream.close(Some(ws_frame)).await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from(e) {
                TransportError::ConnectionClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_carries_target() {
        let transport = WebSocketTransport::new("ws://localhost:8080/live-trend").unwrap();
        let url = transport.endpoint_url(&SubscriptionTarget::new("B183", "speed"));
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/live-trend?vehicle_id=B183&metric=speed"
        );
    }

    #[test]
    fn test_endpoint_url_escapes_values() {
        let transport = WebSocketTransport::new("wss://feed.example/live?token=abc").unwrap();
        let url = transport.endpoint_url(&SubscriptionTarget::new("B 1&8", "temp"));
        assert_eq!(
            url.as_str(),
            "wss://feed.example/live?token=abc&vehicle_id=B+1%268&metric=temp"
        );
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        assert!(matches!(
            WebSocketTransport::new("http://localhost:8080/live-trend"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(WebSocketTransport::new("not a url").is_err());
    }

    #[test]
    fn test_default_endpoint() {
        let transport = WebSocketTransport::new(DEFAULT_ENDPOINT).unwrap();
        assert_eq!(transport.endpoint().as_str(), DEFAULT_ENDPOINT);
    }
}
