//! WebSocket transport to the hub.
//!
//! A transport moves text frames and nothing else. It knows nothing about
//! envelopes, the handshake or reconnection; the supervisor owns all of that.
//! The [`Connector`] seam lets the supervisor be driven by an in-memory
//! transport in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Upper bound on TCP connect plus the WebSocket upgrade.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),
}

/// One open, bidirectional text channel.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next text frame. `Ok(None)` once the peer has closed the channel.
    ///
    /// Must be cancel-safe: the supervisor polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Best-effort close; errors are ignored.
    async fn close(&mut self);
}

/// Opens transports to the hub.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connects with `tokio-tungstenite` (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        debug!(url = %self.url, "connecting to hub");

        let connect_error = |reason: String| TransportError::Connect {
            url: self.url.clone(),
            reason,
        };

        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", CONNECT_TIMEOUT)))?
            .map_err(|e| connect_error(e.to_string()))?;

        debug!(url = %self.url, "websocket connected");
        Ok(Box::new(WsTransport { ws }))
    }
}

/// A connected tungstenite stream.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Control frames are answered by tungstenite; binary is not part of the protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{}", addr));
        let err = match connector.connect().await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        match err {
            TransportError::Connect { url, .. } => assert_eq!(url, connector.url()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_url_fails_to_connect() {
        let connector = WsConnector::new("not a url");
        assert!(connector.connect().await.is_err());
    }
}
