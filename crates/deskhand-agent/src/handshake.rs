//! The `auth` → `authenticated` exchange that opens every connection.

use crate::transport::{Transport, TransportError};
use deskhand_types::{message_type, Credentials, Envelope, ProtocolError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("transport error during handshake: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to encode auth request: {0}")]
    Encode(#[source] ProtocolError),

    #[error("no handshake response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed during handshake")]
    Closed,

    #[error("malformed handshake response: {0}")]
    Malformed(#[source] ProtocolError),

    #[error("hub answered the handshake with `{0}`")]
    Rejected(String),
}

/// Sends the credentials and waits for the hub's verdict.
///
/// The first text frame after `auth` decides the outcome: only an
/// `authenticated` envelope succeeds. Any other type, an undecodable frame,
/// a close or silence past `wait` fails the attempt.
pub async fn authenticate(
    transport: &mut dyn Transport,
    credentials: &Credentials,
    wait: Duration,
) -> Result<(), AuthError> {
    let request = Envelope::auth(credentials)
        .and_then(|e| e.to_json())
        .map_err(AuthError::Encode)?;
    transport.send(request).await?;

    let frame = tokio::time::timeout(wait, transport.recv())
        .await
        .map_err(|_| AuthError::Timeout(wait))??
        .ok_or(AuthError::Closed)?;

    let response = Envelope::from_json(&frame).map_err(AuthError::Malformed)?;
    if response.is(message_type::AUTHENTICATED) {
        debug!(message_id = %response.message_id, "handshake accepted");
        Ok(())
    } else {
        Err(AuthError::Rejected(response.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays scripted inbound frames; `None` means the peer closed.
    /// An exhausted script waits forever.
    struct Scripted {
        inbound: VecDeque<Option<String>>,
        sent: Vec<String>,
    }

    impl Scripted {
        fn new(inbound: Vec<Option<&str>>) -> Self {
            Self {
                inbound: inbound.into_iter().map(|f| f.map(String::from)).collect(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            self.sent.push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            match self.inbound.pop_front() {
                Some(frame) => Ok(frame),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    fn creds() -> Credentials {
        Credentials::new("computer-use-agent", "docker", "key")
    }

    #[tokio::test]
    async fn authenticated_response_succeeds() {
        let mut transport = Scripted::new(vec![Some(r#"{"type":"authenticated","payload":{}}"#)]);

        authenticate(&mut transport, &creds(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(transport.sent.len(), 1);
        let sent = Envelope::from_json(&transport.sent[0]).unwrap();
        assert!(sent.is(message_type::AUTH));
        assert_eq!(sent.payload["apiKey"], "key");
        assert!(sent.message_id.starts_with("auth-"));
    }

    #[tokio::test]
    async fn other_response_type_is_rejected() {
        let mut transport = Scripted::new(vec![Some(r#"{"type":"error","payload":{}}"#)]);

        let err = authenticate(&mut transport, &creds(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(kind) if kind == "error"));
    }

    #[tokio::test]
    async fn close_during_handshake_fails() {
        let mut transport = Scripted::new(vec![None]);

        let err = authenticate(&mut transport, &creds(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Closed));
    }

    #[tokio::test]
    async fn garbage_response_is_malformed() {
        let mut transport = Scripted::new(vec![Some("definitely not json")]);

        let err = authenticate(&mut transport, &creds(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_hub_times_out() {
        let mut transport = Scripted::new(vec![]);

        let err = authenticate(&mut transport, &creds(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Timeout(d) if d == Duration::from_secs(10)));
    }
}
