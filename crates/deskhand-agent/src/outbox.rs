//! Queue of envelopes waiting for the supervisor to write them.
//!
//! Only the supervisor touches the socket. Everything else (task results in
//! particular) is pushed here and written when a connection is available.
//! The queue is unbounded so that a producer never waits on the network.

use deskhand_types::Envelope;
use tokio::sync::mpsc;
use tracing::warn;

/// Creates a connected producer/consumer pair.
pub fn outbox() -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, OutboxReceiver { rx })
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Outbox {
    /// Queues an envelope. Returns `false` if the supervisor is gone.
    pub fn push(&self, envelope: Envelope) -> bool {
        match self.tx.send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::SendError(envelope)) => {
                warn!(
                    kind = %envelope.kind,
                    message_id = %envelope.message_id,
                    "outbox closed, dropping envelope"
                );
                false
            }
        }
    }
}

/// Consumer half, owned by the supervisor.
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl OutboxReceiver {
    /// Next queued envelope. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn preserves_push_order() {
        let (outbox, mut rx) = outbox();
        let producer = outbox.clone();

        assert!(outbox.push(Envelope::new("a", json!(1))));
        assert!(producer.push(Envelope::new("b", json!(2))));

        assert_eq!(rx.recv().await.unwrap().kind, "a");
        assert_eq!(rx.try_recv().unwrap().kind, "b");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn push_after_receiver_dropped_reports_failure() {
        let (outbox, rx) = outbox();
        drop(rx);
        assert!(!outbox.push(Envelope::pong()));
    }
}
