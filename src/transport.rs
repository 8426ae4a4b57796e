use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::protocol::{Message, ProtocolError, RawEnvelope};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("the other side of the transport has gone away")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One end of a bidirectional message channel.
///
/// Envelopes cross as serialized JSON text, so neither side can hold a reference
/// into the other's state.
#[derive(Debug)]
pub struct Port {
    outgoing: UnboundedSender<String>,
    incoming: UnboundedReceiver<String>,
}

/// Create a connected pair of ports: `(page, worker)`.
pub fn channel() -> (Port, Port) {
    let (page_tx, worker_rx) = unbounded_channel();
    let (worker_tx, page_rx) = unbounded_channel();
    (
        Port {
            outgoing: page_tx,
            incoming: page_rx,
        },
        Port {
            outgoing: worker_tx,
            incoming: worker_rx,
        },
    )
}

impl Port {
    pub fn post_message<M: Message>(&self, message: &M) -> Result<(), TransportError> {
        self.post_envelope(&message.encode()?)
    }

    pub fn post_envelope(&self, envelope: &RawEnvelope) -> Result<(), TransportError> {
        self.post_text(envelope.to_json()?)
    }

    /// Send raw transport text without any validation.
    pub fn post_text(&self, text: String) -> Result<(), TransportError> {
        self.outgoing.send(text).map_err(|_| TransportError::Closed)
    }

    /// Wait for the next message; `None` once the other side is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Take an already-delivered message without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.incoming.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerMessage;

    #[tokio::test]
    async fn messages_cross_in_order() {
        let (page, mut worker) = channel();
        page.post_message(&WorkerMessage::Initialize).unwrap();
        page.post_text("second".into()).unwrap();

        let first = RawEnvelope::unpack(&worker.recv().await.unwrap()).unwrap();
        assert_eq!(first.kind, "initialize");
        assert_eq!(worker.recv().await.as_deref(), Some("second"));
        assert!(worker.try_recv().is_none());
    }

    #[test]
    fn posting_after_peer_drop_reports_closed() {
        let (page, worker) = channel();
        drop(worker);
        let err = page.post_message(&WorkerMessage::Initialize).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
