//! Relay side of a session: the [`SignalingChannel`] contract and its
//! WebSocket and in-memory implementations.

pub mod memory;
pub mod message;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProtocolError, TransportError};
pub use message::{RelayFrame, SignalingMessage};

/// What a channel reports to its subscriber, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The relay has a counterpart for this session. Sent at most once.
    Ready,
    /// A negotiation message forwarded by the relay
    Message {
        message: SignalingMessage,
        from: Option<String>,
    },
    /// A data frame whose payload could not be understood
    Malformed(ProtocolError),
    /// The relay connection is gone
    Closed,
}

/// Bidirectional transport to the signaling relay.
///
/// `subscribe` replaces per-event callbacks: the receiver yields every
/// [`SignalingEvent`] once, without reordering or deduplication.
#[async_trait]
pub trait SignalingChannel: Send {
    /// Identifier this peer announces to the relay and to the remote side
    fn peer_id(&self) -> &str;

    /// Take the event stream. Only the first call returns `Some`.
    fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>>;

    /// Open the relay connection. A failure leaves the channel disconnected for good.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Fire-and-forget delivery of one message
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), TransportError>;

    async fn disconnect(&mut self);
}

/// Connection lifecycle shared by the channel implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connected,
    Disconnected,
}

/// Feeds relay frames into a subscriber, enforcing the single `Ready`.
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<SignalingEvent>,
    ready_sent: bool,
    closed: bool,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SignalingEvent>) -> Self {
        Self {
            tx,
            ready_sent: false,
            closed: false,
        }
    }

    fn emit(&self, event: SignalingEvent) {
        if self.tx.send(event).is_err() {
            debug!("signaling subscriber is gone, dropping event");
        }
    }

    pub(crate) fn ready(&mut self) {
        if self.ready_sent {
            warn!("relay sent a second ready, ignoring");
            return;
        }
        self.ready_sent = true;
        self.emit(SignalingEvent::Ready);
    }

    pub(crate) fn message(&mut self, message: SignalingMessage, from: Option<String>) {
        self.emit(SignalingEvent::Message { message, from });
    }

    pub(crate) fn frame(&mut self, frame: RelayFrame) {
        match frame {
            RelayFrame::Ready => self.ready(),
            RelayFrame::Data { payload, from } => match SignalingMessage::from_value(payload) {
                Ok(message) => self.message(message, from),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable data frame");
                    self.emit(SignalingEvent::Malformed(e));
                }
            },
            RelayFrame::Join { session, peer } => {
                warn!(%session, %peer, "unexpected join frame from relay");
            }
        }
    }

    pub(crate) fn malformed(&mut self, error: ProtocolError) {
        self.emit(SignalingEvent::Malformed(error));
    }

    pub(crate) fn closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.emit(SignalingEvent::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ready_is_forwarded_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(tx);
        sink.frame(RelayFrame::Ready);
        sink.frame(RelayFrame::Ready);
        assert_eq!(rx.try_recv().unwrap(), SignalingEvent::Ready);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn bad_payload_becomes_malformed_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(tx);
        sink.frame(RelayFrame::Data {
            payload: json!({"type": "renegotiate"}),
            from: None,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            SignalingEvent::Malformed(ProtocolError::UnknownMessageType("renegotiate".into()))
        );
    }

    #[test]
    fn closed_is_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(tx);
        sink.closed();
        sink.closed();
        assert_eq!(rx.try_recv().unwrap(), SignalingEvent::Closed);
        assert!(rx.try_recv().is_err());
    }
}
