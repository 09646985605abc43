//! Relay connection over a WebSocket carrying JSON [`RelayFrame`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChannelState, EventSink, RelayFrame, SignalingChannel, SignalingEvent, SignalingMessage};
use crate::error::{ProtocolError, TransportError};

pub struct WebSocketChannel {
    url: String,
    session: String,
    peer_id: String,
    state: ChannelState,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

/// How long `disconnect` waits for the close frame to go out
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

impl WebSocketChannel {
    pub fn new(url: impl Into<String>, session: impl Into<String>, peer_id: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            session: session.into(),
            peer_id: peer_id.into(),
            state: ChannelState::Idle,
            events_tx,
            events_rx: Some(events_rx),
            outbound: None,
            writer: None,
            reader: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.events_rx.take()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state != ChannelState::Idle {
            return Err(TransportError::AlreadyConnected);
        }

        info!(url = %self.url, session = %self.session, "connecting to relay");
        let (ws, _response) = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.state = ChannelState::Disconnected;
                return Err(TransportError::RelayUnreachable {
                    url: self.url.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let (mut sink, mut stream) = ws.split();

        let join = RelayFrame::Join {
            session: self.session.clone(),
            peer: self.peer_id.clone(),
        };
        if let Err(e) = sink.send(Message::text(serde_json::to_string(&join)?)).await {
            self.state = ChannelState::Disconnected;
            return Err(TransportError::RelayUnreachable {
                url: self.url.clone(),
                reason: e.to_string(),
            });
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut events = EventSink::new(self.events_tx.clone());
        let reader = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<RelayFrame>(text.as_str()) {
                            Ok(frame) => events.frame(frame),
                            Err(e) => {
                                warn!(error = %e, "unreadable relay frame");
                                events.malformed(ProtocolError::MalformedMessage(e.to_string()));
                            }
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(?reason, "relay sent close");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "relay read failed");
                        break;
                    }
                }
            }
            events.closed();
        });

        self.outbound = Some(out_tx);
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.state = ChannelState::Connected;
        info!(peer = %self.peer_id, "relay connected");
        Ok(())
    }

    async fn send(&mut self, message: &SignalingMessage) -> Result<(), TransportError> {
        let outbound = match (&self.state, &self.outbound) {
            (ChannelState::Connected, Some(outbound)) => outbound,
            _ => return Err(TransportError::NotConnected),
        };
        let frame = RelayFrame::data(message, &self.peer_id)?;
        outbound
            .send(Message::text(serde_json::to_string(&frame)?))
            .map_err(|_| TransportError::NotConnected)?;
        debug!(kind = message.kind(), "sent to relay");
        Ok(())
    }

    async fn disconnect(&mut self) {
        // dropping the sender ends the writer loop once the close frame is out
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Message::Close(None));
        }
        if let Some(writer) = self.writer.take() {
            match timeout(CLOSE_FLUSH_TIMEOUT, writer).await {
                Ok(_) => debug!("relay close frame flushed"),
                Err(_) => warn!("relay did not take the close frame in time"),
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state = ChannelState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let mut channel = WebSocketChannel::new("ws://127.0.0.1:9", "room", "peer-a");
        let err = channel
            .send(&SignalingMessage::Offer { sdp: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn unreachable_relay_is_terminal() {
        // port 9 (discard) is not expected to accept websocket upgrades
        let mut channel = WebSocketChannel::new("ws://127.0.0.1:9", "room", "peer-a");
        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::RelayUnreachable { .. }));
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(matches!(
            channel.connect().await,
            Err(TransportError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_flushes_close_frame() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(frame)) = ws.next().await {
                let close = frame.is_close();
                frames.push(frame);
                if close {
                    break;
                }
            }
            frames
        });

        let mut channel = WebSocketChannel::new(format!("ws://{addr}"), "room", "peer-a");
        channel.connect().await.unwrap();
        channel.disconnect().await;
        assert_eq!(channel.state(), ChannelState::Disconnected);

        let frames = timeout(Duration::from_secs(5), relay).await.unwrap().unwrap();
        assert!(matches!(&frames[0], Message::Text(text) if text.as_str().contains("\"join\"")));
        assert!(frames.last().unwrap().is_close());
    }

    #[test]
    fn subscribe_hands_out_the_stream_once() {
        let mut channel = WebSocketChannel::new("ws://127.0.0.1:9", "room", "peer-a");
        assert!(channel.subscribe().is_some());
        assert!(channel.subscribe().is_none());
    }
}
