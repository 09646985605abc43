//! In-process relay with the room semantics of the public relay: the second
//! participant to join makes the relay send `ready` to the first one, and
//! data is forwarded to the other participant only.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelState, EventSink, RelayFrame, SignalingChannel, SignalingEvent, SignalingMessage};
use crate::error::TransportError;

const ROOM_CAPACITY: usize = 2;

struct Member {
    peer_id: String,
    sink: EventSink,
}

#[derive(Default)]
struct Room {
    offline: bool,
    members: Vec<Member>,
}

/// Shared relay; clone it for every participant of the session.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    room: Arc<Mutex<Room>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that refuses every connection
    pub fn offline() -> Self {
        let relay = Self::default();
        relay.lock().offline = true;
        relay
    }

    /// Convenience for two participants on a fresh relay
    pub fn pair(a: &str, b: &str) -> (MemoryChannel, MemoryChannel) {
        let relay = Self::new();
        (relay.channel(a), relay.channel(b))
    }

    pub fn channel(&self, peer_id: impl Into<String>) -> MemoryChannel {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        MemoryChannel {
            relay: self.clone(),
            peer_id: peer_id.into(),
            state: ChannelState::Idle,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Room> {
        self.room.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join(&self, peer_id: &str, sink: EventSink) -> Result<(), TransportError> {
        let mut room = self.lock();
        if room.offline {
            return Err(TransportError::RelayUnreachable {
                url: "memory://".into(),
                reason: "relay is offline".into(),
            });
        }
        if room.members.len() >= ROOM_CAPACITY {
            return Err(TransportError::RelayUnreachable {
                url: "memory://".into(),
                reason: "session is full".into(),
            });
        }
        room.members.push(Member {
            peer_id: peer_id.to_owned(),
            sink,
        });
        if room.members.len() == ROOM_CAPACITY {
            if let Some(first) = room.members.first_mut() {
                first.sink.ready();
            }
        }
        Ok(())
    }

    fn forward(&self, from: &str, message: &SignalingMessage) {
        let mut room = self.lock();
        let mut delivered = false;
        for member in room.members.iter_mut().filter(|m| m.peer_id != from) {
            member.sink.message(message.clone(), Some(from.to_owned()));
            delivered = true;
        }
        if !delivered {
            debug!(%from, kind = message.kind(), "no counterpart in room, message dropped by relay");
        }
    }

    /// Take the relay down: every member sees the connection close and
    /// nobody can join afterwards.
    pub fn shutdown(&self) {
        let mut room = self.lock();
        room.offline = true;
        for mut member in room.members.drain(..) {
            member.sink.closed();
        }
    }

    fn forward_raw(&self, from: &str, payload: Value) {
        let mut room = self.lock();
        for member in room.members.iter_mut().filter(|m| m.peer_id != from) {
            member.sink.frame(RelayFrame::Data {
                payload: payload.clone(),
                from: Some(from.to_owned()),
            });
        }
    }

    fn leave(&self, peer_id: &str) {
        self.lock().members.retain(|m| m.peer_id != peer_id);
    }
}

pub struct MemoryChannel {
    relay: MemoryRelay,
    peer_id: String,
    state: ChannelState,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
}

impl MemoryChannel {
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Forward an arbitrary `data` payload, as a peer speaking another
    /// protocol version would.
    pub fn send_raw(&mut self, payload: Value) -> Result<(), TransportError> {
        if self.state != ChannelState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.relay.forward_raw(&self.peer_id, payload);
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
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
        match self
            .relay
            .join(&self.peer_id, EventSink::new(self.events_tx.clone()))
        {
            Ok(()) => {
                self.state = ChannelState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Disconnected;
                Err(e)
            }
        }
    }

    async fn send(&mut self, message: &SignalingMessage) -> Result<(), TransportError> {
        if self.state != ChannelState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.relay.forward(&self.peer_id, message);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.state == ChannelState::Connected {
            self.relay.leave(&self.peer_id);
        }
        self.state = ChannelState::Disconnected;
    }
}
