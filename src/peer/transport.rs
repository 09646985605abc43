use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::peer::media::LocalMedia;
use crate::peer::types::{IceCandidate, SessionDescription};

/// Connection state of the direct transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Things the connection handle reports on its own
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connectivity path was gathered locally (trickle ICE)
    LocalCandidate(IceCandidate),
    GatheringComplete,
    /// The counterpart's media arrived
    RemoteTrack { id: String, kind: String },
    ConnectionState(PeerConnectionState),
}

/// The connection handle: one direct peer transport per session.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Drop an uncommitted local offer and return to a stable signaling state
    async fn rollback(&self) -> Result<(), NegotiationError>;

    async fn close(&self);
}

/// Builds the connection handle once negotiation is about to start.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: PeerTransport;

    async fn create(
        &self,
        media: &LocalMedia,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self::Transport, NegotiationError>;
}
