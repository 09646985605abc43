//! Error types for a signaling session.
//!
//! Every failure ends up in the coordinator as a [`SessionError`]; none of
//! them is retried.

use thiserror::Error;

use crate::negotiation::{NegotiationState, Role};

/// Failures of the relay connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The relay could not be reached; the channel stays disconnected.
    #[error("relay unreachable at {url}: {reason}")]
    RelayUnreachable { url: String, reason: String },

    /// `send` was called before `connect` completed or after the relay went away.
    #[error("signaling channel is not connected")]
    NotConnected,

    /// A second `connect` was issued for the same channel.
    #[error("signaling channel is already connecting or connected")]
    AlreadyConnected,

    /// The channel's event stream was already handed out.
    #[error("signaling events already have a subscriber")]
    AlreadySubscribed,

    /// The relay closed the connection.
    #[error("relay closed the connection")]
    Closed,

    /// An outbound frame could not be encoded.
    #[error("could not encode relay frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

/// Input that does not fit the current negotiation state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("offer received while {state:?} as {role:?}")]
    UnexpectedOffer {
        state: NegotiationState,
        role: Option<Role>,
    },

    #[error("answer received while {state:?} as {role:?}")]
    UnexpectedAnswer {
        state: NegotiationState,
        role: Option<Role>,
    },

    /// `initiate_offer` while a negotiation is already running.
    #[error("negotiation already in progress ({state:?})")]
    NegotiationInProgress { state: NegotiationState },

    /// The session failed earlier and has to be recreated.
    #[error("session has already failed")]
    SessionFailed,

    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("unknown signaling message type {0:?}")]
    UnknownMessageType(String),

    /// Both peers announced the same identifier, so glare cannot be resolved.
    #[error("remote peer uses our own identifier {0:?}")]
    PeerIdCollision(String),
}

/// Failures of the connection handle while negotiating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("no local media available: {0}")]
    NoLocalMedia(String),

    #[error("could not create peer connection: {0}")]
    CreateConnection(String),

    #[error("could not create offer: {0}")]
    CreateOffer(String),

    #[error("could not create answer: {0}")]
    CreateAnswer(String),

    #[error("could not set local description: {0}")]
    SetLocalDescription(String),

    #[error("could not set remote description: {0}")]
    SetRemoteDescription(String),

    #[error("could not roll back local offer: {0}")]
    Rollback(String),

    #[error("could not add remote candidate: {0}")]
    AddCandidate(String),

    /// The direct transport gave up after negotiation finished.
    #[error("direct connectivity failed")]
    ConnectivityFailed,
}

/// Umbrella error reported by the session coordinator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

pub type SessionResult<T> = Result<T, SessionError>;
