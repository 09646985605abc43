//! Peer-to-peer media session over a signaling relay: offer/answer with
//! trickle ICE, driven by a sans-IO negotiation state machine.

pub mod config;
pub mod error;
pub mod logger;
pub mod negotiation;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::AppConfig;
pub use error::{NegotiationError, ProtocolError, SessionError, SessionResult, TransportError};
pub use negotiation::{NegotiationAction, NegotiationState, NegotiationStateMachine, Role};
pub use session::{Session, SessionCoordinator, SessionEvent, SessionSummary};
pub use signaling::{SignalingChannel, SignalingEvent, SignalingMessage};
