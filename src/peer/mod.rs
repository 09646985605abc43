pub mod connection;
pub mod ice;
pub mod media;
pub mod transport;
pub mod types;

pub use connection::{WebrtcTransport, WebrtcTransportFactory};
pub use media::{LocalMedia, MediaSource, PlaceholderVideo};
pub use transport::{PeerConnectionState, PeerTransport, TransportEvent, TransportFactory};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
