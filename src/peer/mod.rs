pub mod connection;
pub mod description;
pub mod ice;
pub mod media;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{WebRtcFactory, WebRtcTransport};
pub use media::{LocalStream, MediaCapture, MediaTrack, RemoteStream, SyntheticCapture, TrackKind};
pub use state::{ConnectivityState, SessionState};
pub use transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
pub use types::{IceCandidate, Role, Room, SdpKind, ServerConfig, SessionDescription};
