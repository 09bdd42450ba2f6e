//! Transport adapter interface: commands issued by the session, events fed back.
//!
//! The underlying mesh supplies discovery, secure reliable delivery to a named
//! peer, and connect/disconnect lifecycle. Command methods are synchronous and
//! may only fail fast (bad argument, link already gone); asynchronous outcomes
//! arrive as [`TransportEvent`]s through the host's event channel.

use crate::identity::{PeerId, PeerIdentity};
use crate::protocol::DiscoveryInfo;

/// Connection state of a named peer as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransportState {
    Connecting,
    Connected,
    NotConnected,
}

/// Events emitted by a transport adapter, funneled into the session loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerFound {
        peer: PeerIdentity,
        info: Option<DiscoveryInfo>,
    },
    PeerLost {
        peer_id: PeerId,
    },
    InvitationReceived {
        peer: PeerIdentity,
        info: Option<DiscoveryInfo>,
    },
    PeerStateChanged {
        peer_id: PeerId,
        state: PeerTransportState,
    },
    DataReceived {
        peer_id: PeerId,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not running")]
    NotRunning,
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("send failed: {0}")]
    Send(String),
    #[error("{0}")]
    Other(String),
}

/// Transport commands. One implementation per platform mesh.
pub trait Transport: Send {
    /// Begin advertising the local identity with attached discovery metadata.
    fn start_advertising(&mut self, info: &DiscoveryInfo) -> Result<(), TransportError>;
    fn stop_advertising(&mut self) -> Result<(), TransportError>;
    /// Begin browsing for peers advertising the same service id.
    fn start_browsing(&mut self) -> Result<(), TransportError>;
    fn stop_browsing(&mut self) -> Result<(), TransportError>;
    /// Invite a discovered peer to a session.
    fn invite(&mut self, peer_id: &PeerId, timeout_secs: u32) -> Result<(), TransportError>;
    /// Answer a received invitation.
    fn respond_to_invitation(&mut self, peer_id: &PeerId, accept: bool)
        -> Result<(), TransportError>;
    /// Send an encoded frame to a connected peer. `reliable` is a delivery hint;
    /// meshes without an unreliable channel may ignore it.
    fn send(&mut self, peer_id: &PeerId, frame: Vec<u8>, reliable: bool)
        -> Result<(), TransportError>;
    /// Tear down every link and stop all activity.
    fn disconnect_all(&mut self) -> Result<(), TransportError>;
}
