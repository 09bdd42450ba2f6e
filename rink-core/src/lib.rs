//! RinkLink session manager core.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod diagnostics;
pub mod gate;
pub mod identity;
pub mod keepalive;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod trust;
pub mod wire;

pub use diagnostics::{ConnectionDiagnostics, DiagnosticsReport, DisconnectReason};
pub use gate::{InvitationDirection, InvitationGate, PendingInvitation};
pub use identity::{IdentityToken, PeerId, PeerIdentity};
pub use protocol::{
    DiscoveryInfo, Message, MessageFamily, MessageType, PairingMode, Role, PROTOCOL_VERSION,
    SERVICE_ID,
};
pub use reconnect::{Reconnect, ReconnectPolicy};
pub use session::{
    ConnectionState, SessionAction, SessionConfig, SessionCore, SessionEvent, SessionNotification,
    TimerKind,
};
pub use transport::{PeerTransportState, Transport, TransportError, TransportEvent};
pub use trust::{MemoryTrustStore, TrustStore, TrustStoreError, TrustedPeerRecord};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
