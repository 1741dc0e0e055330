pub mod chat;
pub mod error;
pub mod identity;
pub mod media;
pub mod membership;
pub mod negotiator;
pub mod peer;
pub mod realtime;
pub mod relay;
pub mod session;
pub mod signal;

pub use chat::{ChatMessage, ChatTranscript};
pub use error::{LiveError, Result, SignalParseError};
pub use identity::Identity;
pub use media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, SyntheticDevices, TrackKind};
pub use membership::{MembershipCounter, NoopMembership, SupabaseMembership};
pub use negotiator::{InitiatorPolicy, NegotiatorConfig};
pub use peer::{LoopbackConnector, NegotiationState, PeerConnector};
pub use realtime::RealtimeConfig;
pub use relay::{LoopbackHub, RealtimeRelay, Relay, RelayEvent};
pub use session::{DropReason, RoomSession, SessionConfig, SessionDeps, SessionEvent, SessionStatus};
pub use signal::{IceCandidate, SessionDescription, SignalMessage};

#[cfg(feature = "webrtc")]
pub use peer::RtcConnector;
