//! Point-to-point media connections.
//!
//! A [`PeerConnector`] produces one [`PeerTransport`] per remote
//! participant. Transports report back asynchronously through
//! [`TransportEvent`]s tagged with the [`LinkId`] of the link that owns
//! them, so callbacks from a replaced connection can be told apart.

mod link;
mod loopback;
mod registry;
#[cfg(feature = "webrtc")]
mod rtc;

pub use link::{NegotiationState, PeerLink};
pub use loopback::LoopbackConnector;
pub use registry::PeerRegistry;
#[cfg(feature = "webrtc")]
pub use rtc::RtcConnector;

use std::sync::Arc;

use async_trait::async_trait;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::media::{MediaStream, MediaTrack};
use crate::signal::{IceCandidate, SessionDescription};

/// Generation number of a peer link. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state as reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum TransportEventKind {
    /// A local ICE candidate to trickle to the remote side.
    LocalCandidate(IceCandidate),
    /// Remote media started flowing.
    RemoteStream(MediaStream),
    StateChanged(TransportState),
}

#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub remote: ParticipantId,
    pub link: LinkId,
    pub kind: TransportEventKind,
}

/// One point-to-point media connection.
///
/// `create_offer` and `create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_track(&self, track: &MediaTrack) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self);
}

/// Factory for transports.
///
/// `cancel` fires when the owning link is destroyed. Any task the transport
/// spawns for the link must stop on it.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        remote: &ParticipantId,
        link: LinkId,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn PeerTransport>>;
}
