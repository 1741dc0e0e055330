//! Session configuration, dependencies, status, and events.

use std::sync::Arc;

use studyroom_common::ParticipantId;

use crate::chat::ChatMessage;
use crate::media::{MediaConstraints, MediaDevices, MediaStream};
use crate::membership::MembershipCounter;
use crate::negotiator::NegotiatorConfig;
use crate::peer::PeerConnector;
use crate::relay::Relay;

/// Tunables for one room session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub constraints: MediaConstraints,
    pub start_muted: bool,
    pub start_camera_off: bool,
    pub negotiation: NegotiatorConfig,
    /// Stall sweep period.
    pub sweep_interval: std::time::Duration,
    pub chat_max_messages: usize,
    pub chat_max_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            constraints: MediaConstraints::default(),
            start_muted: false,
            start_camera_off: false,
            negotiation: NegotiatorConfig::default(),
            sweep_interval: std::time::Duration::from_secs(1),
            chat_max_messages: 500,
            chat_max_length: 2000,
        }
    }
}

/// External collaborators a session runs against.
#[derive(Clone)]
pub struct SessionDeps {
    pub relay: Arc<dyn Relay>,
    pub connector: Arc<dyn PeerConnector>,
    pub devices: Arc<dyn MediaDevices>,
    pub membership: Arc<dyn MembershipCounter>,
}

/// Coarse session health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the relay to confirm the subscription.
    Connecting,
    Connected,
    /// Relay lost; every peer was dropped and a rejoin is pending.
    Disconnected,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a peer link was discarded without the peer leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NegotiationStalled,
    TransportFailed,
}

/// What a session reports to its owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    PeerConnected(ParticipantId),
    /// Remote media for a peer; surfaced once per link.
    RemoteStream {
        peer: ParticipantId,
        stream: MediaStream,
    },
    PeerLeft(ParticipantId),
    PeerDropped {
        peer: ParticipantId,
        reason: DropReason,
    },
    Chat(ChatMessage),
}
