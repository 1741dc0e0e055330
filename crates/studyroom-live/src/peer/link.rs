use std::sync::Arc;

use studyroom_common::ParticipantId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LinkId, PeerTransport};
use crate::error::Result;
use crate::media::MediaStream;
use crate::signal::IceCandidate;

/// Where a link is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    AnswerSent,
    Connected,
    Closed,
}

impl NegotiationState {
    /// Still waiting on the remote side.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Idle | Self::OfferSent | Self::AnswerSent)
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::OfferSent => "offer-sent",
            Self::AnswerSent => "answer-sent",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Everything the session knows about one remote participant.
pub struct PeerLink {
    pub remote: ParticipantId,
    pub id: LinkId,
    pub transport: Arc<dyn PeerTransport>,
    pub state: NegotiationState,
    /// When `state` was entered.
    pub state_since: Instant,
    /// Whether this side sends the offer.
    pub initiator: bool,
    /// Offers made (initiator) or answers given so far.
    pub attempts: u32,
    pub remote_description_applied: bool,
    /// Remote candidates held until the remote description is applied.
    pub pending_candidates: Vec<IceCandidate>,
    pub remote_stream: Option<MediaStream>,
    /// Parent of the token handed to the transport; cancelled on destroy.
    pub cancel: CancellationToken,
}

impl PeerLink {
    pub(crate) fn new(
        remote: ParticipantId,
        id: LinkId,
        transport: Arc<dyn PeerTransport>,
        initiator: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            id,
            transport,
            state: NegotiationState::Idle,
            state_since: Instant::now(),
            initiator,
            attempts: 0,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            remote_stream: None,
            cancel,
        }
    }

    pub fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            debug!(peer = %self.remote, link = %self.id, from = %self.state, to = %state, "Link state");
            self.state = state;
            self.state_since = Instant::now();
        }
    }

    /// Add every local track to the transport.
    pub async fn attach_local_media(&self, stream: &MediaStream) -> Result<()> {
        for track in &stream.tracks {
            self.transport.add_local_track(track).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote", &self.remote)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("initiator", &self.initiator)
            .field("attempts", &self.attempts)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_remote_stream", &self.remote_stream.is_some())
            .finish()
    }
}
