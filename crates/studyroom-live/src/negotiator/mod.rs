//! Per-peer offer/answer state machine.
//!
//! The negotiator owns the peer registry and turns relay presence, inbound
//! signals, and transport callbacks into link state changes. It never talks
//! to the relay itself: outgoing signals and session events are collected in
//! an [`Outbox`] that the session driver drains after every call.
//!
//! Transport calls are awaited inline. After every await the link is looked
//! up again by [`LinkId`], so a link destroyed or replaced meanwhile is never
//! touched.

mod candidates;
#[cfg(test)]
mod tests;

pub use candidates::CandidateBuffer;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use studyroom_common::ParticipantId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LiveError, Result};
use crate::media::MediaStream;
use crate::peer::{
    LinkId, NegotiationState, PeerLink, PeerRegistry, PeerTransport, TransportEvent,
    TransportEventKind, TransportState,
};
use crate::session::{DropReason, SessionEvent};
use crate::signal::{IceCandidate, SessionDescription, SignalMessage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which side of a pair sends the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitiatorPolicy {
    /// The lexicographically smaller participant id offers.
    #[default]
    LowerId,
    /// Whoever sees the other arrive later offers; snapshot members are
    /// only ever answered.
    Observer,
}

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub initiator: InitiatorPolicy,
    /// How long a link may sit in a pending state.
    pub timeout: Duration,
    /// Offers an initiator makes before giving up on a peer.
    pub max_attempts: u32,
    pub candidate_ttl: Duration,
    pub candidate_buffer_max: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            initiator: InitiatorPolicy::LowerId,
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            candidate_ttl: Duration::from_secs(10),
            candidate_buffer_max: 32,
        }
    }
}

/// Signals to broadcast and events to surface, in order.
#[derive(Debug, Default)]
pub struct Outbox {
    pub signals: Vec<SignalMessage>,
    pub events: Vec<SessionEvent>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Negotiator
// ---------------------------------------------------------------------------

pub struct Negotiator {
    local: ParticipantId,
    config: NegotiatorConfig,
    registry: PeerRegistry,
    local_stream: Option<MediaStream>,
    early: CandidateBuffer,
    present: BTreeSet<ParticipantId>,
}

impl Negotiator {
    pub fn new(local: ParticipantId, config: NegotiatorConfig, registry: PeerRegistry) -> Self {
        let early = CandidateBuffer::new(config.candidate_ttl, config.candidate_buffer_max);
        Self {
            local,
            config,
            registry,
            local_stream: None,
            early,
            present: BTreeSet::new(),
        }
    }

    /// Stream attached to every link created from now on.
    pub fn set_local_stream(&mut self, stream: MediaStream) {
        self.local_stream = Some(stream);
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn states(&self) -> BTreeMap<ParticipantId, NegotiationState> {
        self.registry.states()
    }

    /// Participants currently announced by presence.
    pub fn present(&self) -> impl Iterator<Item = &ParticipantId> {
        self.present.iter()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.early.len()
    }

    fn should_offer(&self, peer: &ParticipantId, later_join: bool) -> bool {
        match self.config.initiator {
            InitiatorPolicy::LowerId => self.local < *peer,
            InitiatorPolicy::Observer => later_join,
        }
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Members present when we subscribed.
    pub async fn on_presence_sync(&mut self, members: Vec<ParticipantId>, out: &mut Outbox) {
        self.present = members
            .into_iter()
            .filter(|id| *id != self.local)
            .collect();
        let offer_to: Vec<ParticipantId> = self
            .present
            .iter()
            .filter(|id| self.should_offer(id, false))
            .cloned()
            .collect();
        debug!(present = self.present.len(), offering = offer_to.len(), "Presence sync");
        for peer in offer_to {
            self.start_offer(&peer, out).await;
        }
    }

    pub async fn on_presence_join(&mut self, peer: ParticipantId, out: &mut Outbox) {
        if peer == self.local {
            return;
        }
        info!(peer = %peer, "Peer joined");
        self.present.insert(peer.clone());
        if self.should_offer(&peer, true) {
            self.start_offer(&peer, out).await;
        }
    }

    pub async fn on_presence_leave(&mut self, peer: ParticipantId, out: &mut Outbox) {
        self.present.remove(&peer);
        self.early.discard(&peer);
        if self.registry.destroy(&peer).await.is_some() {
            out.events.push(SessionEvent::PeerLeft(peer.clone()));
        }
        info!(peer = %peer, "Peer left");
    }

    /// The relay dropped: treat every peer as gone until presence returns.
    pub async fn on_relay_lost(&mut self, out: &mut Outbox) {
        for peer in self.registry.ids() {
            if self.registry.destroy(&peer).await.is_some() {
                out.events.push(SessionEvent::PeerLeft(peer));
            }
        }
        self.present.clear();
        self.early.clear();
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Handle an inbound negotiation message. Messages for someone else,
    /// from ourselves, or chat are ignored.
    pub async fn on_signal(&mut self, msg: SignalMessage, out: &mut Outbox) {
        if msg.target() != Some(&self.local) {
            debug!(kind = msg.kind(), target = ?msg.target(), "Signal not for us");
            return;
        }
        if msg.from() == Some(&self.local) {
            return;
        }
        match msg {
            SignalMessage::Offer {
                from, description, ..
            } => self.on_offer(from, description, out).await,
            SignalMessage::Answer {
                from, description, ..
            } => self.on_answer(from, description, out).await,
            SignalMessage::Candidate {
                from, candidate, ..
            } => self.on_candidate(from, candidate, out).await,
            SignalMessage::Chat(_) => {}
        }
    }

    async fn on_offer(
        &mut self,
        from: ParticipantId,
        description: SessionDescription,
        out: &mut Outbox,
    ) {
        // Only a connected link answers on its existing transport. Any other
        // link predates this offer, which comes from a fresh remote connection.
        if let Some(link) = self.registry.get(&from) {
            match link.state {
                NegotiationState::OfferSent if self.local < from => {
                    debug!(peer = %from, "Glare: keeping our offer");
                    return;
                }
                NegotiationState::OfferSent => {
                    debug!(peer = %from, "Glare: yielding to their offer");
                    self.registry.destroy(&from).await;
                }
                NegotiationState::Connected => {
                    debug!(peer = %from, "Offer on connected link");
                }
                state => {
                    debug!(peer = %from, state = %state, "Replacing stale link for new offer");
                    self.registry.destroy(&from).await;
                }
            }
        }
        self.present.insert(from.clone());
        if let Err(e) = self.answer_offer(&from, description, out).await {
            warn!(peer = %from, error = %e, "Failed to answer offer");
            self.drop_link(&from, DropReason::TransportFailed, out).await;
        }
    }

    async fn answer_offer(
        &mut self,
        from: &ParticipantId,
        description: SessionDescription,
        out: &mut Outbox,
    ) -> Result<()> {
        let (link_id, created) = self.registry.create(from, false).await?;
        let transport = self.prepare_link(from, link_id, created).await?;

        transport.set_remote_description(description).await?;
        let queued = match self.registry.current_mut(from, link_id) {
            Some(link) => {
                link.remote_description_applied = true;
                std::mem::take(&mut link.pending_candidates)
            }
            None => return Ok(()),
        };
        let applied = apply_candidates(&transport, from, queued).await;

        let answer = transport.create_answer().await?;
        let Some(link) = self.registry.current_mut(from, link_id) else {
            return Ok(());
        };
        link.attempts += 1;
        if link.state != NegotiationState::Connected {
            link.set_state(NegotiationState::AnswerSent);
        }
        link.state_since = Instant::now();
        if applied > 0 {
            mark_connected(link, out);
        }
        out.signals.push(SignalMessage::Answer {
            target: from.clone(),
            from: self.local.clone(),
            description: answer,
        });
        info!(peer = %from, link = %link_id, "Answer sent");
        Ok(())
    }

    async fn on_answer(
        &mut self,
        from: ParticipantId,
        description: SessionDescription,
        out: &mut Outbox,
    ) {
        let (link_id, transport) = match self.registry.get(&from) {
            Some(link) if link.state == NegotiationState::OfferSent => {
                (link.id, Arc::clone(&link.transport))
            }
            Some(link) => {
                debug!(peer = %from, state = %link.state, "Unexpected answer ignored");
                return;
            }
            None => {
                debug!(peer = %from, "Answer for unknown peer ignored");
                return;
            }
        };

        if let Err(e) = transport.set_remote_description(description).await {
            warn!(peer = %from, error = %e, "Failed to apply answer");
            self.retry_or_drop(&from, DropReason::TransportFailed, out).await;
            return;
        }
        let queued = match self.registry.current_mut(&from, link_id) {
            Some(link) => {
                link.remote_description_applied = true;
                mark_connected(link, out);
                std::mem::take(&mut link.pending_candidates)
            }
            None => return,
        };
        apply_candidates(&transport, &from, queued).await;
    }

    async fn on_candidate(&mut self, from: ParticipantId, candidate: IceCandidate, out: &mut Outbox) {
        let (link_id, transport) = match self.registry.get_mut(&from) {
            None => {
                debug!(peer = %from, "Buffering early candidate");
                self.early.push(&from, candidate, Instant::now());
                return;
            }
            Some(link) if !link.remote_description_applied => {
                if link.pending_candidates.len() < self.config.candidate_buffer_max {
                    link.pending_candidates.push(candidate);
                }
                return;
            }
            Some(link) => (link.id, Arc::clone(&link.transport)),
        };

        if let Err(e) = transport.add_ice_candidate(candidate).await {
            debug!(peer = %from, error = %e, "Candidate rejected");
            return;
        }
        if let Some(link) = self.registry.current_mut(&from, link_id) {
            if link.state == NegotiationState::AnswerSent {
                mark_connected(link, out);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transport callbacks
    // -----------------------------------------------------------------------

    pub async fn on_transport_event(&mut self, event: TransportEvent, out: &mut Outbox) {
        let TransportEvent { remote, link, kind } = event;
        if !self.registry.is_current(&remote, link) {
            debug!(peer = %remote, link = %link, "Stale transport event ignored");
            return;
        }
        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                out.signals.push(SignalMessage::Candidate {
                    target: remote,
                    from: self.local.clone(),
                    candidate,
                });
            }
            TransportEventKind::RemoteStream(stream) => {
                if self.registry.set_remote_stream(&remote, link, stream.clone()) {
                    info!(peer = %remote, stream = %stream.id, "Remote stream");
                    out.events.push(SessionEvent::RemoteStream {
                        peer: remote,
                        stream,
                    });
                }
            }
            TransportEventKind::StateChanged(TransportState::Connected) => {
                if let Some(entry) = self.registry.current_mut(&remote, link) {
                    mark_connected(entry, out);
                }
            }
            TransportEventKind::StateChanged(TransportState::Failed) => {
                warn!(peer = %remote, link = %link, "Transport failed");
                self.retry_or_drop(&remote, DropReason::TransportFailed, out).await;
            }
            TransportEventKind::StateChanged(state) => {
                debug!(peer = %remote, link = %link, state = ?state, "Transport state");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    /// Retry or discard links stuck negotiating longer than the timeout.
    pub async fn sweep(&mut self, now: Instant, out: &mut Outbox) {
        let stale: Vec<ParticipantId> = self
            .registry
            .links()
            .filter(|l| l.state.is_pending() && now.duration_since(l.state_since) >= self.config.timeout)
            .map(|l| l.remote.clone())
            .collect();
        for peer in stale {
            self.retry_or_drop(&peer, DropReason::NegotiationStalled, out).await;
        }
        let expired = self.early.purge(now);
        if expired > 0 {
            debug!(expired, "Expired early candidates");
        }
    }

    /// Close every link. Used on session exit.
    pub async fn teardown(&mut self) -> usize {
        self.present.clear();
        self.early.clear();
        self.registry.destroy_all().await
    }

    // -----------------------------------------------------------------------
    // Link lifecycle
    // -----------------------------------------------------------------------

    async fn start_offer(&mut self, peer: &ParticipantId, out: &mut Outbox) {
        if let Err(e) = self.offer_to(peer, 0, out).await {
            warn!(peer = %peer, error = %e, "Failed to create offer");
            self.drop_link(peer, DropReason::TransportFailed, out).await;
        }
    }

    async fn offer_to(&mut self, peer: &ParticipantId, prior_attempts: u32, out: &mut Outbox) -> Result<()> {
        let (link_id, created) = self.registry.create(peer, true).await?;
        if !created {
            return Ok(());
        }
        let transport = self.prepare_link(peer, link_id, created).await?;

        let offer = transport.create_offer().await?;
        let Some(link) = self.registry.current_mut(peer, link_id) else {
            return Ok(());
        };
        link.attempts = prior_attempts + 1;
        link.set_state(NegotiationState::OfferSent);
        info!(peer = %peer, link = %link_id, attempt = link.attempts, "Offer sent");
        out.signals.push(SignalMessage::Offer {
            target: peer.clone(),
            from: self.local.clone(),
            description: offer,
        });
        Ok(())
    }

    /// Seed a fresh link with early candidates and local media.
    async fn prepare_link(
        &mut self,
        peer: &ParticipantId,
        link_id: LinkId,
        created: bool,
    ) -> Result<Arc<dyn PeerTransport>> {
        let link = self
            .registry
            .current_mut(peer, link_id)
            .ok_or_else(|| LiveError::Transport(format!("link {link_id} for {peer} vanished")))?;
        let transport = Arc::clone(&link.transport);
        if created {
            let early = self.early.take(peer, Instant::now());
            if !early.is_empty() {
                debug!(peer = %peer, count = early.len(), "Handing early candidates to link");
            }
            link.pending_candidates.extend(early);
            if let Some(stream) = &self.local_stream {
                link.attach_local_media(stream).await?;
            }
        }
        Ok(transport)
    }

    async fn retry_or_drop(&mut self, peer: &ParticipantId, reason: DropReason, out: &mut Outbox) {
        let Some(link) = self.registry.get(peer) else {
            return;
        };
        let attempts = link.attempts;
        let can_retry = link.initiator
            && attempts < self.config.max_attempts
            && self.present.contains(peer);
        if !can_retry {
            self.drop_link(peer, reason, out).await;
            return;
        }

        info!(peer = %peer, attempt = attempts + 1, reason = ?reason, "Retrying negotiation");
        self.registry.destroy(peer).await;
        if let Err(e) = self.offer_to(peer, attempts, out).await {
            warn!(peer = %peer, error = %e, "Retry failed");
            self.drop_link(peer, DropReason::TransportFailed, out).await;
        }
    }

    async fn drop_link(&mut self, peer: &ParticipantId, reason: DropReason, out: &mut Outbox) {
        let attempts = self.registry.get(peer).map(|l| l.attempts).unwrap_or(0);
        if self.registry.destroy(peer).await.is_some() {
            match reason {
                DropReason::NegotiationStalled => {
                    let err = LiveError::NegotiationStalled {
                        peer: peer.clone(),
                        attempts,
                    };
                    warn!(peer = %peer, "{err}; link discarded");
                }
                DropReason::TransportFailed => {
                    warn!(peer = %peer, attempts, "Transport failed; link discarded");
                }
            }
            out.events.push(SessionEvent::PeerDropped {
                peer: peer.clone(),
                reason,
            });
        }
    }
}

fn mark_connected(link: &mut PeerLink, out: &mut Outbox) {
    if link.state != NegotiationState::Connected {
        link.set_state(NegotiationState::Connected);
        info!(peer = %link.remote, link = %link.id, "Peer connected");
        out.events.push(SessionEvent::PeerConnected(link.remote.clone()));
    }
}

/// Apply queued candidates; returns how many the transport accepted.
async fn apply_candidates(
    transport: &Arc<dyn PeerTransport>,
    peer: &ParticipantId,
    candidates: Vec<IceCandidate>,
) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => debug!(peer = %peer, error = %e, "Queued candidate rejected"),
        }
    }
    applied
}
