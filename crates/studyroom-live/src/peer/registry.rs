//! Owned map of peer links, keyed by remote participant.

use std::collections::BTreeMap;
use std::sync::Arc;

use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::link::{NegotiationState, PeerLink};
use super::{LinkId, PeerConnector, TransportEvent};
use crate::error::Result;
use crate::media::MediaStream;

/// At most one link per remote participant.
pub struct PeerRegistry {
    links: BTreeMap<ParticipantId, PeerLink>,
    connector: Arc<dyn PeerConnector>,
    events: mpsc::Sender<TransportEvent>,
    next_link: u64,
}

impl PeerRegistry {
    pub fn new(connector: Arc<dyn PeerConnector>, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            links: BTreeMap::new(),
            connector,
            events,
            next_link: 1,
        }
    }

    /// Link for `remote`, creating it if absent. Returns the link id and
    /// whether a new connection was made.
    pub async fn create(&mut self, remote: &ParticipantId, initiator: bool) -> Result<(LinkId, bool)> {
        if let Some(link) = self.links.get(remote) {
            return Ok((link.id, false));
        }
        let id = LinkId(self.next_link);
        self.next_link += 1;
        let cancel = CancellationToken::new();
        let transport = self
            .connector
            .connect(remote, id, self.events.clone(), cancel.child_token())
            .await?;
        let link = PeerLink::new(remote.clone(), id, transport, initiator, cancel);
        self.links.insert(remote.clone(), link);
        debug!(peer = %remote, link = %id, initiator, "Peer link created");
        Ok((id, true))
    }

    pub fn get(&self, remote: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(remote)
    }

    pub fn get_mut(&mut self, remote: &ParticipantId) -> Option<&mut PeerLink> {
        self.links.get_mut(remote)
    }

    /// The link for `remote` exists and is still generation `link`.
    pub fn is_current(&self, remote: &ParticipantId, link: LinkId) -> bool {
        self.links.get(remote).is_some_and(|l| l.id == link)
    }

    /// `get_mut` guarded by link generation.
    pub fn current_mut(&mut self, remote: &ParticipantId, link: LinkId) -> Option<&mut PeerLink> {
        self.links.get_mut(remote).filter(|l| l.id == link)
    }

    pub fn contains(&self, remote: &ParticipantId) -> bool {
        self.links.contains_key(remote)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.links.keys().cloned().collect()
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn states(&self) -> BTreeMap<ParticipantId, NegotiationState> {
        self.links
            .iter()
            .map(|(id, link)| (id.clone(), link.state))
            .collect()
    }

    /// Record remote media for a link. Only the first stream is surfaced;
    /// later tracks of the same stream are merged in silently.
    pub fn set_remote_stream(
        &mut self,
        remote: &ParticipantId,
        link: LinkId,
        stream: MediaStream,
    ) -> bool {
        let Some(entry) = self.current_mut(remote, link) else {
            return false;
        };
        let Some(existing) = entry.remote_stream.as_mut() else {
            entry.remote_stream = Some(stream);
            return true;
        };
        if existing.id == stream.id {
            for track in stream.tracks {
                if !existing.tracks.iter().any(|t| t.id() == track.id()) {
                    existing.tracks.push(track);
                }
            }
        }
        false
    }

    /// Close and forget the link for `remote`. Returns the state it was in,
    /// or `None` if there was no link.
    pub async fn destroy(&mut self, remote: &ParticipantId) -> Option<NegotiationState> {
        let mut link = self.links.remove(remote)?;
        let previous = link.state;
        link.cancel.cancel();
        link.set_state(NegotiationState::Closed);
        link.transport.close().await;
        info!(peer = %remote, link = %link.id, previous = %previous, "Peer link closed");
        Some(previous)
    }

    pub async fn destroy_all(&mut self) -> usize {
        let ids = self.ids();
        for id in &ids {
            self.destroy(id).await;
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};
    use crate::peer::LoopbackConnector;

    fn registry() -> (PeerRegistry, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let connector = Arc::new(LoopbackConnector::new("me".into()));
        (PeerRegistry::new(connector, tx), rx)
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let (mut reg, _rx) = registry();
        let bob = ParticipantId::from("bob");
        let (first, created) = reg.create(&bob, true).await.unwrap();
        assert!(created);
        let (second, created) = reg.create(&bob, false).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&bob).unwrap().initiator);
    }

    #[tokio::test]
    async fn destroy_is_safe_to_repeat() {
        let (mut reg, _rx) = registry();
        let bob = ParticipantId::from("bob");
        let (id, _) = reg.create(&bob, true).await.unwrap();
        let token = reg.get(&bob).unwrap().cancel.clone();

        assert_eq!(reg.destroy(&bob).await, Some(NegotiationState::Idle));
        assert!(token.is_cancelled());
        assert_eq!(reg.destroy(&bob).await, None);
        assert!(!reg.is_current(&bob, id));

        let (next, _) = reg.create(&bob, true).await.unwrap();
        assert!(next > id);
    }

    #[tokio::test]
    async fn only_first_remote_stream_is_surfaced() {
        let (mut reg, _rx) = registry();
        let bob = ParticipantId::from("bob");
        let (id, _) = reg.create(&bob, true).await.unwrap();

        let audio = MediaTrack::new(TrackKind::Audio, "a");
        let mut stream = MediaStream::new(vec![audio]);
        assert!(reg.set_remote_stream(&bob, id, stream.clone()));

        stream.tracks = vec![MediaTrack::new(TrackKind::Video, "v")];
        assert!(!reg.set_remote_stream(&bob, id, stream));
        assert_eq!(reg.get(&bob).unwrap().remote_stream.as_ref().unwrap().tracks.len(), 2);

        let other = MediaStream::new(vec![]);
        assert!(!reg.set_remote_stream(&bob, id, other));
        assert!(!reg.set_remote_stream(&bob, LinkId(999), MediaStream::new(vec![])));
    }

    #[tokio::test]
    async fn destroy_all_empties_registry() {
        let (mut reg, _rx) = registry();
        for id in ["a", "b", "c"] {
            reg.create(&id.into(), true).await.unwrap();
        }
        assert_eq!(reg.destroy_all().await, 3);
        assert!(reg.is_empty());
    }
}
