//! Deterministic in-process transport.
//!
//! Descriptions are plain strings of the form
//! `loopback:<offer|answer>:<owner>:<kinds>` and every transport trickles a
//! single host candidate. A transport reports `Connected` and the remote
//! stream once it holds both descriptions and one remote candidate, which is
//! the earliest point a real ICE agent could succeed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    LinkId, PeerConnector, PeerTransport, TransportEvent, TransportEventKind, TransportState,
};
use crate::error::{LiveError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::signal::{IceCandidate, SdpKind, SessionDescription};

/// Connector for sessions wired to a loopback relay.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    local: ParticipantId,
}

impl LoopbackConnector {
    pub fn new(local: ParticipantId) -> Self {
        Self { local }
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn connect(
        &self,
        remote: &ParticipantId,
        link: LinkId,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn PeerTransport>> {
        Ok(Arc::new(LoopbackTransport {
            local: self.local.clone(),
            remote: remote.clone(),
            link,
            events,
            cancel,
            state: Mutex::new(LoopbackState::default()),
        }))
    }
}

#[derive(Default)]
struct LoopbackState {
    local_kinds: Vec<TrackKind>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidate: bool,
    connected: bool,
    closed: bool,
}

struct LoopbackTransport {
    local: ParticipantId,
    remote: ParticipantId,
    link: LinkId,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    state: Mutex<LoopbackState>,
}

fn encode_sdp(kind: SdpKind, owner: &ParticipantId, kinds: &[TrackKind]) -> String {
    let kind = match kind {
        SdpKind::Offer => "offer",
        SdpKind::Answer => "answer",
    };
    let kinds: Vec<String> = kinds.iter().map(ToString::to_string).collect();
    format!("loopback:{kind}:{owner}:{}", kinds.join(","))
}

/// Owner and track kinds out of a loopback description.
fn decode_sdp(sdp: &str) -> Result<(String, Vec<TrackKind>)> {
    let malformed = || LiveError::Transport(format!("not a loopback description: {sdp}"));
    let rest = sdp.strip_prefix("loopback:").ok_or_else(malformed)?;
    let mut parts = rest.splitn(3, ':');
    let _kind = parts.next().ok_or_else(malformed)?;
    let owner = parts.next().ok_or_else(malformed)?.to_string();
    let kinds = parts
        .next()
        .unwrap_or("")
        .split(',')
        .filter_map(|k| match k {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        })
        .collect();
    Ok((owner, kinds))
}

impl LoopbackTransport {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LoopbackState>> {
        self.state
            .lock()
            .map_err(|_| LiveError::Transport("loopback transport poisoned".into()))
    }

    fn event(&self, kind: TransportEventKind) -> TransportEvent {
        TransportEvent {
            remote: self.remote.clone(),
            link: self.link,
            kind,
        }
    }

    /// Deliver events off the caller's stack, in order, until the link is
    /// cancelled.
    fn emit(&self, events: Vec<TransportEvent>) {
        if events.is_empty() {
            return;
        }
        let tx = self.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn describe(&self, kind: SdpKind) -> Result<SessionDescription> {
        let description = {
            let mut state = self.lock()?;
            if state.closed {
                return Err(LiveError::Transport("transport closed".into()));
            }
            if kind == SdpKind::Answer
                && state.remote.as_ref().map(|d| d.kind) != Some(SdpKind::Offer)
            {
                return Err(LiveError::Transport("answer requires a remote offer".into()));
            }
            let description = SessionDescription {
                kind,
                sdp: encode_sdp(kind, &self.local, &state.local_kinds),
            };
            state.local = Some(description.clone());
            description
        };

        let candidate = IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                self.link.0,
                40000 + self.link.0 % 20000
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.local.to_string()),
        };
        let mut events = vec![self.event(TransportEventKind::LocalCandidate(candidate))];
        events.extend(self.check_connected()?);
        self.emit(events);
        Ok(description)
    }

    fn check_connected(&self) -> Result<Vec<TransportEvent>> {
        let mut state = self.lock()?;
        let ready = state.local.is_some() && state.remote.is_some() && state.remote_candidate;
        if !ready || state.connected || state.closed {
            return Ok(Vec::new());
        }
        state.connected = true;
        let (owner, kinds) = match &state.remote {
            Some(desc) => decode_sdp(&desc.sdp)?,
            None => return Ok(Vec::new()),
        };
        let tracks = kinds
            .into_iter()
            .map(|kind| MediaTrack::with_id(format!("{owner}-{kind}"), kind, &format!("{owner} {kind}")))
            .collect();
        let stream = MediaStream {
            id: format!("{owner}-{}", self.link.0),
            tracks,
        };
        debug!(peer = %self.remote, link = %self.link, "Loopback transport connected");
        Ok(vec![
            self.event(TransportEventKind::StateChanged(TransportState::Connected)),
            self.event(TransportEventKind::RemoteStream(stream)),
        ])
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        let mut state = self.lock()?;
        if !state.local_kinds.contains(&track.kind()) {
            state.local_kinds.push(track.kind());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.describe(SdpKind::Offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.describe(SdpKind::Answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        decode_sdp(&description.sdp)?;
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(LiveError::Transport("transport closed".into()));
            }
            state.remote = Some(description);
        }
        let events = self.check_connected()?;
        self.emit(events);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.lock()?;
            if state.remote.is_none() {
                return Err(LiveError::Transport(
                    "candidate before remote description".into(),
                ));
            }
            state.remote_candidate = true;
        }
        let events = self.check_connected()?;
        self.emit(events);
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (
        Arc<dyn PeerTransport>,
        Arc<dyn PeerTransport>,
        mpsc::Receiver<TransportEvent>,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (tx_a, rx_a) = mpsc::channel(16);
        let (tx_b, rx_b) = mpsc::channel(16);
        let a = LoopbackConnector::new("alice".into())
            .connect(&"bob".into(), LinkId(1), tx_a, CancellationToken::new())
            .await
            .unwrap();
        let b = LoopbackConnector::new("bob".into())
            .connect(&"alice".into(), LinkId(7), tx_b, CancellationToken::new())
            .await
            .unwrap();
        (a, b, rx_a, rx_b)
    }

    fn candidate_of(event: TransportEvent) -> IceCandidate {
        match event.kind {
            TransportEventKind::LocalCandidate(c) => c,
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn sdp_encodes_owner_and_kinds() {
        let sdp = encode_sdp(
            SdpKind::Offer,
            &"alice".into(),
            &[TrackKind::Audio, TrackKind::Video],
        );
        assert_eq!(sdp, "loopback:offer:alice:audio,video");
        let (owner, kinds) = decode_sdp(&sdp).unwrap();
        assert_eq!(owner, "alice");
        assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
        assert!(decode_sdp("v=0").is_err());
    }

    #[tokio::test]
    async fn full_exchange_connects_both_sides() {
        let (a, b, mut rx_a, mut rx_b) = pair().await;
        a.add_local_track(&MediaTrack::new(TrackKind::Audio, "mic"))
            .await
            .unwrap();

        let offer = a.create_offer().await.unwrap();
        let cand_a = candidate_of(rx_a.recv().await.unwrap());

        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        let cand_b = candidate_of(rx_b.recv().await.unwrap());

        a.set_remote_description(answer).await.unwrap();
        a.add_ice_candidate(cand_b).await.unwrap();
        b.add_ice_candidate(cand_a).await.unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let connected = rx.recv().await.unwrap();
            assert!(matches!(
                connected.kind,
                TransportEventKind::StateChanged(TransportState::Connected)
            ));
            assert!(matches!(
                rx.recv().await.unwrap().kind,
                TransportEventKind::RemoteStream(_)
            ));
        }
    }

    #[tokio::test]
    async fn remote_stream_reflects_offered_tracks() {
        let (a, b, _rx_a, mut rx_b) = pair().await;
        a.add_local_track(&MediaTrack::new(TrackKind::Video, "cam"))
            .await
            .unwrap();
        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        b.create_answer().await.unwrap();
        let _ = rx_b.recv().await;
        b.add_ice_candidate(IceCandidate::new("candidate:x")).await.unwrap();
        let _connected = rx_b.recv().await.unwrap();
        match rx_b.recv().await.unwrap().kind {
            TransportEventKind::RemoteStream(stream) => {
                assert_eq!(stream.tracks.len(), 1);
                assert_eq!(stream.tracks[0].kind(), TrackKind::Video);
                assert_eq!(stream.tracks[0].id(), "alice-video");
            }
            other => panic!("expected stream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ordering_errors() {
        let (a, _b, _rx_a, _rx_b) = pair().await;
        assert!(a.create_answer().await.is_err());
        assert!(a
            .add_ice_candidate(IceCandidate::new("candidate:x"))
            .await
            .is_err());
        a.close().await;
        assert!(a.create_offer().await.is_err());
    }

    #[tokio::test]
    async fn cancelled_link_delivers_nothing() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let transport = LoopbackConnector::new("alice".into())
            .connect(&"bob".into(), LinkId(3), tx, cancel.clone())
            .await
            .unwrap();

        cancel.cancel();
        transport.create_offer().await.unwrap();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }
}
