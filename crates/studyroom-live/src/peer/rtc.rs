//! WebRTC transport built on the `webrtc` crate.
//!
//! Local tracks are published as sample tracks (Opus for audio, VP8 for
//! video). Synthetic capture pushes no samples, which still negotiates and
//! connects. The RTP and RTCP readers spawned per link stop when the link's
//! token is cancelled.

use std::sync::Arc;

use async_trait::async_trait;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{
    LinkId, PeerConnector, PeerTransport, TransportEvent, TransportEventKind, TransportState,
};
use crate::error::{LiveError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::signal::{IceCandidate, SdpKind, SessionDescription};

fn transport_err(e: webrtc::Error) -> LiveError {
    LiveError::Transport(e.to_string())
}

/// Connector producing real WebRTC peer connections.
#[derive(Debug, Clone)]
pub struct RtcConnector {
    ice_servers: Vec<String>,
}

impl RtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        remote: &ParticipantId,
        link: LinkId,
        events: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(transport_err)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(transport_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(transport_err)?,
        );

        let owner = remote.clone();
        let tag = move |kind: TransportEventKind| TransportEvent {
            remote: owner.clone(),
            link,
            kind,
        };

        let state_tx = events.clone();
        let state_event = tag.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let make = state_event.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => TransportState::Connecting,
                };
                let _ = tx.send(make(TransportEventKind::StateChanged(state))).await;
            })
        }));

        let ice_tx = events.clone();
        let ice_event = tag.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let make = ice_event.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                };
                let _ = tx
                    .send(make(TransportEventKind::LocalCandidate(candidate)))
                    .await;
            })
        }));

        // All remote tracks of this connection form one stream.
        let stream_id = format!("{remote}-{}", link.0);
        let track_tx = events.clone();
        let track_event = tag;
        let track_cancel = cancel.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let make = track_event.clone();
            let stream_id = stream_id.clone();
            let cancel = track_cancel.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!(stream = %stream_id, kind = %kind, ssrc = track.ssrc(), "Remote track received");
                let media = MediaTrack::with_id(track.id(), kind, &track.stream_id());
                let stream = MediaStream {
                    id: stream_id,
                    tracks: vec![media],
                };
                let _ = tx.send(make(TransportEventKind::RemoteStream(stream))).await;

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            packet = track.read_rtp() => {
                                if packet.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            })
        }));

        debug!(peer = %remote, link = %link, "WebRTC peer connection created");
        Ok(Arc::new(RtcTransport { pc, cancel }))
    }
}

/// One WebRTC peer connection.
struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    cancel: CancellationToken,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_local_track(&self, track: &MediaTrack) -> Result<()> {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            "studyroom".to_string(),
        ));
        let rtp_sender = self
            .pc
            .add_track(sample_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport_err)?;

        // RTCP must be read for interceptors to work.
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = rtp_sender.read(&mut rtcp_buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(transport_err)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(transport_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(transport_err)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(transport_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(transport_err)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(transport_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(transport_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Failed to close peer connection");
        }
    }
}
