//! Local stream lifecycle: acquire, toggle, release.

use std::sync::Arc;

use tracing::{debug, info};

use super::devices::{MediaConstraints, MediaDevices};
use super::track::{MediaStream, TrackKind};
use crate::error::Result;

/// Owns the local capture stream for one session.
pub struct MediaStreamManager {
    devices: Arc<dyn MediaDevices>,
    local: Option<MediaStream>,
}

impl MediaStreamManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            local: None,
        }
    }

    /// Open the camera and microphone. An already acquired stream is reused.
    pub async fn acquire_local(&mut self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if let Some(stream) = &self.local {
            return Ok(stream.clone());
        }
        let stream = self.devices.acquire(constraints).await?;
        info!(
            stream = %stream.id,
            audio = stream.audio_tracks().count(),
            video = stream.video_tracks().count(),
            "Local media acquired"
        );
        self.local = Some(stream.clone());
        Ok(stream)
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local.as_ref()
    }

    /// Mute or unmute. No renegotiation is needed.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.set_kind_enabled(TrackKind::Audio, enabled);
    }

    /// Turn the camera on or off. No renegotiation is needed.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.set_kind_enabled(TrackKind::Video, enabled);
    }

    fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        let Some(stream) = &self.local else {
            return;
        };
        for track in stream.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
        debug!(kind = %kind, enabled, "Local track toggled");
    }

    /// Stop every local track and close its device. Safe to call again;
    /// returns how many tracks this call stopped.
    pub fn release(&mut self) -> usize {
        let Some(stream) = &self.local else {
            return 0;
        };
        let mut stopped = 0;
        for track in &stream.tracks {
            if track.stop() {
                self.devices.release(track);
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stream = %stream.id, stopped, "Local media released");
        }
        stopped
    }
}
