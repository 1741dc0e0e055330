//! Capture device seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::track::{MediaStream, MediaTrack, TrackKind};
use crate::error::{LiveError, Result};

/// Which kinds of capture a session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Platform camera and microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open capture for the requested kinds. Fails with `MediaUnavailable`
    /// when access is denied or a device is missing.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream>;

    /// Close the device behind a stopped track.
    fn release(&self, track: &MediaTrack);
}

/// Capture devices that produce placeholder tracks.
///
/// Used by the CLI and tests. Clones share the release ledger.
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    deny: Option<String>,
    has_camera: bool,
    releases: Arc<Mutex<HashMap<String, u32>>>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self {
            deny: None,
            has_camera: true,
            releases: Arc::default(),
        }
    }
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices that refuse every request, as if permission was denied.
    pub fn denied(reason: &str) -> Self {
        Self {
            deny: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Devices with a microphone but no camera.
    pub fn without_camera() -> Self {
        Self {
            has_camera: false,
            ..Self::default()
        }
    }

    /// How many times the track was released.
    pub fn release_count(&self, track_id: &str) -> u32 {
        self.releases
            .lock()
            .map(|r| r.get(track_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_releases(&self) -> u32 {
        self.releases.lock().map(|r| r.values().sum()).unwrap_or(0)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if let Some(reason) = &self.deny {
            return Err(LiveError::MediaUnavailable(reason.clone()));
        }
        if constraints.video && !self.has_camera {
            return Err(LiveError::MediaUnavailable("no camera found".into()));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "synthetic microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "synthetic camera"));
        }
        if tracks.is_empty() {
            return Err(LiveError::MediaUnavailable("no media kinds requested".into()));
        }
        Ok(MediaStream::new(tracks))
    }

    fn release(&self, track: &MediaTrack) {
        if let Ok(mut releases) = self.releases.lock() {
            *releases.entry(track.id().to_string()).or_insert(0) += 1;
        }
    }
}
