use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use studyroom_common::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// A shared handle to one audio or video track.
///
/// Clones observe the same state. Only the owning manager may toggle or
/// stop a local track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: &str) -> Self {
        Self::with_id(new_id(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: &str) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.to_string(),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop the track. Returns true only for the call that stopped it.
    pub(crate) fn stop(&self) -> bool {
        !self.inner.stopped.swap(true, Ordering::SeqCst)
    }
}

/// A group of tracks from one source (local capture or one remote peer).
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: new_id(),
            tracks,
        }
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let view = track.clone();
        track.set_enabled(false);
        assert!(!view.is_enabled());
        assert!(track.stop());
        assert!(!view.stop());
        assert!(view.is_stopped());
    }

    #[test]
    fn stream_splits_by_kind() {
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "mic"),
            MediaTrack::new(TrackKind::Video, "cam"),
        ]);
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().next().map(|t| t.label()), Some("cam"));
    }
}
