//! Local capture configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Request a microphone track.
    pub audio: bool,
    /// Request a camera track.
    pub video: bool,
    /// Join with the microphone disabled.
    pub start_muted: bool,
    /// Join with the camera disabled.
    pub start_camera_off: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            start_muted: false,
            start_camera_off: false,
        }
    }
}
