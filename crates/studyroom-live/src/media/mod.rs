//! Local capture and media stream handles.
//!
//! The session owns exactly one [`MediaStreamManager`]. Peer links only
//! ever see read-only [`MediaTrack`] clones.

mod devices;
mod manager;
mod track;

pub use devices::{MediaConstraints, MediaDevices, SyntheticDevices};
pub use manager::MediaStreamManager;
pub use track::{MediaStream, MediaTrack, TrackKind};
