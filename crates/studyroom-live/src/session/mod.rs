//! One participant's live presence in a room.
//!
//! [`RoomSession::join`] acquires local media, subscribes to the room relay
//! and spawns a driver task that owns all mutable state. The handle talks to
//! the driver over a command channel; the driver reports through
//! [`SessionEvent`]s.

mod driver;
mod handle;
mod types;

pub use handle::RoomSession;
pub use types::{DropReason, SessionConfig, SessionDeps, SessionEvent, SessionStatus};
