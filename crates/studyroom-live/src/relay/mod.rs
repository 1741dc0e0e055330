//! Room relay: presence plus broadcast on one named topic.
//!
//! Every adapter turns its transport into a single ordered stream of
//! [`RelayEvent`]s so the session can `select!` over it.

mod loopback;
mod realtime;

pub use loopback::LoopbackHub;
pub use realtime::RealtimeRelay;

use async_trait::async_trait;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of every relay event channel.
pub(crate) const RELAY_EVENT_CAPACITY: usize = 256;

/// What a relay subscription reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The subscription is live and local presence is announced.
    Subscribed,
    /// Members already in the room when we subscribed (self excluded).
    PresenceSync(Vec<ParticipantId>),
    /// A member arrived after we subscribed.
    PresenceJoin(ParticipantId),
    /// A member left, explicitly or by dropping off the relay.
    PresenceLeave(ParticipantId),
    /// A message broadcast by another member.
    Broadcast {
        event: String,
        payload: serde_json::Value,
    },
    /// The relay connection dropped. A fresh `Subscribed` follows on recovery.
    Disconnected,
}

/// A publish/subscribe service able to host rooms.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Subscribe to `room_id` as `local` and announce presence.
    async fn join(
        &self,
        room_id: &str,
        local: &ParticipantId,
    ) -> Result<(Box<dyn RelaySubscription>, mpsc::Receiver<RelayEvent>)>;
}

/// A live membership in one room topic.
#[async_trait]
pub trait RelaySubscription: Send + Sync {
    fn topic(&self) -> &str;

    /// Send `payload` under `event` to every other member.
    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()>;

    /// Unsubscribe. Other members see a presence leave.
    async fn leave(&self);
}

/// Relay topic for a room.
pub fn topic_for(room_id: &str) -> String {
    format!("room:{room_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_prefixed_room_id() {
        assert_eq!(topic_for("42"), "room:42");
    }
}
