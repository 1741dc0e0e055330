//! In-process relay hub.
//!
//! Same contract as the Supabase adapter without a network: presence is
//! exact, broadcasts never reach their sender, and members can be severed
//! and restored to simulate a dropped relay socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{topic_for, Relay, RelayEvent, RelaySubscription, RELAY_EVENT_CAPACITY};
use crate::error::{LiveError, Result};

struct Member {
    generation: u64,
    tx: mpsc::Sender<RelayEvent>,
    severed: bool,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, HashMap<ParticipantId, Member>>,
}

impl HubState {
    /// Live senders in `topic` other than `except`.
    fn others(&self, topic: &str, except: &ParticipantId) -> Vec<mpsc::Sender<RelayEvent>> {
        self.rooms
            .get(topic)
            .map(|room| {
                room.iter()
                    .filter(|(id, m)| *id != except && !m.severed)
                    .map(|(_, m)| m.tx.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live member ids in `topic` other than `except`, sorted.
    fn roster(&self, topic: &str, except: &ParticipantId) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .rooms
            .get(topic)
            .map(|room| {
                room.iter()
                    .filter(|(id, m)| *id != except && !m.severed)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Remove `id` if it is still the member of `generation`. Returns the
    /// senders that should see it leave.
    fn remove(
        &mut self,
        topic: &str,
        id: &ParticipantId,
        generation: u64,
    ) -> Option<Vec<mpsc::Sender<RelayEvent>>> {
        let room = self.rooms.get_mut(topic)?;
        if room.get(id).map(|m| m.generation) != Some(generation) {
            return None;
        }
        let member = room.remove(id)?;
        if room.is_empty() {
            self.rooms.remove(topic);
        }
        if member.severed {
            return Some(Vec::new());
        }
        Some(self.others(topic, id))
    }
}

async fn deliver(targets: Vec<mpsc::Sender<RelayEvent>>, event: RelayEvent) {
    for tx in targets {
        let _ = tx.send(event.clone()).await;
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Shared in-process relay. Clones share the same rooms.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
    generations: Arc<AtomicU64>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Members currently subscribed to `room_id`, severed ones included.
    pub fn members(&self, room_id: &str) -> Vec<ParticipantId> {
        let topic = topic_for(room_id);
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<ParticipantId> = state
            .rooms
            .get(&topic)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Cut `id` off the relay: it sees `Disconnected`, the others see it leave.
    pub async fn sever(&self, room_id: &str, id: &ParticipantId) {
        let topic = topic_for(room_id);
        let plan = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let member = state
                .rooms
                .get_mut(&topic)
                .and_then(|room| room.get_mut(id))
                .filter(|m| !m.severed);
            match member {
                Some(m) => {
                    m.severed = true;
                    let own = m.tx.clone();
                    Some((own, state.others(&topic, id)))
                }
                None => None,
            }
        };
        let Some((own, others)) = plan else {
            return;
        };
        info!(topic = %topic, member = %id, "Severing loopback member");
        let _ = own.send(RelayEvent::Disconnected).await;
        deliver(others, RelayEvent::PresenceLeave(id.clone())).await;
    }

    /// Reconnect a severed member: it resubscribes and everyone sees it rejoin.
    pub async fn restore(&self, room_id: &str, id: &ParticipantId) {
        let topic = topic_for(room_id);
        let plan = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let own = state
                .rooms
                .get_mut(&topic)
                .and_then(|room| room.get_mut(id))
                .filter(|m| m.severed)
                .map(|m| {
                    m.severed = false;
                    m.tx.clone()
                });
            own.map(|own| (own, state.roster(&topic, id), state.others(&topic, id)))
        };
        let Some((own, roster, others)) = plan else {
            return;
        };
        info!(topic = %topic, member = %id, "Restoring loopback member");
        let _ = own.send(RelayEvent::Subscribed).await;
        let _ = own.send(RelayEvent::PresenceSync(roster)).await;
        deliver(others, RelayEvent::PresenceJoin(id.clone())).await;
    }
}

#[async_trait]
impl Relay for LoopbackHub {
    async fn join(
        &self,
        room_id: &str,
        local: &ParticipantId,
    ) -> Result<(Box<dyn RelaySubscription>, mpsc::Receiver<RelayEvent>)> {
        let topic = topic_for(room_id);
        let (tx, rx) = mpsc::channel(RELAY_EVENT_CAPACITY);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let (roster, others, rejoined) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| LiveError::RelayDisconnected("loopback hub poisoned".into()))?;
            let room = state.rooms.entry(topic.clone()).or_default();
            let previous = room.insert(
                local.clone(),
                Member {
                    generation,
                    tx: tx.clone(),
                    severed: false,
                },
            );
            let rejoined = previous.is_some_and(|m| !m.severed);
            (state.roster(&topic, local), state.others(&topic, local), rejoined)
        };

        debug!(topic = %topic, member = %local, present = roster.len(), "Loopback join");
        let _ = tx.send(RelayEvent::Subscribed).await;
        let _ = tx.send(RelayEvent::PresenceSync(roster)).await;
        if !rejoined {
            deliver(others, RelayEvent::PresenceJoin(local.clone())).await;
        }

        let subscription = LoopbackSubscription {
            hub: self.clone(),
            topic,
            local: local.clone(),
            generation,
            left: AtomicBool::new(false),
        };
        Ok((Box::new(subscription), rx))
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

struct LoopbackSubscription {
    hub: LoopbackHub,
    topic: String,
    local: ParticipantId,
    generation: u64,
    left: AtomicBool,
}

impl LoopbackSubscription {
    fn detach(&self) -> Option<Vec<mpsc::Sender<RelayEvent>>> {
        if self.left.swap(true, Ordering::SeqCst) {
            return None;
        }
        let mut state = self.hub.state.lock().ok()?;
        state.remove(&self.topic, &self.local, self.generation)
    }
}

#[async_trait]
impl RelaySubscription for LoopbackSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            return Err(LiveError::RelayDisconnected("subscription closed".into()));
        }
        let targets = {
            let state = self
                .hub
                .state
                .lock()
                .map_err(|_| LiveError::RelayDisconnected("loopback hub poisoned".into()))?;
            let me = state
                .rooms
                .get(&self.topic)
                .and_then(|room| room.get(&self.local))
                .filter(|m| m.generation == self.generation);
            match me {
                Some(m) if m.severed => {
                    return Err(LiveError::RelayDisconnected("member severed".into()))
                }
                Some(_) => state.others(&self.topic, &self.local),
                None => return Err(LiveError::RelayDisconnected("not subscribed".into())),
            }
        };
        deliver(
            targets,
            RelayEvent::Broadcast {
                event: event.to_string(),
                payload,
            },
        )
        .await;
        Ok(())
    }

    async fn leave(&self) {
        if let Some(others) = self.detach() {
            debug!(topic = %self.topic, member = %self.local, "Loopback leave");
            deliver(others, RelayEvent::PresenceLeave(self.local.clone())).await;
        }
    }
}

impl Drop for LoopbackSubscription {
    fn drop(&mut self) {
        if let Some(others) = self.detach() {
            for tx in others {
                if tx.try_send(RelayEvent::PresenceLeave(self.local.clone())).is_err() {
                    warn!(topic = %self.topic, member = %self.local, "Dropped leave notification");
                }
            }
        }
    }
}
