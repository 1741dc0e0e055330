//! Supabase Realtime relay adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use studyroom_common::ParticipantId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{topic_for, Relay, RelayEvent, RelaySubscription, RELAY_EVENT_CAPACITY};
use crate::error::{LiveError, Result};
use crate::realtime::{ChannelConfig, RealtimeClient, RealtimeConfig, RealtimeEvent};

/// Relay backed by a Supabase Realtime project.
#[derive(Debug, Clone)]
pub struct RealtimeRelay {
    config: RealtimeConfig,
}

impl RealtimeRelay {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Relay for RealtimeRelay {
    async fn join(
        &self,
        room_id: &str,
        local: &ParticipantId,
    ) -> Result<(Box<dyn RelaySubscription>, mpsc::Receiver<RelayEvent>)> {
        if self.config.project_ref.is_empty() || self.config.api_key.is_empty() {
            return Err(LiveError::RelayDisconnected(
                "Supabase project ref or anon key is not configured".into(),
            ));
        }

        let topic = topic_for(room_id);
        let (client, rt_rx) = RealtimeClient::connect(self.config.clone());
        client.join_channel(&topic, ChannelConfig::room(local.as_str())).await?;

        let (event_tx, event_rx) = mpsc::channel(RELAY_EVENT_CAPACITY);
        let translator = PresenceTranslator::new(&topic, local.clone());
        let task = tokio::spawn(translate_events(
            rt_rx,
            event_tx,
            translator,
            client.clone_sender(),
        ));

        info!(topic = %topic, local = %local, "Joining realtime room");
        let subscription = RealtimeSubscription {
            client,
            topic,
            task,
        };
        Ok((Box::new(subscription), event_rx))
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

struct RealtimeSubscription {
    client: RealtimeClient,
    topic: String,
    task: JoinHandle<()>,
}

#[async_trait]
impl RelaySubscription for RealtimeSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        if !self.client.is_connected().await {
            return Err(LiveError::RelayDisconnected(
                "realtime socket is reconnecting".into(),
            ));
        }
        self.client.broadcast(&self.topic, event, payload).await
    }

    async fn leave(&self) {
        if let Err(e) = self.client.leave_channel(&self.topic).await {
            debug!(topic = %self.topic, error = %e, "Leave after connection stopped");
        }
        self.client.disconnect().await;
        self.task.abort();
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.task.abort();
        self.client.shutdown_now();
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

async fn translate_events(
    mut rt_rx: mpsc::Receiver<RealtimeEvent>,
    event_tx: mpsc::Sender<RelayEvent>,
    mut translator: PresenceTranslator,
    client: RealtimeClient,
) {
    let mut tracked = false;
    while let Some(rt_event) = rt_rx.recv().await {
        for event in translator.translate(rt_event) {
            if event == RelayEvent::Subscribed && !tracked {
                // Later reconnects re-track from the client's own record.
                let payload = serde_json::json!({
                    "user_id": translator.local.as_str(),
                    "online_at": Utc::now().to_rfc3339(),
                });
                if let Err(e) = client.presence_track(&translator.topic, payload).await {
                    warn!(error = %e, "Failed to track presence");
                }
                tracked = true;
            }
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Folds raw realtime events for one topic into relay events.
///
/// Presence is reference counted per key: a participant connected from
/// several sockets only leaves once its last meta is gone.
pub(crate) struct PresenceTranslator {
    topic: String,
    local: ParticipantId,
    counts: HashMap<String, usize>,
}

impl PresenceTranslator {
    pub(crate) fn new(topic: &str, local: ParticipantId) -> Self {
        Self {
            topic: topic.to_string(),
            local,
            counts: HashMap::new(),
        }
    }

    fn is_ours(&self, topic: &str) -> bool {
        topic == self.topic
    }

    fn is_self(&self, key: &str) -> bool {
        key == self.local.as_str()
    }

    pub(crate) fn translate(&mut self, event: RealtimeEvent) -> Vec<RelayEvent> {
        match event {
            RealtimeEvent::ChannelJoined { topic } if self.is_ours(&topic) => {
                vec![RelayEvent::Subscribed]
            }
            RealtimeEvent::ChannelError { topic, message } if self.is_ours(&topic) => {
                warn!(topic = %topic, message = %message, "Room channel lost");
                self.counts.clear();
                vec![RelayEvent::Disconnected]
            }
            RealtimeEvent::Disconnected => {
                self.counts.clear();
                vec![RelayEvent::Disconnected]
            }
            RealtimeEvent::Broadcast {
                topic,
                event,
                payload,
            } if self.is_ours(&topic) => vec![RelayEvent::Broadcast { event, payload }],
            RealtimeEvent::PresenceState { topic, state } if self.is_ours(&topic) => {
                self.counts = state
                    .into_iter()
                    .filter(|(key, metas)| !self.is_self(key) && !metas.is_empty())
                    .map(|(key, metas)| (key, metas.len()))
                    .collect();
                let mut members: Vec<ParticipantId> =
                    self.counts.keys().map(|k| ParticipantId::from(k.as_str())).collect();
                members.sort();
                vec![RelayEvent::PresenceSync(members)]
            }
            RealtimeEvent::PresenceDiff {
                topic,
                joins,
                leaves,
            } if self.is_ours(&topic) => {
                let mut out = Vec::new();
                for (key, metas) in joins {
                    if self.is_self(&key) || metas.is_empty() {
                        continue;
                    }
                    let count = self.counts.entry(key.clone()).or_insert(0);
                    *count += metas.len();
                    if *count == metas.len() {
                        out.push(RelayEvent::PresenceJoin(ParticipantId::from(key)));
                    }
                }
                for (key, metas) in leaves {
                    if self.is_self(&key) {
                        continue;
                    }
                    let Some(count) = self.counts.get_mut(&key) else {
                        continue;
                    };
                    *count = count.saturating_sub(metas.len().max(1));
                    if *count == 0 {
                        self.counts.remove(&key);
                        out.push(RelayEvent::PresenceLeave(ParticipantId::from(key)));
                    }
                }
                out
            }
            RealtimeEvent::Error(message) => {
                warn!(topic = %self.topic, message = %message, "Realtime error");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metas(n: usize) -> Vec<serde_json::Value> {
        (0..n).map(|i| json!({ "phx_ref": i.to_string() })).collect()
    }

    fn translator() -> PresenceTranslator {
        PresenceTranslator::new("room:r1", ParticipantId::from("me"))
    }

    #[test]
    fn state_snapshot_excludes_self_and_sorts() {
        let mut t = translator();
        let state = HashMap::from([
            ("zed".to_string(), metas(1)),
            ("me".to_string(), metas(1)),
            ("amy".to_string(), metas(1)),
        ]);
        let out = t.translate(RealtimeEvent::PresenceState {
            topic: "room:r1".into(),
            state,
        });
        assert_eq!(
            out,
            vec![RelayEvent::PresenceSync(vec!["amy".into(), "zed".into()])]
        );
    }

    #[test]
    fn second_meta_does_not_rejoin_and_leave_waits_for_last() {
        let mut t = translator();
        let join = |n| RealtimeEvent::PresenceDiff {
            topic: "room:r1".into(),
            joins: HashMap::from([("bob".to_string(), metas(n))]),
            leaves: HashMap::new(),
        };
        let leave = RealtimeEvent::PresenceDiff {
            topic: "room:r1".into(),
            joins: HashMap::new(),
            leaves: HashMap::from([("bob".to_string(), metas(1))]),
        };

        assert_eq!(t.translate(join(1)), vec![RelayEvent::PresenceJoin("bob".into())]);
        assert!(t.translate(join(1)).is_empty());
        assert!(t.translate(leave.clone()).is_empty());
        assert_eq!(t.translate(leave), vec![RelayEvent::PresenceLeave("bob".into())]);
    }

    #[test]
    fn other_topics_are_ignored() {
        let mut t = translator();
        assert!(t
            .translate(RealtimeEvent::ChannelJoined {
                topic: "room:other".into()
            })
            .is_empty());
        assert!(t
            .translate(RealtimeEvent::Broadcast {
                topic: "room:other".into(),
                event: "chat".into(),
                payload: json!({}),
            })
            .is_empty());
    }

    #[test]
    fn join_and_disconnect_map_through() {
        let mut t = translator();
        assert_eq!(
            t.translate(RealtimeEvent::ChannelJoined {
                topic: "room:r1".into()
            }),
            vec![RelayEvent::Subscribed]
        );
        assert_eq!(
            t.translate(RealtimeEvent::Disconnected),
            vec![RelayEvent::Disconnected]
        );
        assert!(t.translate(RealtimeEvent::Connected).is_empty());
    }

    #[tokio::test]
    async fn join_without_credentials_fails() {
        let relay = RealtimeRelay::new(RealtimeConfig::default());
        let result = relay.join("r1", &ParticipantId::from("me")).await;
        assert!(matches!(result, Err(LiveError::RelayDisconnected(_))));
    }
}
