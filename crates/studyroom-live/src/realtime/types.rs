//! Wire envelope, connection settings and the client's event/command enums.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where and how to reach a project's realtime socket.
#[derive(Clone)]
pub struct RealtimeConfig {
    pub project_ref: String,
    /// Publishable anon key, also sent as the `apikey` query parameter.
    pub api_key: String,
    /// User JWT attached to every `phx_join` when present.
    pub access_token: Option<String>,
    pub heartbeat_interval_secs: u64,
    /// First reconnect delay; doubles per failure up to the maximum.
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            access_token: None,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            connect_timeout_secs: 15,
        }
    }
}

impl RealtimeConfig {
    pub(crate) fn ws_url(&self) -> String {
        format!(
            "wss://{}.supabase.co/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.project_ref, self.api_key
        )
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One Phoenix v1 JSON frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    /// Frame addressed to a room topic, which gains the `realtime:` prefix.
    pub(crate) fn channel(topic: &str, event: &str, payload: serde_json::Value, msg_ref: String) -> Self {
        Self {
            topic: format!("realtime:{topic}"),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel options
// ---------------------------------------------------------------------------

/// Options sent with `phx_join` for one room channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Receive our own broadcasts back (Supabase `broadcast.self`).
    pub echo_broadcasts: bool,
    /// Ask the server to ack each broadcast.
    pub ack_broadcasts: bool,
    /// Our key in the channel's presence map.
    pub presence_key: String,
}

impl ChannelConfig {
    /// Room channel options: no echo, no acks, presence keyed by `key`.
    pub fn room(presence_key: &str) -> Self {
        Self {
            echo_broadcasts: false,
            ack_broadcasts: false,
            presence_key: presence_key.to_string(),
        }
    }

    pub(crate) fn to_join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": { "self": self.echo_broadcasts, "ack": self.ack_broadcasts },
                "presence": { "key": self.presence_key },
            }
        });
        if let (Some(token), Some(obj)) = (access_token, payload.as_object_mut()) {
            obj.insert("access_token".into(), token.into());
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Presence entries keyed by presence key, each with its list of metas.
pub type PresenceMap = HashMap<String, Vec<serde_json::Value>>;

/// What the connection task reports, already stripped of the `realtime:`
/// topic prefix.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Connected,
    Disconnected,
    /// The server acknowledged a `phx_join`.
    ChannelJoined { topic: String },
    /// `phx_error`, `phx_close` or a rejected join.
    ChannelError { topic: String, message: String },
    Broadcast {
        topic: String,
        event: String,
        payload: serde_json::Value,
    },
    /// Full snapshot, sent once after each join.
    PresenceState { topic: String, state: PresenceMap },
    PresenceDiff {
        topic: String,
        joins: PresenceMap,
        leaves: PresenceMap,
    },
    /// Connect failures and timeouts. The task keeps retrying.
    Error(String),
}

/// Work queued by [`RealtimeClient`](super::RealtimeClient) for the connection task.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        topic: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        topic: String,
    },
    Broadcast {
        topic: String,
        event: String,
        payload: serde_json::Value,
    },
    PresenceTrack {
        topic: String,
        payload: serde_json::Value,
    },
    Disconnect,
}
