//! Relay (Supabase Realtime) connection settings.

use serde::{Deserialize, Serialize};

/// Connection settings for the publish/subscribe relay.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Supabase project reference, e.g. "abcdefghijklmnop".
    pub project_ref: String,
    /// Publishable anon key.
    pub api_key: String,
    /// Optional user JWT for authenticated channels.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: u32,
    /// Base reconnect delay in seconds.
    pub reconnect_delay: u32,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay: u32,
    /// WebSocket connect timeout in seconds.
    pub connect_timeout: u32,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            access_token: None,
            heartbeat_interval: 25,
            reconnect_delay: 1,
            max_reconnect_delay: 30,
            connect_timeout: 15,
        }
    }
}

impl RelayConfig {
    /// Whether enough is configured to reach a hosted relay.
    pub fn is_configured(&self) -> bool {
        !self.project_ref.is_empty() && !self.api_key.is_empty()
    }
}
