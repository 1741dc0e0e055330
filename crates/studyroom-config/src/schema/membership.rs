//! Room participant counter settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub enabled: bool,
    /// RPC invoked when the local user enters a room.
    pub increment_rpc: String,
    /// RPC invoked when the local user leaves a room.
    pub decrement_rpc: String,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            increment_rpc: "increment_participants".into(),
            decrement_rpc: "decrement_participants".into(),
        }
    }
}
