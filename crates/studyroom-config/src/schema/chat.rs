use serde::{Deserialize, Serialize};

/// In-room chat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Transcript capacity; the oldest messages are evicted first.
    pub max_messages: u32,
    /// Maximum characters per outgoing message.
    pub max_length: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_messages: 500,
            max_length: 2000,
        }
    }
}
