use serde::{Deserialize, Serialize};

/// ICE server list handed to every peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}
