//! Configuration schema types for the study room client.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with the defaults the live session expects.

mod chat;
mod ice;
mod logging;
mod media;
mod membership;
mod negotiation;
mod relay;

pub use chat::*;
pub use ice::*;
pub use logging::*;
pub use media::*;
pub use membership::*;
pub use negotiation::*;
pub use relay::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StudyroomConfig {
    pub relay: RelayConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub negotiation: NegotiationConfig,
    pub chat: ChatConfig,
    pub membership: MembershipConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
