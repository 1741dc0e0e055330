//! Peer negotiation tuning.

use serde::{Deserialize, Serialize};

/// Which side of a participant pair sends the offer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitiatorPolicy {
    /// The lexicographically smaller participant id always offers.
    #[default]
    LowerId,
    /// Whoever observes the other's join offers; members already present
    /// when we subscribe are left to offer to us.
    Observer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub initiator: InitiatorPolicy,
    /// Seconds a link may sit in an unfinished state before it is retried
    /// or dropped.
    pub timeout_secs: u32,
    /// Offer attempts per peer before giving up.
    pub max_attempts: u32,
    /// How often stalled links are swept, in milliseconds.
    pub sweep_interval_ms: u32,
    /// How long candidates for an unknown peer are kept, in seconds.
    pub candidate_ttl_secs: u32,
    /// Maximum buffered candidates per unknown peer.
    pub candidate_buffer_max: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            initiator: InitiatorPolicy::LowerId,
            timeout_secs: 15,
            max_attempts: 3,
            sweep_interval_ms: 1000,
            candidate_ttl_secs: 10,
            candidate_buffer_max: 32,
        }
    }
}
