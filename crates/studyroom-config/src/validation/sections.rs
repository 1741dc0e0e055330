//! Per-section validators.

use crate::schema::StudyroomConfig;

use super::helpers::validate_range;

const ICE_SCHEMES: [&str; 3] = ["stun:", "turn:", "turns:"];

pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &StudyroomConfig) {
    let relay = &config.relay;
    validate_range(errors, "relay.heartbeat_interval", relay.heartbeat_interval, 10, 300);
    validate_range(errors, "relay.reconnect_delay", relay.reconnect_delay, 1, 60);
    validate_range(errors, "relay.max_reconnect_delay", relay.max_reconnect_delay, 1, 600);
    validate_range(errors, "relay.connect_timeout", relay.connect_timeout, 1, 120);
    if relay.max_reconnect_delay < relay.reconnect_delay {
        errors.push(format!(
            "relay.max_reconnect_delay = {} is below relay.reconnect_delay = {}",
            relay.max_reconnect_delay, relay.reconnect_delay
        ));
    }
}

pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &StudyroomConfig) {
    for url in &config.ice.servers {
        if !ICE_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            errors.push(format!("ice.servers entry '{url}' is not a stun/turn url"));
        }
    }
}

pub(crate) fn validate_media(errors: &mut Vec<String>, config: &StudyroomConfig) {
    if !config.media.audio && !config.media.video {
        errors.push("media: at least one of audio or video must be enabled".into());
    }
}

pub(crate) fn validate_negotiation(errors: &mut Vec<String>, config: &StudyroomConfig) {
    let n = &config.negotiation;
    validate_range(errors, "negotiation.timeout_secs", n.timeout_secs, 1, 300);
    validate_range(errors, "negotiation.max_attempts", n.max_attempts, 1, 10);
    validate_range(errors, "negotiation.sweep_interval_ms", n.sweep_interval_ms, 100, 10_000);
    validate_range(errors, "negotiation.candidate_ttl_secs", n.candidate_ttl_secs, 1, 300);
    validate_range(errors, "negotiation.candidate_buffer_max", n.candidate_buffer_max, 1, 1024);
}

pub(crate) fn validate_chat(errors: &mut Vec<String>, config: &StudyroomConfig) {
    validate_range(errors, "chat.max_messages", config.chat.max_messages, 1, 10_000);
    validate_range(errors, "chat.max_length", config.chat.max_length, 1, 10_000);
}

pub(crate) fn validate_membership(errors: &mut Vec<String>, config: &StudyroomConfig) {
    let m = &config.membership;
    if m.enabled && (m.increment_rpc.trim().is_empty() || m.decrement_rpc.trim().is_empty()) {
        errors.push("membership: rpc names must be set when enabled".into());
    }
}
