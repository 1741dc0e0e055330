//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = StudyroomConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_heartbeat_too_fast() {
    let mut config = StudyroomConfig::default();
    config.relay.heartbeat_interval = 2;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("relay.heartbeat_interval"));
}

#[test]
fn catches_backoff_ceiling_below_base() {
    let mut config = StudyroomConfig::default();
    config.relay.reconnect_delay = 10;
    config.relay.max_reconnect_delay = 5;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("relay.max_reconnect_delay"));
}

#[test]
fn catches_non_ice_url() {
    let mut config = StudyroomConfig::default();
    config.ice.servers.push("https://example.com".into());
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("https://example.com"));
}

#[test]
fn accepts_turn_servers() {
    let mut config = StudyroomConfig::default();
    config.ice.servers = vec!["turn:turn.example.com:3478".into(), "turns:t.example.com".into()];
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_media_fully_disabled() {
    let mut config = StudyroomConfig::default();
    config.media.audio = false;
    config.media.video = false;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("media"));
}

#[test]
fn audio_only_is_allowed() {
    let mut config = StudyroomConfig::default();
    config.media.video = false;
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_zero_timeout_and_attempts() {
    let mut config = StudyroomConfig::default();
    config.negotiation.timeout_secs = 0;
    config.negotiation.max_attempts = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("negotiation.timeout_secs"));
    assert!(err.contains("negotiation.max_attempts"));
}

#[test]
fn catches_chat_limits() {
    let mut config = StudyroomConfig::default();
    config.chat.max_messages = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("chat.max_messages"));
}

#[test]
fn catches_missing_rpc_names() {
    let mut config = StudyroomConfig::default();
    config.membership.increment_rpc = " ".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("membership"));

    config.membership.enabled = false;
    assert!(validate(&config).is_ok());
}

#[test]
fn collects_multiple_errors() {
    let mut config = StudyroomConfig::default();
    config.relay.heartbeat_interval = 1;
    config.chat.max_length = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("relay.heartbeat_interval"));
    assert!(err.contains("chat.max_length"));
    assert!(err.contains("; "));
}
