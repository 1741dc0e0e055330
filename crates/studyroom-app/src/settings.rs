//! Maps the file config onto live session settings.

use std::time::Duration;

use studyroom_config::schema::{InitiatorPolicy as ConfigInitiator, RelayConfig};
use studyroom_config::StudyroomConfig;
use studyroom_live::{InitiatorPolicy, MediaConstraints, NegotiatorConfig, RealtimeConfig, SessionConfig};

pub fn session_config(config: &StudyroomConfig) -> SessionConfig {
    let neg = &config.negotiation;
    SessionConfig {
        constraints: MediaConstraints {
            audio: config.media.audio,
            video: config.media.video,
        },
        start_muted: config.media.start_muted,
        start_camera_off: config.media.start_camera_off,
        negotiation: NegotiatorConfig {
            initiator: match neg.initiator {
                ConfigInitiator::LowerId => InitiatorPolicy::LowerId,
                ConfigInitiator::Observer => InitiatorPolicy::Observer,
            },
            timeout: Duration::from_secs(u64::from(neg.timeout_secs)),
            max_attempts: neg.max_attempts,
            candidate_ttl: Duration::from_secs(u64::from(neg.candidate_ttl_secs)),
            candidate_buffer_max: neg.candidate_buffer_max as usize,
        },
        sweep_interval: Duration::from_millis(u64::from(neg.sweep_interval_ms)),
        chat_max_messages: config.chat.max_messages as usize,
        chat_max_length: config.chat.max_length as usize,
    }
}

/// Relay settings; an access token passed on the identity wins over the file.
pub fn realtime_config(relay: &RelayConfig, access_token: Option<String>) -> RealtimeConfig {
    RealtimeConfig {
        project_ref: relay.project_ref.clone(),
        api_key: relay.api_key.clone(),
        access_token: access_token.or_else(|| relay.access_token.clone()),
        heartbeat_interval_secs: u64::from(relay.heartbeat_interval),
        reconnect_delay_secs: u64::from(relay.reconnect_delay),
        max_reconnect_delay_secs: u64::from(relay.max_reconnect_delay),
        connect_timeout_secs: u64::from(relay.connect_timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_live_defaults() {
        let mapped = session_config(&StudyroomConfig::default());
        let live = SessionConfig::default();
        assert_eq!(mapped.constraints, live.constraints);
        assert_eq!(mapped.sweep_interval, live.sweep_interval);
        assert_eq!(mapped.chat_max_messages, live.chat_max_messages);
        assert_eq!(mapped.chat_max_length, live.chat_max_length);
        assert_eq!(mapped.negotiation.timeout, live.negotiation.timeout);
        assert_eq!(mapped.negotiation.max_attempts, live.negotiation.max_attempts);
        assert_eq!(mapped.negotiation.initiator, InitiatorPolicy::LowerId);
    }

    #[test]
    fn observer_policy_and_media_flags_carry_over() {
        let mut config = StudyroomConfig::default();
        config.negotiation.initiator = ConfigInitiator::Observer;
        config.media.video = false;
        config.media.start_muted = true;
        let mapped = session_config(&config);
        assert_eq!(mapped.negotiation.initiator, InitiatorPolicy::Observer);
        assert!(!mapped.constraints.video);
        assert!(mapped.start_muted);
    }

    #[test]
    fn identity_token_overrides_file_token() {
        let mut relay = RelayConfig::default();
        relay.access_token = Some("file".into());
        assert_eq!(
            realtime_config(&relay, Some("cli".into())).access_token.as_deref(),
            Some("cli")
        );
        assert_eq!(realtime_config(&relay, None).access_token.as_deref(), Some("file"));
        assert_eq!(realtime_config(&relay, None).heartbeat_interval_secs, 25);
    }
}
