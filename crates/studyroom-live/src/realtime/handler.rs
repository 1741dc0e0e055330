//! Incoming Phoenix message translation and presence parsing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::types::{PhoenixMessage, PresenceMap, RealtimeEvent};

/// Outstanding `phx_join` refs, mapped to their topic.
pub(crate) type JoinRefs = Arc<Mutex<HashMap<String, String>>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a Phoenix presence map into `HashMap<key, Vec<meta>>`.
///
/// Supabase sends presence as `{ "key": { "metas": [{ ... }] } }`.
pub(crate) fn parse_presence_map(value: &serde_json::Value) -> PresenceMap {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(metas) = val.get("metas").and_then(|m| m.as_array()) {
                result.insert(key.clone(), metas.clone());
            }
        }
    }
    result
}

fn take_join_ref(msg: &PhoenixMessage, join_refs: &JoinRefs) -> bool {
    let Some(msg_ref) = msg.msg_ref.as_deref() else {
        return false;
    };
    join_refs
        .lock()
        .map(|mut refs| refs.remove(msg_ref).is_some())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Turn one incoming Phoenix frame into a client event.
///
/// Replies only count as a join when their ref matches an outstanding
/// `phx_join`; heartbeat and broadcast acks are dropped.
pub(crate) fn translate(msg: &PhoenixMessage, join_refs: &JoinRefs) -> Option<RealtimeEvent> {
    let topic = strip_topic_prefix(&msg.topic).to_string();

    match msg.event.as_str() {
        "phx_reply" => {
            if !take_join_ref(msg, join_refs) {
                return None;
            }
            let status = msg.payload.get("status").and_then(|s| s.as_str());
            if status == Some("ok") {
                debug!(topic = %topic, "Channel joined");
                Some(RealtimeEvent::ChannelJoined { topic })
            } else {
                let message = msg
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                warn!(topic = %topic, status = ?status, reason = %message, "Channel join refused");
                Some(RealtimeEvent::ChannelError { topic, message })
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel error".to_string(),
            })
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            Some(RealtimeEvent::ChannelError {
                topic,
                message: "Channel closed".to_string(),
            })
        }
        "broadcast" => {
            let event = msg
                .payload
                .get("event")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            let payload = msg
                .payload
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            debug!(topic = %topic, event = %event, "Broadcast received");
            Some(RealtimeEvent::Broadcast {
                topic,
                event,
                payload,
            })
        }
        "presence_state" => {
            let state = parse_presence_map(&msg.payload);
            debug!(topic = %topic, users = state.len(), "Presence state received");
            Some(RealtimeEvent::PresenceState { topic, state })
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            debug!(
                topic = %topic,
                joins = joins.len(),
                leaves = leaves.len(),
                "Presence diff received"
            );
            Some(RealtimeEvent::PresenceDiff {
                topic,
                joins,
                leaves,
            })
        }
        _ => {
            debug!(topic = %topic, event = %msg.event, "Unhandled Phoenix event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(topic: &str, event: &str, payload: serde_json::Value, r: Option<&str>) -> PhoenixMessage {
        PhoenixMessage {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: r.map(String::from),
        }
    }

    #[test]
    fn presence_map_extracts_metas() {
        let map = parse_presence_map(&json!({
            "u1": { "metas": [{ "user_id": "u1", "phx_ref": "a" }] },
            "u2": { "metas": [{ "user_id": "u2" }, { "user_id": "u2" }] },
            "bad": { "nothing": true }
        }));
        assert_eq!(map.len(), 2);
        assert_eq!(map["u2"].len(), 2);
    }

    #[test]
    fn join_reply_matches_outstanding_ref() {
        let refs: JoinRefs = Arc::default();
        refs.lock().unwrap().insert("5".into(), "room:r1".into());

        let ok = msg("realtime:room:r1", "phx_reply", json!({"status": "ok", "response": {}}), Some("5"));
        match translate(&ok, &refs) {
            Some(RealtimeEvent::ChannelJoined { topic }) => assert_eq!(topic, "room:r1"),
            other => panic!("expected ChannelJoined, got {other:?}"),
        }
        assert!(refs.lock().unwrap().is_empty());

        // Same ref again is now just an ack.
        assert!(translate(&ok, &refs).is_none());
    }

    #[test]
    fn heartbeat_reply_is_ignored() {
        let refs: JoinRefs = Arc::default();
        let hb = msg("phoenix", "phx_reply", json!({"status": "ok"}), Some("9"));
        assert!(translate(&hb, &refs).is_none());
    }

    #[test]
    fn refused_join_reports_reason() {
        let refs: JoinRefs = Arc::default();
        refs.lock().unwrap().insert("3".into(), "room:r1".into());
        let err = msg(
            "realtime:room:r1",
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
            Some("3"),
        );
        match translate(&err, &refs) {
            Some(RealtimeEvent::ChannelError { message, .. }) => assert_eq!(message, "unauthorized"),
            other => panic!("expected ChannelError, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_unwraps_inner_event() {
        let refs: JoinRefs = Arc::default();
        let frame = msg(
            "realtime:room:r1",
            "broadcast",
            json!({"type": "broadcast", "event": "signal", "payload": {"target": "b"}}),
            None,
        );
        match translate(&frame, &refs) {
            Some(RealtimeEvent::Broadcast { topic, event, payload }) => {
                assert_eq!(topic, "room:r1");
                assert_eq!(event, "signal");
                assert_eq!(payload["target"], "b");
            }
            other => panic!("expected Broadcast, got {other:?}"),
        }
    }

    #[test]
    fn presence_diff_splits_joins_and_leaves() {
        let refs: JoinRefs = Arc::default();
        let frame = msg(
            "realtime:room:r1",
            "presence_diff",
            json!({
                "joins": { "u3": { "metas": [{}] } },
                "leaves": { "u1": { "metas": [{}] } }
            }),
            None,
        );
        match translate(&frame, &refs) {
            Some(RealtimeEvent::PresenceDiff { joins, leaves, .. }) => {
                assert!(joins.contains_key("u3"));
                assert!(leaves.contains_key("u1"));
            }
            other => panic!("expected PresenceDiff, got {other:?}"),
        }
    }
}
