//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{translate, JoinRefs};
use super::types::{
    ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent,
};

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// A channel to restore after every reconnect.
#[derive(Clone)]
pub(crate) struct JoinedChannel {
    pub(crate) config: ChannelConfig,
    pub(crate) presence_payload: Option<serde_json::Value>,
}

type Channels = Arc<RwLock<HashMap<String, JoinedChannel>>>;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

fn join_frame(topic: &str, payload: serde_json::Value, join_refs: &JoinRefs) -> PhoenixMessage {
    let msg_ref = next_ref();
    if let Ok(mut refs) = join_refs.lock() {
        refs.insert(msg_ref.clone(), topic.to_string());
    }
    PhoenixMessage::channel(topic, "phx_join", payload, msg_ref)
}

fn leave_frame(topic: &str) -> PhoenixMessage {
    PhoenixMessage::channel(topic, "phx_leave", serde_json::json!({}), next_ref())
}

fn broadcast_frame(topic: &str, event: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage::channel(
        topic,
        "broadcast",
        serde_json::json!({ "type": "broadcast", "event": event, "payload": payload }),
        next_ref(),
    )
}

fn track_frame(topic: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage::channel(
        topic,
        "presence",
        serde_json::json!({ "type": "presence", "event": "track", "payload": payload }),
        next_ref(),
    )
}

fn heartbeat_frame() -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: serde_json::json!({}),
        msg_ref: Some(next_ref()),
    }
}

/// Serialize and write one frame. Returns false when the socket is gone.
async fn send_frame<S>(writer: &Mutex<S>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, event = %msg.event, "Failed to serialize Phoenix frame");
            return true;
        }
    };
    writer
        .lock()
        .await
        .send(WsMessage::Text(json.into()))
        .await
        .is_ok()
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
    shutdown: CancellationToken,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let channels: Channels = Arc::new(RwLock::new(HashMap::new()));
    let join_refs: JoinRefs = Arc::default();
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !shutdown.is_cancelled() {
        let url = config.ws_url();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to Supabase Realtime");

        match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(&url)).await {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Restore channels and presence from before the drop.
                {
                    let restored = channels.read().await;
                    for (topic, joined) in restored.iter() {
                        let payload = joined
                            .config
                            .to_join_payload(config.access_token.as_deref());
                        send_frame(&ws_write, &join_frame(topic, payload, &join_refs)).await;
                        if let Some(presence) = &joined.presence_payload {
                            send_frame(&ws_write, &track_frame(topic, presence.clone())).await;
                        }
                        debug!(topic = %topic, "Rejoined channel");
                    }
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));

                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&channels),
                    Arc::clone(&join_refs),
                    config.access_token.clone(),
                    shutdown.clone(),
                ));

                loop {
                    let frame = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        frame = ws_read.next() => frame,
                    };
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(msg) => {
                                    if let Some(event) = translate(&msg, &join_refs) {
                                        let _ = event_tx.send(event).await;
                                    }
                                }
                                Err(_) => {
                                    debug!(text = %text, "Unrecognized message from Supabase");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Supabase Realtime closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                if let Ok(mut refs) = join_refs.lock() {
                    refs.clear();
                }
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to Supabase Realtime");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!(timeout_secs = config.connect_timeout_secs, "WebSocket connection timed out");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!(
                        "Connection timed out after {}s",
                        config.connect_timeout_secs
                    )))
                    .await;
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }

    info!("Realtime connection loop stopped");
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        if !send_frame(&ws_write, &heartbeat_frame()).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    ws_write: Arc<Mutex<S>>,
    channels: Channels,
    join_refs: JoinRefs,
    access_token: Option<String>,
    shutdown: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { topic, config } => {
                let payload = config.to_join_payload(access_token.as_deref());
                send_frame(&ws_write, &join_frame(&topic, payload, &join_refs)).await;
                channels.write().await.insert(
                    topic,
                    JoinedChannel {
                        config,
                        presence_payload: None,
                    },
                );
            }
            RealtimeCommand::LeaveChannel { topic } => {
                send_frame(&ws_write, &leave_frame(&topic)).await;
                channels.write().await.remove(&topic);
            }
            RealtimeCommand::Broadcast {
                topic,
                event,
                payload,
            } => {
                send_frame(&ws_write, &broadcast_frame(&topic, &event, payload)).await;
            }
            RealtimeCommand::PresenceTrack { topic, payload } => {
                send_frame(&ws_write, &track_frame(&topic, payload.clone())).await;
                if let Some(ch) = channels.write().await.get_mut(&topic) {
                    ch.presence_payload = Some(payload);
                }
            }
            RealtimeCommand::Disconnect => {
                let topics: Vec<String> = channels.write().await.drain().map(|(t, _)| t).collect();
                for topic in &topics {
                    send_frame(&ws_write, &leave_frame(topic)).await;
                }
                let _ = ws_write.lock().await.send(WsMessage::Close(None)).await;
                shutdown.cancel();
                return;
            }
        }
    }
    // Every client handle was dropped.
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_are_unique_and_increasing() {
        let a: u64 = next_ref().parse().unwrap();
        let b: u64 = next_ref().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn join_frame_records_ref() {
        let refs: JoinRefs = Arc::default();
        let frame = join_frame("room:r1", serde_json::json!({}), &refs);
        let msg_ref = frame.msg_ref.clone().unwrap();
        assert_eq!(frame.event, "phx_join");
        assert_eq!(
            refs.lock().unwrap().get(&msg_ref).map(String::as_str),
            Some("room:r1")
        );
    }

    #[test]
    fn broadcast_frame_wraps_inner_event() {
        let frame = broadcast_frame("room:r1", "chat", serde_json::json!({"text": "hi"}));
        assert_eq!(frame.topic, "realtime:room:r1");
        assert_eq!(frame.payload["type"], "broadcast");
        assert_eq!(frame.payload["event"], "chat");
        assert_eq!(frame.payload["payload"]["text"], "hi");
    }

    #[test]
    fn track_frame_wraps_presence_payload() {
        let frame = track_frame("room:r1", serde_json::json!({"user_id": "u1"}));
        assert_eq!(frame.event, "presence");
        assert_eq!(frame.payload["event"], "track");
        assert_eq!(frame.payload["payload"]["user_id"], "u1");
    }
}
