//! `studyroom demo`: a full mesh inside one process.

use std::sync::Arc;
use std::time::Duration;

use studyroom_common::ParticipantId;
use studyroom_config::StudyroomConfig;
use studyroom_live::{
    Identity, LoopbackConnector, LoopbackHub, NegotiationState, NoopMembership, RoomSession,
    SessionDeps, SyntheticDevices,
};
use tracing::{debug, warn};

use crate::commands::join::format_event;
use crate::settings::session_config;

const NAMES: [&str; 8] = ["ada", "bela", "cyd", "dev", "eli", "fay", "gus", "hal"];
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait until every session sees `expected` connected peers.
async fn settle(sessions: &[RoomSession], expected: usize) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        let mut done = true;
        for session in sessions {
            let peers = session.peers().await.unwrap_or_default();
            done &= peers.len() == expected
                && peers.values().all(|s| *s == NegotiationState::Connected);
        }
        if done {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

pub async fn run(config: &StudyroomConfig, peers: u8, room: &str) -> studyroom_live::Result<()> {
    let hub = LoopbackHub::new();
    let session_config = session_config(config);
    let mut sessions = Vec::new();

    for name in NAMES.iter().take(usize::from(peers)) {
        let id = ParticipantId::from(*name);
        let deps = SessionDeps {
            relay: Arc::new(hub.clone()),
            connector: Arc::new(LoopbackConnector::new(id.clone())),
            devices: Arc::new(SyntheticDevices::new()),
            membership: Arc::new(NoopMembership),
        };
        let (session, mut events) =
            RoomSession::join(room, Identity::new(id, name), session_config.clone(), deps).await?;
        let who = name.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(participant = %who, "{}", format_event(&event));
            }
        });
        sessions.push(session);
    }

    let expected = sessions.len() - 1;
    if !settle(&sessions, expected).await {
        warn!(room, "Mesh did not fully connect within {:?}", SETTLE_TIMEOUT);
    }

    for session in &sessions {
        session
            .send_chat(&format!("hello from {}", session.local_id()))
            .await?;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Room {room}: {} participants", sessions.len());
    for session in &sessions {
        let peers = session.peers().await?;
        let links: Vec<String> = peers
            .iter()
            .map(|(peer, state)| format!("{peer}={state}"))
            .collect();
        println!("  {:<5} {}", session.local_id(), links.join(" "));
    }

    if let Some(first) = sessions.first() {
        println!("Transcript seen by {}:", first.local_id());
        for msg in first.transcript().await? {
            println!("  {}: {}", msg.author, msg.text);
        }
    }

    for session in &sessions {
        session.leave().await;
    }
    Ok(())
}
