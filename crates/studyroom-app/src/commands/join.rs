//! `studyroom join`: one participant over the hosted relay.

use std::sync::Arc;
use std::time::Duration;

use studyroom_config::StudyroomConfig;
use studyroom_live::{
    Identity, MembershipCounter, NoopMembership, RealtimeRelay, RoomSession, RtcConnector,
    SessionDeps, SessionEvent, SupabaseMembership, SyntheticDevices,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::settings::{realtime_config, session_config};

const MEMBERSHIP_GRACE: Duration = Duration::from_secs(5);

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Mute,
    Unmute,
    Camera(bool),
    Leave,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Chat(line.to_string());
    };
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("mute"), None) => Input::Mute,
        (Some("unmute"), None) => Input::Unmute,
        (Some("camera"), Some("on")) => Input::Camera(true),
        (Some("camera"), Some("off")) => Input::Camera(false),
        (Some("leave"), None) => Input::Leave,
        _ => Input::Unknown(line.to_string()),
    }
}

pub fn format_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StatusChanged(status) => format!("* status: {status}"),
        SessionEvent::PeerConnected(peer) => format!("* connected to {peer}"),
        SessionEvent::RemoteStream { peer, stream } => format!(
            "* receiving from {peer}: {} audio, {} video",
            stream.audio_tracks().count(),
            stream.video_tracks().count()
        ),
        SessionEvent::PeerLeft(peer) => format!("* {peer} left"),
        SessionEvent::PeerDropped { peer, reason } => {
            format!("* lost {peer} ({reason:?})")
        }
        SessionEvent::Chat(msg) => format!(
            "[{}] {}: {}",
            msg.timestamp.format("%H:%M"),
            msg.author,
            msg.text
        ),
    }
}

fn identity(config: &StudyroomConfig, user_id: Option<String>, name: &str) -> Identity {
    match (user_id, config.relay.access_token.clone()) {
        (Some(id), Some(token)) => Identity::from_supabase_auth(id, name.to_string(), token),
        (Some(id), None) => Identity::new(id, name),
        (None, _) => Identity::guest(name),
    }
}

fn membership(config: &StudyroomConfig, access_token: Option<String>) -> Arc<dyn MembershipCounter> {
    if !config.membership.enabled || !config.relay.is_configured() {
        return Arc::new(NoopMembership);
    }
    Arc::new(
        SupabaseMembership::new(&config.relay.project_ref, &config.relay.api_key)
            .with_access_token(access_token)
            .with_rpc_names(
                &config.membership.increment_rpc,
                &config.membership.decrement_rpc,
            ),
    )
}

pub async fn run(
    config: &StudyroomConfig,
    room: &str,
    user_id: Option<String>,
    name: &str,
) -> studyroom_live::Result<()> {
    let identity = identity(config, user_id, name);
    let token = identity.access_token.clone();
    let deps = SessionDeps {
        relay: Arc::new(RealtimeRelay::new(realtime_config(&config.relay, token.clone()))),
        connector: Arc::new(RtcConnector::new(config.ice.servers.clone())),
        devices: Arc::new(SyntheticDevices::new()),
        membership: membership(config, token),
    };

    let (session, mut events) =
        RoomSession::join(room, identity, session_config(config), deps).await?;
    println!("Joined {room} as {}. Type to chat; /mute, /unmute, /camera on|off, /leave.", session.local_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                let result = match parse_input(&line) {
                    Input::Chat(text) => session.send_chat(&text).await.map(|_| ()),
                    Input::Mute => session.set_audio_enabled(false).await,
                    Input::Unmute => session.set_audio_enabled(true).await,
                    Input::Camera(on) => session.set_video_enabled(on).await,
                    Input::Leave => break,
                    Input::Unknown(cmd) => {
                        println!("* unknown command: {cmd}");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    println!("* {e}");
                }
            }
            Some(event) = events.recv() => {
                println!("{}", format_event(&event));
            }
        }
    }

    session.leave().await;
    println!("Left {room}.");
    if tokio::time::timeout(MEMBERSHIP_GRACE, session.membership_settled())
        .await
        .is_err()
    {
        warn!(room, "Participant count not updated before exit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyroom_common::ParticipantId;
    use studyroom_live::{ChatMessage, DropReason, SessionStatus};

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse_input("  hello there "), Input::Chat("hello there".into()));
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(parse_input("/mute"), Input::Mute);
        assert_eq!(parse_input("/unmute"), Input::Unmute);
        assert_eq!(parse_input("/camera off"), Input::Camera(false));
        assert_eq!(parse_input("/camera on"), Input::Camera(true));
        assert_eq!(parse_input("/leave"), Input::Leave);
        assert_eq!(parse_input("/camera maybe"), Input::Unknown("/camera maybe".into()));
    }

    #[test]
    fn events_render_one_line_each() {
        let peer = ParticipantId::from("bob");
        assert_eq!(
            format_event(&SessionEvent::StatusChanged(SessionStatus::Connected)),
            "* status: connected"
        );
        assert_eq!(format_event(&SessionEvent::PeerLeft(peer.clone())), "* bob left");
        assert!(format_event(&SessionEvent::PeerDropped {
            peer,
            reason: DropReason::NegotiationStalled,
        })
        .contains("NegotiationStalled"));

        let line = format_event(&SessionEvent::Chat(ChatMessage::new("Ann", "hi", None)));
        assert!(line.ends_with("Ann: hi"));
    }

    #[test]
    fn guest_identity_when_no_user_id() {
        let config = StudyroomConfig::default();
        let id = identity(&config, None, "Ann");
        assert_eq!(id.display_name, "Ann");
        assert!(id.access_token.is_none());

        let id = identity(&config, Some("u1".into()), "Ann");
        assert_eq!(id.participant_id, ParticipantId::from("u1"));
    }
}
