//! The per-session event loop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use studyroom_common::ParticipantId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{SessionEvent, SessionStatus};
use crate::chat::{ChatMessage, ChatTranscript};
use crate::error::Result;
use crate::identity::Identity;
use crate::media::MediaStreamManager;
use crate::membership::MembershipCounter;
use crate::negotiator::{Negotiator, Outbox};
use crate::peer::{NegotiationState, TransportEvent};
use crate::relay::{RelayEvent, RelaySubscription};
use crate::signal::SignalMessage;

pub(crate) enum SessionCommand {
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    SetAudio {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    SetVideo {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Peers {
        reply: oneshot::Sender<BTreeMap<ParticipantId, NegotiationState>>,
    },
    Transcript {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
}

/// Owns every piece of mutable session state. Runs on its own task.
pub(crate) struct Driver {
    pub(crate) room_id: String,
    pub(crate) identity: Identity,
    pub(crate) sweep_interval: Duration,
    pub(crate) negotiator: Negotiator,
    pub(crate) media: MediaStreamManager,
    pub(crate) transcript: ChatTranscript,
    pub(crate) subscription: Box<dyn RelaySubscription>,
    pub(crate) membership: Arc<dyn MembershipCounter>,
    /// Set once the increment has been issued.
    pub(crate) increment_task: Option<JoinHandle<()>>,
    pub(crate) events: mpsc::Sender<SessionEvent>,
    pub(crate) status: watch::Sender<SessionStatus>,
    pub(crate) closed: Arc<AtomicBool>,
}

impl Driver {
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut relay_rx: mpsc::Receiver<RelayEvent>,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                event = relay_rx.recv() => match event {
                    Some(event) => self.on_relay_event(event).await,
                    None => {
                        warn!(room = %self.room_id, "Relay event stream ended");
                        break;
                    }
                },
                Some(event) = transport_rx.recv() => {
                    let mut out = Outbox::default();
                    self.negotiator.on_transport_event(event, &mut out).await;
                    self.flush(out).await;
                }
                _ = sweep.tick() => {
                    let mut out = Outbox::default();
                    self.negotiator.sweep(Instant::now(), &mut out).await;
                    self.flush(out).await;
                }
            }
        }

        self.teardown().await
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = ?event, "Session event receiver lagging; event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(room = %self.room_id, status = %status, "Session status");
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    /// Broadcast queued signals, then surface queued events.
    async fn flush(&mut self, out: Outbox) {
        for signal in out.signals {
            let (event, payload) = signal.encode();
            if let Err(e) = self.subscription.broadcast(event, payload).await {
                warn!(kind = signal.kind(), target = ?signal.target(), error = %e, "Signal not sent");
            }
        }
        for event in out.events {
            self.emit(event);
        }
    }

    // -----------------------------------------------------------------------
    // Relay
    // -----------------------------------------------------------------------

    async fn on_relay_event(&mut self, event: RelayEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut out = Outbox::default();
        match event {
            RelayEvent::Subscribed => {
                self.set_status(SessionStatus::Connected);
                self.issue_increment();
            }
            RelayEvent::PresenceSync(members) => {
                self.negotiator.on_presence_sync(members, &mut out).await;
            }
            RelayEvent::PresenceJoin(peer) => {
                self.negotiator.on_presence_join(peer, &mut out).await;
            }
            RelayEvent::PresenceLeave(peer) => {
                self.negotiator.on_presence_leave(peer, &mut out).await;
            }
            RelayEvent::Broadcast { event, payload } => match SignalMessage::decode(&event, payload) {
                Ok(SignalMessage::Chat(msg)) => self.on_chat(msg),
                Ok(signal) => self.negotiator.on_signal(signal, &mut out).await,
                Err(e) => debug!(event = %event, error = %e, "Dropping undecodable broadcast"),
            },
            RelayEvent::Disconnected => {
                self.set_status(SessionStatus::Disconnected);
                self.negotiator.on_relay_lost(&mut out).await;
            }
        }
        self.flush(out).await;
    }

    fn on_chat(&mut self, msg: ChatMessage) {
        if msg.from.as_ref() == Some(&self.identity.participant_id) {
            return;
        }
        debug!(author = %msg.author, "Chat received");
        self.transcript.push(msg.clone());
        self.emit(SessionEvent::Chat(msg));
    }

    fn issue_increment(&mut self) {
        if self.increment_task.is_some() {
            return;
        }
        let membership = Arc::clone(&self.membership);
        let room_id = self.room_id.clone();
        self.increment_task = Some(tokio::spawn(async move {
            if let Err(e) = membership.increment(&room_id).await {
                warn!(room = %room_id, error = %e, "Failed to increment participants");
            }
        }));
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SendChat { text, reply } => {
                let result = self.send_chat(text).await;
                let _ = reply.send(result);
            }
            SessionCommand::SetAudio { enabled, reply } => {
                self.media.set_audio_enabled(enabled);
                let _ = reply.send(());
            }
            SessionCommand::SetVideo { enabled, reply } => {
                self.media.set_video_enabled(enabled);
                let _ = reply.send(());
            }
            SessionCommand::Peers { reply } => {
                let _ = reply.send(self.negotiator.states());
            }
            SessionCommand::Transcript { reply } => {
                let _ = reply.send(self.transcript.all());
            }
        }
    }

    async fn send_chat(&mut self, text: String) -> Result<ChatMessage> {
        let msg = ChatMessage::new(
            &self.identity.display_name,
            &text,
            Some(self.identity.participant_id.clone()),
        );
        let (event, payload) = SignalMessage::Chat(msg.clone()).encode();
        self.subscription.broadcast(event, payload).await?;
        self.transcript.push(msg.clone());
        self.emit(SessionEvent::Chat(msg.clone()));
        Ok(msg)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Decrement membership, release media, unsubscribe, close links.
    ///
    /// The decrement is issued first but runs detached behind the increment;
    /// its handle is returned so the caller can wait for it if it wants.
    async fn teardown(&mut self) -> Option<JoinHandle<()>> {
        self.closed.store(true, Ordering::SeqCst);

        let decrement = self.increment_task.take().map(|increment| {
            let membership = Arc::clone(&self.membership);
            let room_id = self.room_id.clone();
            tokio::spawn(async move {
                let _ = increment.await;
                if let Err(e) = membership.decrement(&room_id).await {
                    warn!(room = %room_id, error = %e, "Failed to decrement participants");
                }
            })
        });

        let stopped = self.media.release();
        self.subscription.leave().await;
        let links = self.negotiator.teardown().await;

        info!(room = %self.room_id, tracks = stopped, links, "Session torn down");
        self.set_status(SessionStatus::Closed);
        decrement
    }
}
