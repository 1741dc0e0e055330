//! Public session handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use studyroom_common::{ParticipantId, SessionId};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::driver::{Driver, SessionCommand};
use super::types::{SessionConfig, SessionDeps, SessionEvent, SessionStatus};
use crate::chat::{prepare_text, ChatMessage, ChatTranscript};
use crate::error::{LiveError, Result};
use crate::identity::Identity;
use crate::media::{MediaStream, MediaStreamManager};
use crate::negotiator::Negotiator;
use crate::peer::{NegotiationState, PeerRegistry};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;
const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// Handle to a joined room.
///
/// Dropping the handle without calling [`leave`](Self::leave) tears the
/// session down in the background.
pub struct RoomSession {
    room_id: String,
    local: ParticipantId,
    session_id: SessionId,
    local_stream: MediaStream,
    chat_max_length: usize,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<Option<JoinHandle<()>>>>>,
    /// Pending membership decrement, once the driver has finished.
    decrement: Mutex<Option<JoinHandle<()>>>,
}

impl RoomSession {
    /// Enter a room: acquire media, subscribe to the relay, start negotiating.
    ///
    /// Fails with `MediaUnavailable` if capture is refused and with
    /// `RelayDisconnected` if the relay refuses the subscription. Nothing is
    /// left running on failure.
    pub async fn join(
        room_id: &str,
        identity: Identity,
        config: SessionConfig,
        deps: SessionDeps,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let session_id = SessionId::new();
        let local = identity.participant_id.clone();
        let span = info_span!("session", id = %session_id, room = %room_id, local = %local);

        let mut media = MediaStreamManager::new(Arc::clone(&deps.devices));
        let local_stream = media
            .acquire_local(&config.constraints)
            .instrument(span.clone())
            .await?;
        if config.start_muted {
            media.set_audio_enabled(false);
        }
        if config.start_camera_off {
            media.set_video_enabled(false);
        }

        let (subscription, relay_rx) = match deps
            .relay
            .join(room_id, &local)
            .instrument(span.clone())
            .await
        {
            Ok(joined) => joined,
            Err(e) => {
                media.release();
                return Err(e);
            }
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Connecting);
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let registry = PeerRegistry::new(Arc::clone(&deps.connector), transport_tx);
        let mut negotiator = Negotiator::new(local.clone(), config.negotiation.clone(), registry);
        negotiator.set_local_stream(local_stream.clone());

        let driver = Driver {
            room_id: room_id.to_string(),
            identity,
            sweep_interval: config.sweep_interval,
            negotiator,
            media,
            transcript: ChatTranscript::new(config.chat_max_messages),
            subscription,
            membership: Arc::clone(&deps.membership),
            increment_task: None,
            events: event_tx,
            status: status_tx,
            closed: Arc::clone(&closed),
        };
        let task = tokio::spawn(
            driver
                .run(command_rx, relay_rx, transport_rx, shutdown.clone())
                .instrument(span),
        );

        info!(session = %session_id, room = %room_id, local = %local, "Joined room");
        let session = Self {
            room_id: room_id.to_string(),
            local,
            session_id,
            local_stream,
            chat_max_length: config.chat_max_length,
            commands: command_tx,
            status: status_rx,
            closed,
            shutdown,
            driver: Mutex::new(Some(task)),
            decrement: Mutex::new(None),
        };
        Ok((session, event_rx))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Read-only view of the local capture tracks.
    pub fn local_stream(&self) -> &MediaStream {
        &self.local_stream
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Resolves on the next status change.
    pub async fn status_changed(&mut self) -> Option<SessionStatus> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        if self.is_closed() {
            return Err(LiveError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| LiveError::SessionClosed)?;
        rx.await.map_err(|_| LiveError::SessionClosed)
    }

    /// Broadcast a chat line and append it to the local transcript.
    /// Blank text is ignored and returns `Ok(None)`.
    pub async fn send_chat(&self, text: &str) -> Result<Option<ChatMessage>> {
        if self.is_closed() {
            return Err(LiveError::SessionClosed);
        }
        let Some(text) = prepare_text(text, self.chat_max_length)? else {
            return Ok(None);
        };
        self.request(|reply| SessionCommand::SendChat { text, reply })
            .await?
            .map(Some)
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetAudio { enabled, reply })
            .await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetVideo { enabled, reply })
            .await
    }

    /// Negotiation state of every current peer link.
    pub async fn peers(&self) -> Result<BTreeMap<ParticipantId, NegotiationState>> {
        self.request(|reply| SessionCommand::Peers { reply }).await
    }

    pub async fn transcript(&self) -> Result<Vec<ChatMessage>> {
        self.request(|reply| SessionCommand::Transcript { reply })
            .await
    }

    /// Leave the room and wait for teardown to finish. Safe to call twice.
    ///
    /// Returns once media is released and every link is closed; the
    /// membership decrement may still be in flight, see
    /// [`membership_settled`](Self::membership_settled).
    pub async fn leave(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        let task = self.driver.lock().await.take();
        if let Some(task) = task {
            match task.await {
                Ok(decrement) => *self.decrement.lock().await = decrement,
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "Session driver ended abnormally")
                }
            }
            info!(session = %self.session_id, room = %self.room_id, "Left room");
        }
    }

    /// Wait for the membership decrement issued by [`leave`](Self::leave).
    /// Returns at once if none is pending.
    pub async fn membership_settled(&self) {
        let pending = self.decrement.lock().await.take();
        if let Some(task) = pending {
            if let Err(e) = task.await {
                warn!(session = %self.session_id, error = %e, "Membership decrement task failed");
            }
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}
