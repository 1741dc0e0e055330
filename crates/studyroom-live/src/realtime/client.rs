//! Handle side of the realtime connection.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::connection::connection_loop;
use super::types::{ChannelConfig, RealtimeCommand, RealtimeConfig, RealtimeEvent};
use crate::error::{LiveError, Result};

/// Cheap handle onto one realtime socket.
///
/// Every method only queues a command for the connection task, so calls
/// succeed while the socket is reconnecting and fail once the task is gone.
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<RwLock<bool>>,
    shutdown: CancellationToken,
}

impl RealtimeClient {
    /// Spawn the connection task. Events arrive on the returned receiver.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));
        let shutdown = CancellationToken::new();

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(connection_loop(
            config, connected, event_tx, command_rx, shutdown,
        ));

        (client, event_rx)
    }

    /// Second handle onto the same socket.
    pub fn clone_sender(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            connected: Arc::clone(&self.connected),
            shutdown: self.shutdown.clone(),
        }
    }

    async fn send(&self, cmd: RealtimeCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| LiveError::RelayDisconnected("realtime connection task stopped".into()))
    }

    pub async fn join_channel(&self, topic: &str, config: ChannelConfig) -> Result<()> {
        self.send(RealtimeCommand::JoinChannel {
            topic: topic.to_string(),
            config,
        })
        .await
    }

    pub async fn leave_channel(&self, topic: &str) -> Result<()> {
        self.send(RealtimeCommand::LeaveChannel {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn broadcast(
        &self,
        topic: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.send(RealtimeCommand::Broadcast {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        })
        .await
    }

    /// Track presence on a channel. Re-sent automatically after reconnects.
    pub async fn presence_track(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        self.send(RealtimeCommand::PresenceTrack {
            topic: topic.to_string(),
            payload,
        })
        .await
    }

    /// Whether the socket is currently open.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Send leave frames for every channel, close the socket, stop retrying.
    pub async fn disconnect(&self) {
        if self.send(RealtimeCommand::Disconnect).await.is_err() {
            self.shutdown.cancel();
        }
    }

    /// Drop the socket without leave frames. Usable from `Drop`.
    pub fn shutdown_now(&self) {
        self.shutdown.cancel();
    }
}
