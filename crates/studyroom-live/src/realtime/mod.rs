//! Supabase Realtime over Phoenix Channels v1.
//!
//! A [`RealtimeClient`] handle feeds commands to one background task that
//! owns the socket. The task heartbeats and reconnects with backoff. After
//! a reconnect it rejoins every channel and re-tracks presence.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{ChannelConfig, PhoenixMessage, PresenceMap, RealtimeConfig, RealtimeEvent};
