//! Error taxonomy for the live room.

use studyroom_common::ParticipantId;

/// Failures surfaced by the live session and its components.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Camera or microphone denied or missing. Terminal for a join.
    #[error("cannot access camera/microphone: {0}")]
    MediaUnavailable(String),

    /// The relay transport dropped or refused the subscription.
    #[error("relay disconnected: {0}")]
    RelayDisconnected(String),

    /// A peer never finished negotiating in time.
    #[error("negotiation with {peer} stalled after {attempts} attempt(s)")]
    NegotiationStalled { peer: ParticipantId, attempts: u32 },

    #[error(transparent)]
    SignalParse(#[from] SignalParseError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("membership counter error: {0}")]
    Membership(String),

    #[error("invalid chat message: {0}")]
    InvalidChat(String),

    #[error("session is closed")]
    SessionClosed,
}

/// A relay message that could not be decoded. The message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SignalParseError {
    #[error("unknown broadcast event '{0}'")]
    UnknownEvent(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for SignalParseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
