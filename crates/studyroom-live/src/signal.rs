//! Signaling codec.
//!
//! Everything a session sends over the relay is a [`SignalMessage`]. Peer
//! negotiation travels under the `signal` broadcast event as
//! `{target, from, kind, offer | answer | candidate}`; chat travels under
//! `chat` with no target.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use studyroom_common::ParticipantId;

use crate::chat::ChatMessage;
use crate::error::SignalParseError;

/// Broadcast event carrying negotiation messages.
pub const SIGNAL_EVENT: &str = "signal";
/// Broadcast event carrying chat.
pub const CHAT_EVENT: &str = "chat";

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description in browser shape: `{type, sdp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate in browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SignalMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    Offer {
        target: ParticipantId,
        from: ParticipantId,
        description: SessionDescription,
    },
    Answer {
        target: ParticipantId,
        from: ParticipantId,
        description: SessionDescription,
    },
    Candidate {
        target: ParticipantId,
        from: ParticipantId,
        candidate: IceCandidate,
    },
    Chat(ChatMessage),
}

impl SignalMessage {
    /// Addressee of a negotiation message. Chat has none.
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::Candidate { target, .. } => Some(target),
            Self::Chat(_) => None,
        }
    }

    pub fn from(&self) -> Option<&ParticipantId> {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::Candidate { from, .. } => {
                Some(from)
            }
            Self::Chat(msg) => msg.from.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::Chat(_) => "chat",
        }
    }

    /// Broadcast event name and payload for the relay.
    pub fn encode(&self) -> (&'static str, Value) {
        match self {
            Self::Offer {
                target,
                from,
                description,
            } => (
                SIGNAL_EVENT,
                json!({ "target": target, "from": from, "kind": "offer", "offer": description }),
            ),
            Self::Answer {
                target,
                from,
                description,
            } => (
                SIGNAL_EVENT,
                json!({ "target": target, "from": from, "kind": "answer", "answer": description }),
            ),
            Self::Candidate {
                target,
                from,
                candidate,
            } => (
                SIGNAL_EVENT,
                json!({ "target": target, "from": from, "kind": "candidate", "candidate": candidate }),
            ),
            Self::Chat(msg) => (CHAT_EVENT, msg.to_payload()),
        }
    }

    /// Decode a relay broadcast. `kind` is inferred from the payload body
    /// when the sender omitted it.
    pub fn decode(event: &str, payload: Value) -> Result<Self, SignalParseError> {
        match event {
            CHAT_EVENT => Ok(Self::Chat(ChatMessage::from_payload(payload)?)),
            SIGNAL_EVENT => decode_signal(payload),
            other => Err(SignalParseError::UnknownEvent(other.to_string())),
        }
    }
}

fn participant(payload: &Value, field: &'static str) -> Result<ParticipantId, SignalParseError> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(ParticipantId::from(s.as_str())),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(SignalParseError::MissingField(field))
        }
        Some(other) => Err(SignalParseError::Malformed(format!(
            "'{field}' must be a string, got {other}"
        ))),
    }
}

fn body<T: for<'de> Deserialize<'de>>(
    payload: &mut Value,
    field: &'static str,
) -> Result<T, SignalParseError> {
    let value = payload
        .get_mut(field)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .ok_or(SignalParseError::MissingField(field))?;
    Ok(serde_json::from_value(value)?)
}

fn decode_signal(mut payload: Value) -> Result<SignalMessage, SignalParseError> {
    if !payload.is_object() {
        return Err(SignalParseError::Malformed("signal payload is not an object".into()));
    }
    let target = participant(&payload, "target")?;
    let from = participant(&payload, "from")?;

    let kind = match payload.get("kind").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => ["offer", "answer", "candidate"]
            .into_iter()
            .find(|k| payload.get(*k).is_some_and(|v| !v.is_null()))
            .ok_or(SignalParseError::MissingField("kind"))?
            .to_string(),
    };

    match kind.as_str() {
        "offer" => {
            let description: SessionDescription = body(&mut payload, "offer")?;
            if description.kind != SdpKind::Offer {
                return Err(SignalParseError::Malformed("offer carries an answer sdp".into()));
            }
            Ok(SignalMessage::Offer {
                target,
                from,
                description,
            })
        }
        "answer" => {
            let description: SessionDescription = body(&mut payload, "answer")?;
            if description.kind != SdpKind::Answer {
                return Err(SignalParseError::Malformed("answer carries an offer sdp".into()));
            }
            Ok(SignalMessage::Answer {
                target,
                from,
                description,
            })
        }
        "candidate" => Ok(SignalMessage::Candidate {
            target,
            from,
            candidate: body(&mut payload, "candidate")?,
        }),
        other => Err(SignalParseError::Malformed(format!("unknown signal kind '{other}'"))),
    }
}
