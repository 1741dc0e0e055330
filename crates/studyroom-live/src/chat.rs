//! Room chat: messages and the in-memory transcript.
//!
//! Chat rides the relay under the `chat` event and never touches the
//! negotiator. The transcript is a bounded ring buffer so memory usage
//! stays predictable for long sessions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studyroom_common::ParticipantId;

use crate::error::{LiveError, Result, SignalParseError};

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Sender's participant id, when the sender supplied one.
    pub from: Option<ParticipantId>,
}

/// Wire form: `{author, text, time, from?}`. Older clients send `user`
/// instead of `author` and a bare `HH:MM` time.
#[derive(Serialize, Deserialize)]
struct ChatPayload {
    #[serde(alias = "user")]
    author: Option<String>,
    text: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<ParticipantId>,
}

impl ChatMessage {
    pub fn new(author: &str, text: &str, from: Option<ParticipantId>) -> Self {
        Self {
            author: author.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
            from,
        }
    }

    pub(crate) fn to_payload(&self) -> serde_json::Value {
        let payload = ChatPayload {
            author: Some(self.author.clone()),
            text: Some(self.text.clone()),
            time: Some(self.timestamp.to_rfc3339()),
            from: self.from.clone(),
        };
        serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a received payload. Unparsable times become the receipt time.
    pub(crate) fn from_payload(
        payload: serde_json::Value,
    ) -> std::result::Result<Self, SignalParseError> {
        let wire: ChatPayload = serde_json::from_value(payload)?;
        let author = wire.author.ok_or(SignalParseError::MissingField("author"))?;
        let text = wire.text.ok_or(SignalParseError::MissingField("text"))?;
        let timestamp = wire
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Ok(Self {
            author,
            text,
            timestamp,
            from: wire.from,
        })
    }
}

/// Normalize outgoing chat text. Blank text yields `None`; text longer than
/// `max_length` characters is rejected.
pub fn prepare_text(text: &str, max_length: usize) -> Result<Option<String>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let len = trimmed.chars().count();
    if len > max_length {
        return Err(LiveError::InvalidChat(format!(
            "message is {len} characters, limit is {max_length}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Chat transcript for one session, oldest first.
#[derive(Debug, Clone)]
pub struct ChatTranscript {
    max_messages: usize,
    messages: VecDeque<ChatMessage>,
}

impl ChatTranscript {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            messages: VecDeque::new(),
        }
    }

    /// Append a message, evicting the oldest when full.
    pub fn push(&mut self, msg: ChatMessage) {
        if self.messages.len() >= self.max_messages {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
    }

    /// The most recent `limit` messages (oldest first).
    pub fn recent(&self, limit: usize) -> Vec<&ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).collect()
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for ChatTranscript {
    fn default() -> Self {
        Self::new(500)
    }
}
