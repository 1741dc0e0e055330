use serde::{Deserialize, Serialize};
use studyroom_common::ParticipantId;

/// Who the local user is inside a room.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: ParticipantId,
    /// Name shown as the chat author.
    pub display_name: String,
    /// Optional Supabase Auth JWT for authenticated connections.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("participant_id", &self.participant_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl Identity {
    pub fn new(participant_id: impl Into<ParticipantId>, display_name: &str) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.to_string(),
            access_token: None,
        }
    }

    /// A random guest identity.
    pub fn guest(display_name: &str) -> Self {
        Self::new(ParticipantId::generate(), display_name)
    }

    /// Create an identity from a Supabase Auth session.
    pub fn from_supabase_auth(user_id: String, display_name: String, access_token: String) -> Self {
        Self {
            participant_id: ParticipantId::from(user_id),
            display_name,
            access_token: Some(access_token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token() {
        let id = Identity::from_supabase_auth("u1".into(), "Ann".into(), "secret".into());
        let debug = format!("{id:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("u1"));
    }

    #[test]
    fn token_is_not_serialized() {
        let id = Identity::from_supabase_auth("u1".into(), "Ann".into(), "secret".into());
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn guests_get_distinct_ids() {
        assert_ne!(
            Identity::guest("a").participant_id,
            Identity::guest("a").participant_id
        );
    }
}
