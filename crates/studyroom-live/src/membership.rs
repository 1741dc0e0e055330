//! Room participant counter kept by the backend.
//!
//! Fire-and-forget: the session logs failures and carries on.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{LiveError, Result};

#[async_trait]
pub trait MembershipCounter: Send + Sync {
    async fn increment(&self, room_id: &str) -> Result<()>;
    async fn decrement(&self, room_id: &str) -> Result<()>;
}

/// Counter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMembership;

#[async_trait]
impl MembershipCounter for NoopMembership {
    async fn increment(&self, _room_id: &str) -> Result<()> {
        Ok(())
    }

    async fn decrement(&self, _room_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Counter backed by Supabase PostgREST RPC functions taking `{room_id}`.
pub struct SupabaseMembership {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    increment_rpc: String,
    decrement_rpc: String,
}

impl SupabaseMembership {
    pub fn new(project_ref: &str, api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: format!("https://{project_ref}.supabase.co"),
            api_key: api_key.to_string(),
            access_token: None,
            increment_rpc: "increment_participants".to_string(),
            decrement_rpc: "decrement_participants".to_string(),
        }
    }

    /// Authenticate calls as a user instead of the anon role.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn with_rpc_names(mut self, increment: &str, decrement: &str) -> Self {
        self.increment_rpc = increment.to_string();
        self.decrement_rpc = decrement.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.base_url)
    }

    async fn call(&self, function: &str, room_id: &str) -> Result<()> {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        let response = self
            .http
            .post(self.rpc_url(function))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .json(&serde_json::json!({ "room_id": room_id }))
            .send()
            .await
            .map_err(|e| LiveError::Membership(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LiveError::Membership(format!("{function}: HTTP {status}: {text}")));
        }
        debug!(function, room = room_id, "Membership counter updated");
        Ok(())
    }
}

impl std::fmt::Debug for SupabaseMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseMembership")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("increment_rpc", &self.increment_rpc)
            .field("decrement_rpc", &self.decrement_rpc)
            .finish()
    }
}

#[async_trait]
impl MembershipCounter for SupabaseMembership {
    async fn increment(&self, room_id: &str) -> Result<()> {
        self.call(&self.increment_rpc, room_id).await
    }

    async fn decrement(&self, room_id: &str) -> Result<()> {
        self.call(&self.decrement_rpc, room_id).await
    }
}
