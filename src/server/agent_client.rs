//! Outbound HTTP client for the external agent (`PUT`/`DELETE /query/{uuid}`).

use serde_json::Value;

use crate::config::AgentConfig;

/// Thin wrapper over `reqwest` for the handful of calls the bridge makes
/// toward the agent. Kept separate from [`crate::query::QueryEngine`] so the
/// engine's state-machine logic stays transport-agnostic and unit-testable
/// without a network.
pub struct AgentClient {
    http: reqwest::Client,
    base_url: Option<String>,
    auth_token: Option<String>,
}

impl AgentClient {
    /// Build a client from configuration. `base_url` absent disables query
    /// creation entirely.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.url.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// `true` if an agent URL is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn query_url(&self, uuid: &str) -> Option<String> {
        // Literal join, no trailing-slash normalization on `base_url`.
        self.base_url.as_ref().map(|base| format!("{base}/query/{uuid}"))
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// PUT the new query to the agent. Returns `Ok(())` on any 2xx response.
    pub async fn create_query(&self, uuid: &str, payload: &Value) -> Result<(), String> {
        let Some(url) = self.query_url(uuid) else {
            return Err("Missing Agent URL".to_string());
        };
        let response = self
            .with_auth(self.http.put(&url))
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("agent responded with status {}", response.status()))
        }
    }

    /// Best-effort DELETE to cancel a query on the agent side. Errors are
    /// swallowed by the caller; cancellation always proceeds locally.
    pub async fn delete_query(&self, uuid: &str) -> Result<(), String> {
        let Some(url) = self.query_url(uuid) else {
            return Err("Missing Agent URL".to_string());
        };
        self.with_auth(self.http.delete(&url))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
