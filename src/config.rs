//! Bridge configuration.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overflow policy applied when a token is at its session cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOverflowPolicy {
    /// Evict the session with the oldest `connected_at` to make room.
    CloseOldest,
    /// Reject the new connection outright.
    Reject,
}

impl Default for SessionOverflowPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// External agent endpoint settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Frontend session and query caps.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Values advertised in the MCP `initialize` response.
    #[serde(default)]
    pub server_info: ServerInfoConfig,
}

impl BridgeConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.server.listen_addr.trim().is_empty() {
            return Err(BridgeError::Config("server.listen_addr is empty".into()));
        }
        Ok(())
    }
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the bridge listens on, e.g. `0.0.0.0:8787`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// External agent endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL the bridge PUTs/DELETEs queries against. `None` disables
    /// query creation entirely.
    pub url: Option<String>,

    /// Bearer token sent as `Authorization` on outbound agent requests.
    pub auth_token: Option<String>,
}

/// Frontend session and query caps. Every field is optional; absence means
/// the corresponding cap is unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions sharing one auth token.
    pub max_sessions_per_token: Option<usize>,

    /// Policy applied when `max_sessions_per_token` is reached.
    #[serde(default)]
    pub session_overflow_policy: SessionOverflowPolicy,

    /// Idle-expiry window for a session, in milliseconds.
    pub session_max_duration_ms: Option<u64>,

    /// Maximum concurrent active queries sharing one auth token.
    pub max_in_flight_queries_per_token: Option<usize>,
}

/// Values advertised in the MCP `initialize` response and the unauthenticated
/// `GET /` server-info route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoConfig {
    /// Server name.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Server version string.
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Optional `data:` URI icon.
    pub icon_data_uri: Option<String>,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            description: String::new(),
            version: default_server_version(),
            icon_data_uri: None,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_server_name() -> String {
    "mcp-bridge".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let limits = LimitsConfig::default();
        assert!(limits.max_sessions_per_token.is_none());
        assert!(limits.session_max_duration_ms.is_none());
        assert!(limits.max_in_flight_queries_per_token.is_none());
        assert_eq!(limits.session_overflow_policy, SessionOverflowPolicy::Reject);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_src = r#"
            [server]
            listen_addr = "127.0.0.1:9000"
        "#;
        let config: BridgeConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert!(config.agent.url.is_none());
        assert_eq!(config.server_info.name, "mcp-bridge");
    }

    #[test]
    fn parses_full_toml() {
        let toml_src = r#"
            [server]
            listen_addr = "0.0.0.0:8787"

            [agent]
            url = "https://agent.example.com"
            auth_token = "tok"

            [limits]
            max_sessions_per_token = 4
            session_overflow_policy = "close_oldest"
            session_max_duration_ms = 14400000
            max_in_flight_queries_per_token = 8

            [server_info]
            name = "acme-bridge"
            description = "demo"
            version = "1.2.3"
        "#;
        let config: BridgeConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.agent.url.as_deref(), Some("https://agent.example.com"));
        assert_eq!(config.limits.max_sessions_per_token, Some(4));
        assert_eq!(
            config.limits.session_overflow_policy,
            SessionOverflowPolicy::CloseOldest
        );
        assert_eq!(config.server_info.name, "acme-bridge");
    }

    #[test]
    fn rejects_empty_listen_addr() {
        let mut config = BridgeConfig::default();
        config.server.listen_addr = String::new();
        assert!(config.validate().is_err());
    }
}
