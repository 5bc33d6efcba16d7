//! Error types for the bridge.

use thiserror::Error;

/// Top-level bridge error type.
///
/// Only conditions that are genuinely exceptional live here — malformed
/// config, a poisoned lock, an unreachable internal invariant. Expected
/// protocol outcomes (unknown tool, session ambiguity, query not found) are
/// represented as data (see [`crate::mcp::result::SoftError`]), not as
/// variants of this enum.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP request to the agent failed.
    #[error("agent request error: {0}")]
    Agent(#[from] reqwest::Error),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
