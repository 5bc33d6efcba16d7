//! Ambient health reporting, aggregated at `GET /healthz`.

use serde::Serialize;

/// Aggregate health state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Everything checked is healthy.
    Healthy,
    /// At least one check is degraded, none are unhealthy.
    Degraded,
    /// At least one check is unhealthy.
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A single named health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component checked, e.g. `"session_registry"`.
    pub name: String,
    /// The check's own state.
    pub state: HealthState,
    /// Optional human-readable detail.
    pub detail: Option<String>,
}

impl HealthCheck {
    /// Build a healthy check result.
    #[must_use]
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Healthy,
            detail: None,
        }
    }

    /// Build a degraded check result.
    #[must_use]
    pub fn degraded(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Degraded,
            detail: Some(detail.into()),
        }
    }

    /// Build an unhealthy check result.
    #[must_use]
    pub fn unhealthy(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregated health of the whole bridge.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall state, the worst of all individual checks.
    pub state: HealthState,
    /// Every check that ran.
    pub checks: Vec<HealthCheck>,
}

impl HealthStatus {
    /// Aggregate a set of checks into an overall status.
    #[must_use]
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let state = Self::aggregate_state(&checks);
        Self { state, checks }
    }

    fn aggregate_state(checks: &[HealthCheck]) -> HealthState {
        if checks.iter().any(|c| c.state == HealthState::Unhealthy) {
            HealthState::Unhealthy
        } else if checks.iter().any(|c| c.state == HealthState::Degraded) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    /// `true` when the overall state is healthy or degraded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state != HealthState::Unhealthy
    }
}

/// Run the bridge's health checks against its live state.
pub async fn run_health_checks(
    sessions: &crate::session::SessionRegistry,
    mcp_sessions: &crate::mcp::McpSessionTable,
    agent_configured: bool,
) -> HealthStatus {
    let mut checks = vec![HealthCheck::healthy("session_registry")];

    checks.push(HealthCheck::healthy("mcp_sessions"));

    if agent_configured {
        checks.push(HealthCheck::healthy("agent"));
    } else {
        checks.push(HealthCheck::degraded("agent", "no agent.url configured; queries are disabled"));
    }

    let _ = (sessions.len().await, mcp_sessions.len().await);
    HealthStatus::from_checks(checks)
}
