//! The bridge: composes the session registry, correlation layer, query
//! engine, and MCP dispatcher into one owning struct.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::BridgeConfig;
use crate::correlation::CorrelationLayer;
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::session::{McpSessionTable, MCP_SESSION_IDLE_MS};
use crate::protocol::{error_code, InboundFrame, OutboundFrame};
use crate::protocol::close_code;
use crate::query::{CompleteError, Query, QueryEngine, QueryState};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::server::agent_client::AgentClient;
use crate::session::{FrameSender, SessionRegistry};

const SESSION_IDLE_SWEEP_INTERVAL: Duration = Duration::from_millis(60_000);
const MCP_IDLE_SWEEP_INTERVAL: Duration = Duration::from_millis(60_000);

/// Owns every component and wires them together.
pub struct Bridge {
    /// Live configuration.
    pub config: BridgeConfig,
    /// Frontend session registry.
    pub sessions: Arc<SessionRegistry>,
    /// MCP protocol session table.
    pub mcp_sessions: Arc<McpSessionTable>,
    /// Query engine.
    pub queries: Arc<QueryEngine>,
    /// Correlation layer for tool calls / resource reads.
    pub correlation: Arc<CorrelationLayer>,
    /// JSON-RPC dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Outbound HTTP client to the external agent.
    pub agent: Arc<AgentClient>,
    /// Timer source driving timeouts and idle sweeps.
    pub scheduler: Arc<dyn Scheduler>,
}

impl Bridge {
    /// Construct a bridge from configuration, using the production
    /// [`TokioScheduler`].
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_scheduler(config, Arc::new(TokioScheduler::new()))
    }

    /// Construct a bridge with an injected scheduler, for deterministic tests.
    #[must_use]
    pub fn with_scheduler(config: BridgeConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let sessions = Arc::new(SessionRegistry::new(
            config.limits.max_sessions_per_token,
            config.limits.session_overflow_policy,
        ));
        let mcp_sessions = Arc::new(McpSessionTable::new());
        let queries = Arc::new(QueryEngine::new(config.limits.max_in_flight_queries_per_token));
        let correlation = Arc::new(CorrelationLayer::new(scheduler.clone()));
        let agent = Arc::new(AgentClient::new(&config.agent));
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            mcp_sessions.clone(),
            queries.clone(),
            correlation.clone(),
            config.server_info.clone(),
        ));

        Self {
            config,
            sessions,
            mcp_sessions,
            queries,
            correlation,
            dispatcher,
            agent,
            scheduler,
        }
    }

    /// Start the session and MCP-session idle-expiry loops. Returns the
    /// timer ids so [`Bridge::close`] can cancel them.
    pub fn start_idle_sweeps(self: &Arc<Self>) -> Vec<crate::scheduler::TimerId> {
        let mut timers = Vec::new();

        if let Some(max_duration_ms) = self.config.limits.session_max_duration_ms {
            let bridge = self.clone();
            let id = self.scheduler.schedule_interval(
                SESSION_IDLE_SWEEP_INTERVAL,
                Box::new(move || {
                    let bridge = bridge.clone();
                    Box::pin(async move { bridge.sweep_expired_sessions(max_duration_ms).await })
                }),
            );
            timers.push(id);
        }

        let bridge = self.clone();
        let id = self.scheduler.schedule_interval(
            MCP_IDLE_SWEEP_INTERVAL,
            Box::new(move || {
                let bridge = bridge.clone();
                Box::pin(async move { bridge.sweep_expired_mcp_sessions().await })
            }),
        );
        timers.push(id);

        timers
    }

    async fn sweep_expired_sessions(&self, max_duration_ms: u64) {
        let now = chrono::Utc::now();
        for session in self.sessions.expired(now, max_duration_ms).await {
            let _ = session.send(OutboundFrame::SessionExpired {
                code: error_code::SESSION_EXPIRED.to_string(),
            });
            session.close(close_code::POLICY, "session expired");
            self.sessions.remove(&session.session_id).await;
            self.queries.remove_for_session(&session.session_id, &session.auth_token).await;
            self.dispatcher.notify_tools_list_changed(&session.auth_token).await;
        }
    }

    async fn sweep_expired_mcp_sessions(&self) {
        let now = chrono::Utc::now();
        for session in self.mcp_sessions.expired(now, MCP_SESSION_IDLE_MS).await {
            self.mcp_sessions.remove(session.id).await;
        }
    }

    /// Authenticate a new socket connection, applying caps and notifying
    /// any evicted peer.
    #[instrument(skip(self, sender), fields(session_id = %session_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn authenticate(
        &self,
        session_id: String,
        auth_token: String,
        origin: String,
        page_title: Option<String>,
        session_name: Option<String>,
        user_agent: Option<String>,
        sender: FrameSender,
    ) -> crate::session::AuthOutcome {
        let outcome = self
            .sessions
            .authenticate(session_id, auth_token, origin, page_title, session_name, user_agent, sender)
            .await;

        if let crate::session::AuthOutcome::Accepted { evicted: Some(evicted), .. } = &outcome {
            let _ = evicted.send(OutboundFrame::SessionClosed {
                reason: "session limit exceeded for this token".into(),
                code: error_code::SESSION_LIMIT_EXCEEDED.into(),
            });
            evicted.close(close_code::POLICY, "session limit exceeded");
            self.queries.remove_for_session(&evicted.session_id, &evicted.auth_token).await;
            self.dispatcher.notify_tools_list_changed(&evicted.auth_token).await;
        }

        outcome
    }

    /// Handle one inbound frame from an already-authenticated session.
    #[instrument(skip(self, frame), fields(session_id = %session_id))]
    pub async fn handle_inbound_frame(&self, session_id: &str, frame: InboundFrame) {
        match frame {
            InboundFrame::Authenticate { .. } => {
                debug!("ignoring duplicate authenticate on an established session");
            }
            InboundFrame::RegisterTool { tool } => {
                if self.sessions.register_tool(session_id, tool).await {
                    if let Some(session) = self.sessions.get(session_id).await {
                        self.dispatcher.notify_tools_list_changed(&session.auth_token).await;
                    }
                }
            }
            InboundFrame::RegisterResource { resource } => {
                self.sessions.register_resource(session_id, resource).await;
            }
            InboundFrame::Activity { timestamp } => {
                self.sessions.record_activity(session_id, timestamp).await;
            }
            InboundFrame::ToolResponse { request_id, result } => {
                self.correlation.resolve_tool_response(&request_id, result).await;
            }
            InboundFrame::ResourceResponse {
                request_id,
                content,
                blob,
                mime_type,
                error,
            } => {
                self.correlation
                    .resolve_resource_response(&request_id, content, blob, mime_type, error)
                    .await;
            }
            InboundFrame::Query {
                uuid,
                response_tool,
                tools,
                restrict_tools,
                payload,
            } => {
                self.create_query(session_id, uuid, response_tool, tools, restrict_tools, payload)
                    .await;
            }
            InboundFrame::QueryCancel { uuid, .. } => {
                self.cancel_query(&uuid).await;
            }
        }
    }

    async fn create_query(
        &self,
        session_id: &str,
        uuid: String,
        response_tool: Option<String>,
        tools: Option<Vec<String>>,
        restrict_tools: bool,
        payload: serde_json::Value,
    ) {
        let Some(session) = self.sessions.get(session_id).await else {
            return;
        };

        if !self.agent.is_configured() {
            let _ = session.send(OutboundFrame::QueryFailure {
                uuid,
                error: "Missing Agent URL".into(),
                code: None,
            });
            return;
        }

        if !self.queries.try_reserve(&session.auth_token).await {
            let _ = session.send(OutboundFrame::QueryFailure {
                uuid,
                error: "too many in-flight queries for this token".into(),
                code: Some(error_code::QUERY_LIMIT_EXCEEDED.into()),
            });
            return;
        }

        let query = Query {
            uuid: uuid.clone(),
            session_id: session_id.to_string(),
            auth_token: session.auth_token.clone(),
            response_tool,
            tools,
            restrict_tools,
            state: tokio::sync::RwLock::new(QueryState::Active),
            tool_calls: tokio::sync::RwLock::new(Vec::new()),
        };

        match self.agent.create_query(&uuid, &payload).await {
            Ok(()) => {
                self.queries.insert(query).await;
                let _ = session.send(OutboundFrame::QueryAccepted { uuid });
            }
            Err(error) => {
                self.queries.abort(&session.auth_token).await;
                let _ = session.send(OutboundFrame::QueryFailure { uuid, error, code: None });
            }
        }
    }

    async fn cancel_query(&self, uuid: &str) {
        let Some(query) = self.queries.get(uuid).await else {
            return;
        };
        if let Some(session) = self.sessions.get(&query.session_id).await {
            let _ = session.send(OutboundFrame::QueryCancel {
                uuid: uuid.to_string(),
                reason: None,
            });
        }
        let _ = self.agent.delete_query(uuid).await;
        let _ = self.queries.cancel(uuid).await;
    }

    /// Handle `POST /query/{uuid}/progress`.
    pub async fn agent_query_progress(&self, uuid: &str, payload: serde_json::Value) -> bool {
        let Some(query) = self.queries.get(uuid).await else {
            return false;
        };
        if let Some(session) = self.sessions.get(&query.session_id).await {
            let _ = session.send(OutboundFrame::QueryProgress {
                uuid: uuid.to_string(),
                payload,
            });
        }
        true
    }

    /// Handle `PUT /query/{uuid}/complete`.
    pub async fn agent_query_complete(
        &self,
        uuid: &str,
        message: Option<serde_json::Value>,
    ) -> Result<(), CompleteError> {
        let Some(query) = self.queries.get(uuid).await else {
            return Err(CompleteError::NotFound);
        };
        let session_id = query.session_id.clone();
        match self.queries.complete(uuid).await {
            Ok(tool_calls) => {
                if let Some(session) = self.sessions.get(&session_id).await {
                    let _ = session.send(OutboundFrame::QueryComplete {
                        uuid: uuid.to_string(),
                        message,
                        tool_calls,
                    });
                }
                Ok(())
            }
            Err(reason) => {
                if let Some(session) = self.sessions.get(&session_id).await {
                    let error = match reason {
                        CompleteError::NotFound => error_code::QUERY_NOT_FOUND.to_string(),
                        CompleteError::ResponseToolDeclared => {
                            "query declared a response tool; explicit /complete is not valid".to_string()
                        }
                    };
                    let _ = session.send(OutboundFrame::QueryFailure {
                        uuid: uuid.to_string(),
                        error,
                        code: None,
                    });
                }
                Err(reason)
            }
        }
    }

    /// Handle `PUT /query/{uuid}/fail`.
    pub async fn agent_query_fail(&self, uuid: &str, error: String) -> Result<(), &'static str> {
        let Some(query) = self.queries.get(uuid).await else {
            return Err(error_code::QUERY_NOT_FOUND);
        };
        let session_id = query.session_id.clone();
        self.queries.fail(uuid).await?;
        if let Some(session) = self.sessions.get(&session_id).await {
            let _ = session.send(OutboundFrame::QueryFailure {
                uuid: uuid.to_string(),
                error,
                code: None,
            });
        }
        Ok(())
    }

    /// Handle `PUT /query/{uuid}/cancel`.
    pub async fn agent_query_cancel(&self, uuid: &str, reason: Option<String>) -> Result<(), &'static str> {
        let Some(query) = self.queries.get(uuid).await else {
            return Err(error_code::QUERY_NOT_FOUND);
        };
        let session_id = query.session_id.clone();
        self.queries.cancel(uuid).await?;
        if let Some(session) = self.sessions.get(&session_id).await {
            let _ = session.send(OutboundFrame::QueryCancel {
                uuid: uuid.to_string(),
                reason,
            });
        }
        Ok(())
    }

    /// Graceful shutdown: close every socket, cancel every timer, drain
    /// every map.
    pub async fn close(&self, idle_timers: Vec<crate::scheduler::TimerId>) {
        info!("bridge shutting down");
        for id in idle_timers {
            self.scheduler.cancel_interval(id);
        }
        for session in self.sessions.clear().await {
            session.close(close_code::SHUTDOWN, "server shutting down");
        }
        for mcp_session in self.mcp_sessions.clear().await {
            mcp_session.detach_stream().await;
        }
        self.queries.clear().await;
        self.scheduler.dispose().await;
        warn!("bridge shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, SessionOverflowPolicy};

    #[tokio::test]
    async fn evicting_a_session_notifies_tools_list_changed() {
        let mut config = BridgeConfig::default();
        config.limits = LimitsConfig {
            max_sessions_per_token: Some(1),
            session_overflow_policy: SessionOverflowPolicy::CloseOldest,
            ..LimitsConfig::default()
        };
        let bridge = Bridge::new(config);

        let mcp_session = bridge.mcp_sessions.create("T".into()).await;
        let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel();
        mcp_session.attach_stream(push_tx).await;

        let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
        bridge
            .authenticate("S1".into(), "T".into(), "o".into(), None, None, None, tx1)
            .await;

        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        bridge
            .authenticate("S2".into(), "T".into(), "o".into(), None, None, None, tx2)
            .await;

        let pushed = push_rx.recv().await.expect("expected a list_changed push");
        assert_eq!(pushed["method"], "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn close_drains_the_query_map() {
        let bridge = Bridge::new(BridgeConfig::default());
        bridge.queries.try_reserve("tok").await;
        bridge
            .queries
            .insert(Query {
                uuid: "q1".into(),
                session_id: "s1".into(),
                auth_token: "tok".into(),
                response_tool: None,
                tools: None,
                restrict_tools: false,
                state: tokio::sync::RwLock::new(QueryState::Active),
                tool_calls: tokio::sync::RwLock::new(Vec::new()),
            })
            .await;

        bridge.close(Vec::new()).await;
        assert!(bridge.queries.get("q1").await.is_none());
        assert_eq!(bridge.queries.in_flight("tok").await, 0);
    }
}
