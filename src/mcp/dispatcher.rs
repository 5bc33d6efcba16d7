//! Dispatch of JSON-RPC requests across the resolved frontend session set.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::ServerInfoConfig;
use crate::correlation::CorrelationLayer;
use crate::mcp::methods;
use crate::mcp::result::SoftError;
use crate::mcp::session::McpSessionTable;
use crate::mcp::wire::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::error_code;
use crate::query::QueryEngine;
use crate::session::{FrontendSession, SessionRegistry};

/// How the caller identified themselves on a POST.
pub enum AuthSelector {
    /// `_meta.queryId` was present — the target session set is the query's
    /// single owning session.
    QueryId(String),
    /// A bearer token or `?token=` was present.
    Token(String),
    /// Neither was present.
    Missing,
}

/// Result of dispatching one JSON-RPC POST.
pub struct DispatchOutcome {
    /// The JSON-RPC response to send.
    pub response: JsonRpcResponse,
    /// Set only by a successful `initialize` call.
    pub new_mcp_session_id: Option<Uuid>,
}

/// Error produced before a method handler could even run — a 404-worthy
/// condition at the HTTP layer, not a JSON-RPC error payload.
pub struct McpSessionNotFound;

/// Dispatches JSON-RPC requests across sessions, queries, and MCP sessions.
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    mcp_sessions: Arc<McpSessionTable>,
    queries: Arc<QueryEngine>,
    correlation: Arc<CorrelationLayer>,
    server_info: ServerInfoConfig,
}

impl Dispatcher {
    /// Construct a dispatcher over the given shared state.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionRegistry>,
        mcp_sessions: Arc<McpSessionTable>,
        queries: Arc<QueryEngine>,
        correlation: Arc<CorrelationLayer>,
        server_info: ServerInfoConfig,
    ) -> Self {
        Self {
            sessions,
            mcp_sessions,
            queries,
            correlation,
            server_info,
        }
    }

    /// Resolve the target session set for a POST: by query id if the request
    /// correlates to an active query, else by explicit session id, else by
    /// the unique session for the auth token.
    async fn resolve_sessions(&self, selector: &AuthSelector) -> Result<Vec<Arc<FrontendSession>>, JsonRpcError> {
        let sessions = match selector {
            AuthSelector::QueryId(query_id) => {
                let Some(query) = self.queries.get(query_id).await else {
                    return Err(
                        JsonRpcError::new(error_codes::INVALID_REQUEST, "query not found")
                            .with_data(serde_json::json!({"code": error_code::QUERY_NOT_FOUND})),
                    );
                };
                if *query.state.read().await != crate::query::QueryState::Active {
                    return Err(
                        JsonRpcError::new(error_codes::INVALID_REQUEST, "query is not active")
                            .with_data(serde_json::json!({"code": error_code::QUERY_NOT_ACTIVE})),
                    );
                }
                match self.sessions.get(&query.session_id).await {
                    Some(session) => vec![session],
                    None => vec![],
                }
            }
            AuthSelector::Token(token) => self.sessions.by_token(token).await,
            AuthSelector::Missing => {
                return Err(JsonRpcError::new(
                    error_codes::INVALID_REQUEST,
                    error_code::MISSING_AUTHENTICATION,
                ));
            }
        };

        if sessions.is_empty() {
            return Err(JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                error_code::NO_SESSIONS_FOUND,
            ));
        }
        Ok(sessions)
    }

    /// Dispatch one parsed JSON-RPC request.
    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        selector: AuthSelector,
        mcp_session_id: Option<Uuid>,
    ) -> Result<DispatchOutcome, McpSessionNotFound> {
        let id = request.id.clone().unwrap_or(Value::Null);

        if request.method == "initialize" {
            let auth_token = match &selector {
                AuthSelector::Token(token) => token.clone(),
                AuthSelector::QueryId(_) | AuthSelector::Missing => {
                    let error = JsonRpcError::new(error_codes::INVALID_REQUEST, error_code::MISSING_AUTHENTICATION);
                    return Ok(DispatchOutcome {
                        response: JsonRpcResponse::failure(id, error),
                        new_mcp_session_id: None,
                    });
                }
            };
            let (result, new_id) = methods::handle_initialize(&self.mcp_sessions, &auth_token, &self.server_info).await;
            return Ok(DispatchOutcome {
                response: JsonRpcResponse::success(id, result),
                new_mcp_session_id: Some(new_id),
            });
        }

        if let Some(mcp_id) = mcp_session_id {
            match self.mcp_sessions.get(mcp_id).await {
                Some(session) => session.touch().await,
                None => return Err(McpSessionNotFound),
            }
        }

        if request.method == "notifications/initialized" {
            return Ok(DispatchOutcome {
                response: JsonRpcResponse::success(id, Value::Null),
                new_mcp_session_id: None,
            });
        }

        let sessions = match self.resolve_sessions(&selector).await {
            Ok(sessions) => sessions,
            Err(error) => {
                return Ok(DispatchOutcome {
                    response: JsonRpcResponse::failure(id, error),
                    new_mcp_session_id: None,
                })
            }
        };

        let meta = request.params.get("_meta").cloned().unwrap_or(Value::Null);
        let requested_session_id = meta.get("sessionId").and_then(Value::as_str).map(str::to_string);
        let query_id = meta.get("queryId").and_then(Value::as_str).map(str::to_string);

        let result = match request.method.as_str() {
            "tools/list" => {
                methods::handle_tools_list(&sessions, requested_session_id.as_deref()).await
            }
            "tools/call" => {
                let name = request.params.get("name").and_then(Value::as_str).map(str::to_string);
                let arguments = request.params.get("arguments").cloned().unwrap_or(Value::Null);
                methods::handle_tools_call(
                    &sessions,
                    &self.correlation,
                    &self.queries,
                    name.as_deref(),
                    arguments,
                    requested_session_id.as_deref(),
                    query_id.as_deref(),
                )
                .await
            }
            "resources/list" => {
                methods::handle_resources_list(&sessions, requested_session_id.as_deref()).await
            }
            "resources/read" => match request.params.get("uri").and_then(Value::as_str) {
                Some(uri) => {
                    methods::handle_resources_read(&sessions, &self.correlation, uri, requested_session_id.as_deref())
                        .await
                }
                None => SoftError::new(error_code::TOOL_NAME_REQUIRED, "uri is required").to_result_value(),
            },
            "prompts/list" => {
                methods::handle_prompts_list(&sessions, requested_session_id.as_deref()).await
            }
            _ => {
                let error = JsonRpcError::new(error_codes::METHOD_NOT_FOUND, error_code::UNKNOWN_METHOD);
                return Ok(DispatchOutcome {
                    response: JsonRpcResponse::failure(id, error),
                    new_mcp_session_id: None,
                });
            }
        };

        if result.get("error_is_fatal").and_then(Value::as_bool) == Some(true) {
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            let error = JsonRpcError::new(error_codes::INVALID_PARAMS, message).with_data(result);
            return Ok(DispatchOutcome {
                response: JsonRpcResponse::failure(id, error),
                new_mcp_session_id: None,
            });
        }

        Ok(DispatchOutcome {
            response: JsonRpcResponse::success(id, result),
            new_mcp_session_id: None,
        })
    }

    /// Notify every MCP session sharing `auth_token` that the tool list
    /// changed for one of its frontend sessions.
    pub async fn notify_tools_list_changed(&self, auth_token: &str) {
        for mcp_session in self.mcp_sessions.by_token(auth_token).await {
            mcp_session
                .push(serde_json::json!({"method": "notifications/tools/list_changed"}))
                .await;
        }
    }
}
