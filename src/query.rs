//! Query engine: tracks agent-mediated, multi-turn queries initiated by a
//! frontend and mediated by an external agent over HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::protocol::{error_code, RecordedToolCall};

/// Terminal and non-terminal states of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Accepted by the agent and awaiting progress/completion.
    Active,
    /// Completed successfully. Terminal.
    Completed,
    /// Failed. Terminal.
    Failed,
    /// Cancelled by the frontend or the agent. Terminal.
    Cancelled,
}

impl QueryState {
    /// `true` for any terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, QueryState::Active)
    }
}

/// A single agent-mediated query.
pub struct Query {
    /// Client-chosen query id.
    pub uuid: String,
    /// Frontend session that owns this query.
    pub session_id: String,
    /// Auth token of the owning session, used to decrement the in-flight
    /// counter on every terminal transition.
    pub auth_token: String,
    /// Tool whose successful invocation auto-completes the query.
    pub response_tool: Option<String>,
    /// Allow-list of tool names, enforced only if `restrict_tools` is set.
    pub tools: Option<Vec<String>>,
    /// Whether `tools` is enforced as an allow-list.
    pub restrict_tools: bool,
    /// Current state.
    pub state: RwLock<QueryState>,
    /// Tool invocations recorded under this query, in call order.
    pub tool_calls: RwLock<Vec<RecordedToolCall>>,
}

/// Soft, data-shaped error for a tool call attributed to a query.
#[derive(Debug, Clone)]
pub struct QueryToolError {
    /// Named error code (see [`error_code`]).
    pub code: &'static str,
    /// Tools the query actually allows, when the error is `ToolNotAllowed`.
    pub allowed_tools: Option<Vec<String>>,
}

/// Failure modes of an explicit `/complete` agent callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteError {
    /// No such query.
    NotFound,
    /// The query declared a `response_tool`; completion must come through
    /// tool-call auto-completion instead of an explicit `/complete`.
    ResponseToolDeclared,
}

/// Outcome of recording a tool call under a query.
pub enum RecordOutcome {
    /// The call is permitted; append it once the result is known via
    /// [`QueryEngine::complete_tool_call`].
    Allowed,
    /// The call is rejected; surface `error` as a soft error.
    Rejected(QueryToolError),
}

/// Engine owning every live [`Query`] and the per-token in-flight counters.
pub struct QueryEngine {
    queries: RwLock<HashMap<String, Arc<Query>>>,
    in_flight_by_token: RwLock<HashMap<String, usize>>,
    max_in_flight_per_token: Option<usize>,
}

impl QueryEngine {
    /// Construct an empty engine with the given in-flight cap.
    #[must_use]
    pub fn new(max_in_flight_per_token: Option<usize>) -> Self {
        Self {
            queries: RwLock::new(HashMap::new()),
            in_flight_by_token: RwLock::new(HashMap::new()),
            max_in_flight_per_token,
        }
    }

    /// Attempt to reserve a slot for a new query under `auth_token`. On
    /// success the in-flight counter is incremented immediately; callers
    /// MUST call [`QueryEngine::abort`] if the subsequent PUT to the agent
    /// fails, to keep the counter accurate.
    pub async fn try_reserve(&self, auth_token: &str) -> bool {
        let mut counts = self.in_flight_by_token.write().await;
        let count = counts.entry(auth_token.to_string()).or_insert(0);
        if let Some(max) = self.max_in_flight_per_token {
            if *count >= max {
                return false;
            }
        }
        *count += 1;
        true
    }

    /// Insert a reserved query as `active`.
    pub async fn insert(&self, query: Query) -> Arc<Query> {
        let query = Arc::new(query);
        self.queries.write().await.insert(query.uuid.clone(), query.clone());
        query
    }

    /// Roll back a reservation without ever inserting a query (agent PUT
    /// failed, or the frontend message was otherwise invalid).
    pub async fn abort(&self, auth_token: &str) {
        self.decrement(auth_token).await;
    }

    async fn decrement(&self, auth_token: &str) {
        let mut counts = self.in_flight_by_token.write().await;
        if let Some(count) = counts.get_mut(auth_token) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(auth_token);
            }
        }
    }

    /// Look up a query by id.
    pub async fn get(&self, uuid: &str) -> Option<Arc<Query>> {
        self.queries.read().await.get(uuid).cloned()
    }

    /// Current in-flight count for a token. Exposed for tests/health.
    pub async fn in_flight(&self, auth_token: &str) -> usize {
        self.in_flight_by_token
            .read()
            .await
            .get(auth_token)
            .copied()
            .unwrap_or(0)
    }

    /// Validate a `tools/call` attributed to `query_id` against its
    /// allow-list and active state.
    pub async fn check_tool_call(&self, uuid: &str, tool_name: &str) -> Result<Arc<Query>, QueryToolError> {
        let Some(query) = self.get(uuid).await else {
            return Err(QueryToolError {
                code: error_code::QUERY_NOT_FOUND,
                allowed_tools: None,
            });
        };
        if *query.state.read().await != QueryState::Active {
            return Err(QueryToolError {
                code: error_code::QUERY_NOT_ACTIVE,
                allowed_tools: None,
            });
        }
        if query.restrict_tools {
            if let Some(allowed) = &query.tools {
                if !allowed.iter().any(|t| t == tool_name) {
                    return Err(QueryToolError {
                        code: error_code::TOOL_NOT_ALLOWED,
                        allowed_tools: Some(allowed.clone()),
                    });
                }
            }
        }
        Ok(query)
    }

    /// Record a completed tool call under `query`. Returns `Some(..)` with
    /// the accumulated tool-call log if this call should auto-complete the
    /// query (its `response_tool` matched and the result was not an error
    /// object).
    pub async fn complete_tool_call(
        &self,
        query: &Arc<Query>,
        tool_name: &str,
        arguments: Value,
        result: Value,
        result_is_error: bool,
    ) -> Option<Vec<RecordedToolCall>> {
        query.tool_calls.write().await.push(RecordedToolCall {
            tool: tool_name.to_string(),
            arguments,
            result,
        });

        let auto_complete = query.response_tool.as_deref() == Some(tool_name) && !result_is_error;
        if auto_complete {
            *query.state.write().await = QueryState::Completed;
            let calls = query.tool_calls.read().await.clone();
            self.remove(&query.uuid).await;
            Some(calls)
        } else {
            None
        }
    }

    /// Transition `uuid` to `Completed` via an explicit agent callback.
    /// Fails if the query declared a `response_tool` (protocol violation —
    /// completion must come through tool-call auto-completion in that case).
    pub async fn complete(&self, uuid: &str) -> Result<Vec<RecordedToolCall>, CompleteError> {
        let Some(query) = self.get(uuid).await else {
            return Err(CompleteError::NotFound);
        };
        if query.response_tool.is_some() {
            self.remove(uuid).await;
            return Err(CompleteError::ResponseToolDeclared);
        }
        *query.state.write().await = QueryState::Completed;
        let calls = query.tool_calls.read().await.clone();
        self.remove(uuid).await;
        Ok(calls)
    }

    /// Transition `uuid` to `Failed`.
    pub async fn fail(&self, uuid: &str) -> Result<(), &'static str> {
        let Some(_query) = self.get(uuid).await else {
            return Err(error_code::QUERY_NOT_FOUND);
        };
        self.remove(uuid).await;
        Ok(())
    }

    /// Transition `uuid` to `Cancelled`, whether initiated by the frontend
    /// or the agent.
    pub async fn cancel(&self, uuid: &str) -> Result<(), &'static str> {
        let Some(_query) = self.get(uuid).await else {
            return Err(error_code::QUERY_NOT_FOUND);
        };
        self.remove(uuid).await;
        Ok(())
    }

    async fn remove(&self, uuid: &str) {
        if let Some(query) = self.queries.write().await.remove(uuid) {
            self.decrement(&query.auth_token).await;
        }
    }

    /// Remove every query owned by `session_id`, decrementing their token's
    /// in-flight count. Called when a frontend session dies, to preserve
    /// invariants 3 and 4.
    pub async fn remove_for_session(&self, session_id: &str, auth_token: &str) {
        let dead: Vec<String> = {
            let queries = self.queries.read().await;
            queries
                .values()
                .filter(|q| q.session_id == session_id)
                .map(|q| q.uuid.clone())
                .collect()
        };
        for uuid in dead {
            self.queries.write().await.remove(&uuid);
            self.decrement(auth_token).await;
        }
    }

    /// Remove every query and reset all in-flight counters. Used on shutdown.
    pub async fn clear(&self) {
        self.queries.write().await.clear();
        self.in_flight_by_token.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_query(uuid: &str, session_id: &str) -> Query {
        Query {
            uuid: uuid.to_string(),
            session_id: session_id.to_string(),
            auth_token: "tok".to_string(),
            response_tool: None,
            tools: None,
            restrict_tools: false,
            state: RwLock::new(QueryState::Active),
            tool_calls: RwLock::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn reserve_respects_cap() {
        let engine = QueryEngine::new(Some(1));
        assert!(engine.try_reserve("tok").await);
        assert!(!engine.try_reserve("tok").await);
    }

    #[tokio::test]
    async fn abort_frees_the_reservation() {
        let engine = QueryEngine::new(Some(1));
        assert!(engine.try_reserve("tok").await);
        engine.abort("tok").await;
        assert!(engine.try_reserve("tok").await);
    }

    #[tokio::test]
    async fn check_tool_call_enforces_allow_list() {
        let engine = QueryEngine::new(None);
        let mut q = new_query("q1", "s1");
        q.restrict_tools = true;
        q.tools = Some(vec!["search".into()]);
        engine.insert(q).await;

        let err = engine.check_tool_call("q1", "delete_everything").await.unwrap_err();
        assert_eq!(err.code, error_code::TOOL_NOT_ALLOWED);
        assert_eq!(err.allowed_tools, Some(vec!["search".to_string()]));

        assert!(engine.check_tool_call("q1", "search").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_query_is_not_found() {
        let engine = QueryEngine::new(None);
        let err = engine.check_tool_call("missing", "search").await.unwrap_err();
        assert_eq!(err.code, error_code::QUERY_NOT_FOUND);
    }

    #[tokio::test]
    async fn response_tool_success_auto_completes() {
        let engine = QueryEngine::new(None);
        let mut q = new_query("q1", "s1");
        q.response_tool = Some("final_answer".into());
        let query = engine.insert(q).await;

        let result = engine
            .complete_tool_call(&query, "final_answer", serde_json::json!({}), serde_json::json!("done"), false)
            .await;
        assert!(result.is_some());
        assert!(engine.get("q1").await.is_none());
    }

    #[tokio::test]
    async fn response_tool_error_keeps_query_active() {
        let engine = QueryEngine::new(None);
        let mut q = new_query("q1", "s1");
        q.response_tool = Some("final_answer".into());
        let query = engine.insert(q).await;

        let result = engine
            .complete_tool_call(
                &query,
                "final_answer",
                serde_json::json!({}),
                serde_json::json!({"error": "bad input"}),
                true,
            )
            .await;
        assert!(result.is_none());
        assert!(engine.get("q1").await.is_some());
    }

    #[tokio::test]
    async fn explicit_complete_rejected_when_response_tool_declared() {
        let engine = QueryEngine::new(None);
        let mut q = new_query("q1", "s1");
        q.response_tool = Some("final_answer".into());
        engine.insert(q).await;

        assert!(engine.complete("q1").await.is_err());
        assert!(engine.get("q1").await.is_none());
    }

    #[tokio::test]
    async fn remove_for_session_clears_owned_queries() {
        let engine = QueryEngine::new(None);
        engine.try_reserve("tok").await;
        engine.insert(new_query("q1", "s1")).await;
        engine.try_reserve("tok").await;
        engine.insert(new_query("q2", "s1")).await;
        engine.try_reserve("tok").await;
        engine.insert(new_query("q3", "s2")).await;

        engine.remove_for_session("s1", "tok").await;
        assert!(engine.get("q1").await.is_none());
        assert!(engine.get("q2").await.is_none());
        assert!(engine.get("q3").await.is_some());
        assert_eq!(engine.in_flight("tok").await, 1);
    }
}
