//! MCP method handlers. Each takes the resolved target session set plus
//! request `_meta` and returns a `result`-shaped [`serde_json::Value`].
//! Soft errors are folded into that value by [`crate::mcp::result::SoftError`];
//! only [`MethodOutcome::Fatal`] escalates to a JSON-RPC error.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::ServerInfoConfig;
use crate::correlation::{CorrelationLayer, ResourceReadOutcome, ToolCallOutcome};
use crate::mcp::result::{wrap_call_tool_result, SoftError};
use crate::mcp::session::McpSessionTable;
use crate::mcp::wire::PROTOCOL_VERSION;
use crate::protocol::error_code;
use crate::query::QueryEngine;
use crate::session::FrontendSession;

/// Name of the synthetic tool every session set exposes.
pub const LIST_SESSIONS_TOOL: &str = "list_sessions";
/// URI of the synthetic resource every session set exposes.
pub const LIST_SESSIONS_RESOURCE: &str = "sessions://list";

/// Result of a method handler: either a `result` value to return as-is, or
/// a fatal error that the dispatcher must turn into a JSON-RPC error.
pub enum MethodOutcome {
    /// Return this value as the JSON-RPC `result`.
    Result(Value),
    /// Escalate to a JSON-RPC error response.
    Fatal(SoftError),
}

fn summarize_session(session: &Arc<FrontendSession>) -> Value {
    json!({
        "sessionId": session.session_id,
        "sessionName": session.session_name,
        "origin": session.origin,
        "pageTitle": session.page_title,
    })
}

/// Render the `list_sessions` tool result for a resolved session set.
pub async fn list_sessions_payload(sessions: &[Arc<FrontendSession>]) -> Value {
    let mut entries = Vec::with_capacity(sessions.len());
    for session in sessions {
        let mut entry = summarize_session(session);
        let tool_names: Vec<String> = session.tools.read().await.keys().cloned().collect();
        entry["tools"] = json!(tool_names);
        entries.push(entry);
    }
    json!({ "sessions": entries })
}

fn ambiguous_set_error(sessions: &[Arc<FrontendSession>]) -> Value {
    SoftError::new(error_code::SESSION_NOT_SPECIFIED, "multiple sessions matched; specify sessionId")
        .with_data(json!({ "available_sessions": sessions.iter().map(summarize_session).collect::<Vec<_>>() }))
        .to_result_value()
}

/// Resolve "pick one session": explicit `sessionId` in `_meta` takes
/// priority; otherwise a singleton set resolves implicitly.
fn resolve_one<'a>(
    sessions: &'a [Arc<FrontendSession>],
    requested_session_id: Option<&str>,
) -> Result<&'a Arc<FrontendSession>, ()> {
    if let Some(id) = requested_session_id {
        return sessions.iter().find(|s| s.session_id == id).ok_or(());
    }
    match sessions {
        [only] => Ok(only),
        _ => Err(()),
    }
}

/// `initialize` — create a new MCP session for `auth_token`.
pub async fn handle_initialize(
    mcp_sessions: &Arc<McpSessionTable>,
    auth_token: &str,
    server_info: &ServerInfoConfig,
) -> (Value, uuid::Uuid) {
    let session = mcp_sessions.create(auth_token.to_string()).await;
    let mut server_info_value = json!({
        "name": server_info.name,
        "description": server_info.description,
        "version": server_info.version,
    });
    if let Some(icon) = &server_info.icon_data_uri {
        server_info_value["icon"] = json!(icon);
    }
    let result = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true },
            "resources": {},
            "prompts": {},
        },
        "serverInfo": server_info_value,
    });
    (result, session.id)
}

/// `tools/list`
pub async fn handle_tools_list(sessions: &[Arc<FrontendSession>], requested_session_id: Option<&str>) -> Value {
    let list_sessions_tool = json!({
        "name": LIST_SESSIONS_TOOL,
        "description": "List all browser sessions with their available tools",
        "inputSchema": {"type": "object", "properties": {}},
    });

    if sessions.len() > 1 && requested_session_id.is_none() {
        let mut value = ambiguous_set_error(sessions);
        value["tools"] = json!([list_sessions_tool]);
        return value;
    }

    let mut tools = vec![list_sessions_tool];
    let target_sessions: Vec<&Arc<FrontendSession>> = match requested_session_id {
        Some(id) => sessions.iter().filter(|s| s.session_id == id).collect(),
        None => sessions.iter().collect(),
    };
    for session in target_sessions {
        for tool in session.tools.read().await.values() {
            let mut schema = tool
                .input_schema
                .clone()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            if let Some(obj) = schema.as_object_mut() {
                let properties = obj
                    .entry("properties")
                    .or_insert_with(|| json!({}));
                if let Some(props) = properties.as_object_mut() {
                    props.insert("session_id".into(), json!({"type": "string"}));
                }
            }
            let mut entry = json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": schema,
            });
            if let Some(meta) = &tool.meta {
                entry["_meta"] = meta.clone();
            }
            tools.push(entry);
        }
    }
    json!({ "tools": tools })
}

/// `tools/call`
#[allow(clippy::too_many_arguments)]
pub async fn handle_tools_call(
    sessions: &[Arc<FrontendSession>],
    correlation: &Arc<CorrelationLayer>,
    queries: &Arc<QueryEngine>,
    name: Option<&str>,
    arguments: Value,
    requested_session_id: Option<&str>,
    query_id: Option<&str>,
) -> Value {
    let Some(name) = name else {
        return SoftError::new(error_code::TOOL_NAME_REQUIRED, "name is required").to_result_value();
    };

    let mut query_ref = None;
    if let Some(query_id) = query_id {
        match queries.check_tool_call(query_id, name).await {
            Ok(query) => query_ref = Some(query),
            Err(err) => {
                let mut soft = SoftError::new(err.code, format!("query rejected tool call: {}", err.code));
                if let Some(allowed) = err.allowed_tools {
                    soft = soft.with_data(json!({"allowed_tools": allowed}));
                }
                return soft.to_result_value();
            }
        }
    }

    if name == LIST_SESSIONS_TOOL {
        return wrap_call_tool_result(&list_sessions_payload(sessions).await);
    }

    let session_id_from_args = arguments.get("session_id").and_then(Value::as_str);
    let requested = session_id_from_args.or(requested_session_id);
    let Ok(session) = resolve_one(sessions, requested) else {
        return if requested.is_some() {
            SoftError::new(error_code::SESSION_NOT_FOUND, "no session matches the given session_id")
                .to_result_value()
        } else {
            ambiguous_set_error(sessions)
        };
    };

    if !session.tools.read().await.contains_key(name) {
        let available: Vec<String> = session.tools.read().await.keys().cloned().collect();
        return SoftError::new(error_code::TOOL_NOT_FOUND, format!("tool '{name}' is not registered"))
            .with_data(json!({"available_tools": available}))
            .to_result_value();
    }

    let outcome = correlation
        .call_tool(session, name.to_string(), Some(arguments.clone()), query_id.map(str::to_string))
        .await;

    let (raw_result, is_error) = match outcome {
        ToolCallOutcome::Result(v) => {
            let is_error = v.as_object().map(|o| o.contains_key("error")).unwrap_or(false);
            (v, is_error)
        }
        ToolCallOutcome::Timeout => (json!({"error": "Tool call timeout"}), true),
        ToolCallOutcome::SessionNotAvailable => (json!({"error": "Session not available"}), true),
    };

    if let Some(query) = query_ref {
        if let Some(tool_calls) = queries
            .complete_tool_call(&query, name, arguments, raw_result.clone(), is_error)
            .await
        {
            let _ = session.send(crate::protocol::OutboundFrame::QueryComplete {
                uuid: query.uuid.clone(),
                message: None,
                tool_calls,
            });
        }
    }

    wrap_call_tool_result(&raw_result)
}

/// `resources/list`
pub async fn handle_resources_list(sessions: &[Arc<FrontendSession>], requested_session_id: Option<&str>) -> Value {
    let list_resource = json!({
        "uri": LIST_SESSIONS_RESOURCE,
        "name": "Session list",
        "description": "List all browser sessions",
        "mimeType": "application/json",
    });

    if sessions.len() > 1 && requested_session_id.is_none() {
        let mut value = ambiguous_set_error(sessions);
        value["resources"] = json!([list_resource]);
        return value;
    }

    let mut resources = vec![list_resource];
    let target_sessions: Vec<&Arc<FrontendSession>> = match requested_session_id {
        Some(id) => sessions.iter().filter(|s| s.session_id == id).collect(),
        None => sessions.iter().collect(),
    };
    for session in target_sessions {
        for resource in session.resources.read().await.values() {
            resources.push(json!({
                "uri": resource.uri,
                "name": resource.name,
                "description": resource.description,
                "mimeType": resource.mime_type,
            }));
        }
    }
    json!({ "resources": resources })
}

/// `resources/read`
pub async fn handle_resources_read(
    sessions: &[Arc<FrontendSession>],
    correlation: &Arc<CorrelationLayer>,
    uri: &str,
    requested_session_id: Option<&str>,
) -> Value {
    if uri == LIST_SESSIONS_RESOURCE {
        let payload = list_sessions_payload(sessions).await;
        return json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": serde_json::to_string_pretty(&payload).unwrap_or_default(),
            }]
        });
    }

    let owning_session = if let Some(id) = requested_session_id {
        sessions.iter().find(|s| s.session_id == id).cloned()
    } else {
        let mut found = None;
        for session in sessions {
            if session.resources.read().await.contains_key(uri) {
                found = Some(session.clone());
                break;
            }
        }
        found
    };

    let Some(session) = owning_session else {
        return SoftError::new(error_code::SESSION_NOT_FOUND, "resource not found").to_result_value();
    };

    let outcome = correlation.read_resource(&session, uri.to_string()).await;
    match outcome {
        ResourceReadOutcome::Text { content, mime_type } => json!({
            "contents": [{"uri": uri, "mimeType": mime_type, "text": content}]
        }),
        ResourceReadOutcome::Blob { blob, mime_type } => json!({
            "contents": [{"uri": uri, "mimeType": mime_type, "blob": blob}]
        }),
        ResourceReadOutcome::Error(error) => json!({"error": error}),
        ResourceReadOutcome::Timeout => json!({"error": "Resource read timeout"}),
        ResourceReadOutcome::SessionNotAvailable => json!({"error": "Session not available"}),
    }
}

/// `prompts/list`
pub async fn handle_prompts_list(sessions: &[Arc<FrontendSession>], requested_session_id: Option<&str>) -> Value {
    if sessions.len() > 1 && requested_session_id.is_none() {
        let mut value = ambiguous_set_error(sessions);
        value["prompts"] = json!([]);
        return value;
    }
    json!({ "prompts": [] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOverflowPolicy;
    use crate::protocol::ToolDefinition;
    use crate::session::SessionRegistry;

    async fn session_with_tool(registry: &SessionRegistry, id: &str, token: &str) -> Arc<FrontendSession> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        registry
            .authenticate(id.into(), token.into(), "o".into(), None, None, None, tx)
            .await;
        let session = registry.get(id).await.unwrap();
        registry
            .register_tool(
                id,
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: None,
                    output_schema: None,
                    meta: None,
                },
            )
            .await;
        session
    }

    #[tokio::test]
    async fn tools_list_single_session_includes_list_sessions_and_registered_tool() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let s1 = session_with_tool(&registry, "s1", "tok").await;
        let value = handle_tools_list(&[s1], None).await;
        let tools = value["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == LIST_SESSIONS_TOOL));
        assert!(tools.iter().any(|t| t["name"] == "echo"));
    }

    #[tokio::test]
    async fn tools_list_multi_session_without_selector_is_ambiguous() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let s1 = session_with_tool(&registry, "s1", "tok").await;
        let s2 = session_with_tool(&registry, "s2", "tok").await;
        let value = handle_tools_list(&[s1, s2], None).await;
        assert_eq!(value["isError"], true);
        assert_eq!(value["error"], error_code::SESSION_NOT_SPECIFIED);
        let tools = value["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn tools_call_reports_tool_not_found() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let s1 = session_with_tool(&registry, "s1", "tok").await;
        let scheduler = Arc::new(crate::scheduler::TokioScheduler::new());
        let correlation = Arc::new(CorrelationLayer::new(scheduler));
        let queries = Arc::new(QueryEngine::new(None));
        let value = handle_tools_call(
            &[s1],
            &correlation,
            &queries,
            Some("not_registered"),
            json!({}),
            None,
            None,
        )
        .await;
        assert_eq!(value["isError"], true);
        assert_eq!(value["error"], error_code::TOOL_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_call_list_sessions_returns_payload() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let s1 = session_with_tool(&registry, "s1", "tok").await;
        let scheduler = Arc::new(crate::scheduler::TokioScheduler::new());
        let correlation = Arc::new(CorrelationLayer::new(scheduler));
        let queries = Arc::new(QueryEngine::new(None));
        let value = handle_tools_call(
            &[s1],
            &correlation,
            &queries,
            Some(LIST_SESSIONS_TOOL),
            json!({}),
            None,
            None,
        )
        .await;
        let text = value["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("sessions"));
    }
}
