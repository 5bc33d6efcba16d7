//! Frontend socket protocol types.
//!
//! Implements the wire format for the duplex socket connecting a browser
//! frontend to the bridge. Only the frame shapes needed to drive the
//! session/query state machines are modelled; tool/resource payloads carry
//! opaque `serde_json::Value` bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close codes used when the bridge terminates a frontend socket.
pub mod close_code {
    /// Graceful server shutdown.
    pub const SHUTDOWN: u16 = 1000;
    /// Frame was not valid JSON.
    pub const INVALID_JSON: u16 = 1003;
    /// Policy violation (missing session key, cap exceeded, name conflict,
    /// idle expiry, rejected connect).
    pub const POLICY: u16 = 1008;
}

/// Named error codes surfaced in soft-error payloads and socket frames.
pub mod error_code {
    /// Session cap for the token was already at its limit.
    pub const SESSION_LIMIT_EXCEEDED: &str = "SessionLimitExceeded";
    /// `sessionName` collided with an existing session under the same token.
    pub const SESSION_NAME_ALREADY_IN_USE: &str = "SessionNameAlreadyInUse";
    /// Session exceeded `session_max_duration_ms`.
    pub const SESSION_EXPIRED: &str = "SessionExpired";
    /// No session matches the requested id.
    pub const SESSION_NOT_FOUND: &str = "SessionNotFound";
    /// More than one session matched and none was specified.
    pub const SESSION_NOT_SPECIFIED: &str = "SessionNotSpecified";
    /// Query id unknown.
    pub const QUERY_NOT_FOUND: &str = "QueryNotFound";
    /// Query exists but is not in the `active` state.
    pub const QUERY_NOT_ACTIVE: &str = "QueryNotActive";
    /// Explicit `/complete` called on a query that declared a `responseTool`.
    pub const QUERY_COMPLETE_NOT_ALLOWED: &str = "QueryCompleteNotAllowed";
    /// Token was already at its in-flight query cap.
    pub const QUERY_LIMIT_EXCEEDED: &str = "QueryLimitExceeded";
    /// `tools/call` arrived without a `name`.
    pub const TOOL_NAME_REQUIRED: &str = "ToolNameRequired";
    /// Named tool is not registered on the resolved session.
    pub const TOOL_NOT_FOUND: &str = "ToolNotFound";
    /// Tool is not in the query's allow-list.
    pub const TOOL_NOT_ALLOWED: &str = "ToolNotAllowed";
    /// Auth token missing from an HTTP request.
    pub const MISSING_AUTHENTICATION: &str = "MissingAuthentication";
    /// No sessions matched the resolved auth token.
    pub const NO_SESSIONS_FOUND: &str = "NoSessionsFound";
    /// Unknown JSON-RPC method.
    pub const UNKNOWN_METHOD: &str = "UnknownMethod";
    /// Unexpected internal fault.
    pub const INTERNAL: &str = "Internal";
}

/// A tool registration sent by the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name within the owning session.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for tool input, if any.
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// JSON schema for tool output, if any.
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Opaque metadata passed through unchanged.
    #[serde(default, rename = "_meta")]
    pub meta: Option<Value>,
}

/// A resource registration sent by the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique URI within the owning session.
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// MIME type of the resource content.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Frames sent by the frontend to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundFrame {
    /// Authenticate a new socket connection.
    Authenticate {
        /// Session id supplied in the connect URL.
        session_id: String,
        /// Opaque bearer token identifying the owner.
        auth_token: String,
        /// Page origin reported by the browser.
        origin: String,
        /// Optional human-readable page title.
        #[serde(default)]
        page_title: Option<String>,
        /// Optional unique-per-token session name.
        #[serde(default)]
        session_name: Option<String>,
        /// Optional browser user agent string.
        #[serde(default)]
        user_agent: Option<String>,
        /// Client-reported connect timestamp (ms since epoch).
        timestamp: i64,
    },
    /// Register or update a tool definition.
    RegisterTool {
        /// The tool being registered.
        tool: ToolDefinition,
    },
    /// Register or update a resource definition.
    RegisterResource {
        /// The resource being registered.
        resource: ResourceDefinition,
    },
    /// Heartbeat/liveness update.
    Activity {
        /// Client-reported activity timestamp (ms since epoch).
        timestamp: i64,
    },
    /// Reply to a previously emitted `tool-call` frame.
    ToolResponse {
        /// Correlates with the originating `tool-call` `request_id`.
        request_id: String,
        /// Raw tool result value.
        result: Value,
    },
    /// Reply to a previously emitted `resource-read` frame.
    ResourceResponse {
        /// Correlates with the originating `resource-read` `request_id`.
        request_id: String,
        /// Text content, if the resource is textual.
        #[serde(default)]
        content: Option<String>,
        /// Base64-encoded content, if the resource is binary.
        #[serde(default)]
        blob: Option<String>,
        /// MIME type of the content.
        #[serde(default)]
        mime_type: Option<String>,
        /// Error description, if the read failed on the frontend side.
        #[serde(default)]
        error: Option<String>,
    },
    /// Create an agent-mediated query.
    Query {
        /// Client-chosen query identifier.
        uuid: String,
        /// Tool whose successful invocation auto-completes the query.
        #[serde(default)]
        response_tool: Option<String>,
        /// Allow-list of tool names, if `restrict_tools` is set.
        #[serde(default)]
        tools: Option<Vec<String>>,
        /// Whether `tools` is enforced as an allow-list.
        #[serde(default)]
        restrict_tools: bool,
        /// Opaque prompt/context payload forwarded to the agent verbatim.
        #[serde(flatten)]
        payload: Value,
    },
    /// Cancel a previously created query.
    QueryCancel {
        /// Query identifier to cancel.
        uuid: String,
        /// Optional human-readable reason.
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Frames sent by the bridge to the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundFrame {
    /// Authentication succeeded.
    Authenticated {
        /// The now-registered session id.
        session_id: String,
        /// Always `true`; kept for wire-shape symmetry with the failure frame.
        success: bool,
    },
    /// Authentication failed.
    AuthenticationFailed {
        /// Human-readable failure reason.
        error: String,
        /// Named error code (see [`error_code`]).
        code: String,
    },
    /// Request the frontend invoke a registered tool.
    ToolCall {
        /// Id the frontend must echo back in its `tool-response`.
        request_id: String,
        /// Name of the tool to invoke.
        tool_name: String,
        /// Arguments for the tool, if any.
        #[serde(default)]
        tool_input: Option<Value>,
        /// Query this call is attributed to, if any.
        #[serde(default)]
        query_id: Option<String>,
    },
    /// Request the frontend read a registered resource.
    ResourceRead {
        /// Id the frontend must echo back in its `resource-response`.
        request_id: String,
        /// URI of the resource to read.
        uri: String,
    },
    /// The bridge accepted and created a query.
    QueryAccepted {
        /// The query id.
        uuid: String,
    },
    /// Progress update forwarded from the agent.
    QueryProgress {
        /// The query id.
        uuid: String,
        /// Opaque progress payload.
        #[serde(flatten)]
        payload: Value,
    },
    /// The query completed successfully.
    QueryComplete {
        /// The query id.
        uuid: String,
        /// Final message, absent when completion came via a response tool.
        #[serde(default)]
        message: Option<Value>,
        /// Every tool call recorded against this query.
        tool_calls: Vec<RecordedToolCall>,
    },
    /// The query failed.
    QueryFailure {
        /// The query id.
        uuid: String,
        /// Human-readable failure reason.
        error: String,
        /// Named error code, if applicable.
        #[serde(default)]
        code: Option<String>,
    },
    /// The query was cancelled.
    QueryCancel {
        /// The query id.
        uuid: String,
        /// Optional human-readable reason.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The bridge evicted or rejected this session under cap pressure.
    SessionClosed {
        /// Human-readable reason.
        reason: String,
        /// Always [`error_code::SESSION_LIMIT_EXCEEDED`].
        code: String,
    },
    /// The bridge closed this session for exceeding its idle/max duration.
    SessionExpired {
        /// Always [`error_code::SESSION_EXPIRED`].
        code: String,
    },
}

/// One recorded tool invocation under a query, included in `query_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedToolCall {
    /// Tool name invoked.
    pub tool: String,
    /// Arguments passed.
    pub arguments: Value,
    /// Raw result returned.
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_roundtrip() {
        let frame = InboundFrame::Authenticate {
            session_id: "s1".into(),
            auth_token: "tok".into(),
            origin: "https://example.com".into(),
            page_title: Some("Demo".into()),
            session_name: None,
            user_agent: None,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"authenticate\""));
        let restored: InboundFrame = serde_json::from_str(&json).unwrap();
        match restored {
            InboundFrame::Authenticate { session_id, .. } => assert_eq!(session_id, "s1"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn tool_call_roundtrip() {
        let frame = OutboundFrame::ToolCall {
            request_id: "r1".into(),
            tool_name: "get_weather".into(),
            tool_input: Some(serde_json::json!({"city": "nyc"})),
            query_id: Some("q1".into()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let restored: OutboundFrame = serde_json::from_str(&json).unwrap();
        match restored {
            OutboundFrame::ToolCall { tool_name, .. } => assert_eq!(tool_name, "get_weather"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn query_cancel_minimal() {
        let json = r#"{"type":"query_cancel","uuid":"q1"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::QueryCancel { uuid, reason } => {
                assert_eq!(uuid, "q1");
                assert!(reason.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn session_closed_code_constant() {
        let frame = OutboundFrame::SessionClosed {
            reason: "cap exceeded".into(),
            code: error_code::SESSION_LIMIT_EXCEEDED.into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["code"], "SessionLimitExceeded");
    }
}
