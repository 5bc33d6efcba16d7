//! JSON-RPC 2.0 wire types for the MCP HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A parsed JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    #[serde(default, rename = "jsonrpc")]
    pub jsonrpc: Option<String>,
    /// Request id, echoed back on the response. Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name, e.g. `"tools/call"`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response (success or error).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Echoes the request id.
    pub id: Value,
    /// Result payload, present only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload, present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Negative integer error code (see [`error_codes`]).
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error with no `data` payload.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a structured `data` payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Named JSON-RPC error codes used across the dispatcher.
pub mod error_codes {
    /// Standard JSON-RPC "invalid request" (missing/ambiguous auth).
    pub const INVALID_REQUEST: i32 = -32600;
    /// Standard JSON-RPC "method not found".
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Standard JSON-RPC "invalid params" — used for fatal request errors
    /// (`error_is_fatal: true`) surfaced from a method handler.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Standard JSON-RPC "internal error".
    pub const INTERNAL_ERROR: i32 = -32603;
}
