//! `CallToolResult` wrapping and the soft-error payload shape.

use serde_json::{json, Value};

/// A protocol-level outcome that is neither a crash nor success — unknown
/// tool, ambiguous session, disallowed tool, and similar. Carried inside a
/// JSON-RPC `result` with `isError: true`, never as a `BridgeError`.
#[derive(Debug, Clone)]
pub struct SoftError {
    /// Named error code, e.g. `ToolNotFound`.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Extra discovery data merged into the result object
    /// (`available_sessions`, `available_tools`, `allowed_tools`, ...).
    pub data: Value,
    /// When `true`, the dispatcher surfaces this as a JSON-RPC error
    /// instead of a soft `result` payload.
    pub fatal: bool,
}

impl SoftError {
    /// Build a non-fatal soft error with no extra data.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: json!({}),
            fatal: false,
        }
    }

    /// Attach discovery data, merged into the soft-error result object.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Mark this error fatal: the dispatcher turns it into a JSON-RPC error.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Render as a `result`-shaped JSON value (`isError: true`).
    #[must_use]
    pub fn to_result_value(&self) -> Value {
        let mut obj = json!({
            "isError": true,
            "error": self.code,
            "error_message": self.message,
            "error_is_fatal": self.fatal,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut obj, &self.data) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        obj
    }
}

/// Wrap a raw tool result (as returned by the frontend) into MCP's
/// `CallToolResult` shape, per the wrapping decision table.
#[must_use]
pub fn wrap_call_tool_result(result: &Value) -> Value {
    if result.is_null() {
        return json!({"content": [{"type": "text", "text": ""}]});
    }

    if let Some(obj) = result.as_object() {
        if obj.contains_key("error") {
            return json!({
                "content": [{"type": "text", "text": to_pretty(result)}],
                "isError": true,
            });
        }
    }

    if let Some(s) = result.as_str() {
        if let Some((mime_type, data)) = extract_data_url(s) {
            return json!({"content": [{"type": "image", "data": data, "mimeType": mime_type}]});
        }
    }

    if let Some(obj) = result.as_object() {
        if let Some(data_url) = obj.get("dataUrl").and_then(Value::as_str) {
            if let Some((mime_type, data)) = extract_data_url(data_url) {
                return json!({"content": [{"type": "image", "data": data, "mimeType": mime_type}]});
            }
        }
    }

    if let Some(obj) = result.as_object() {
        if let Some(meta) = obj.get("_meta") {
            let mut rest = obj.clone();
            rest.remove("_meta");
            let text = to_pretty(&Value::Object(rest));
            return json!({
                "content": [{"type": "text", "text": text}],
                "_meta": meta,
            });
        }
    }

    let text = if result.is_object() || result.is_array() {
        to_pretty(result)
    } else {
        plain_string(result)
    };
    json!({"content": [{"type": "text", "text": text}]})
}

fn to_pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

fn plain_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split a `data:image/...;base64,XXXX` URI into `(mimeType, base64data)`.
fn extract_data_url(s: &str) -> Option<(String, String)> {
    if !s.starts_with("data:image/") {
        return None;
    }
    let rest = &s["data:".len()..];
    let (mime_type, payload) = rest.split_once(';')?;
    let (_encoding, data) = payload.split_once(',')?;
    Some((mime_type.to_string(), data.to_string()))
}
