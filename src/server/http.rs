//! The HTTP surface: JSON-RPC POST, SSE push, agent callbacks, and the
//! ambient health/server-info routes.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::health;
use crate::mcp::dispatcher::{AuthSelector, McpSessionNotFound};
use crate::mcp::session::SSE_KEEPALIVE_MS;
use crate::mcp::wire::JsonRpcRequest;

/// Shared state handed to every HTTP handler.
pub struct HttpState {
    /// The bridge instance this router front-ends.
    pub bridge: Arc<Bridge>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn extract_token(headers: &HeaderMap, token_query: &TokenQuery) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    token_query.token.clone()
}

fn mcp_session_header(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Build the axum [`Router`] exposing the full HTTP surface described by
/// the MCP bridge contract.
pub fn build_router(bridge: Arc<Bridge>) -> Router {
    let state = Arc::new(HttpState { bridge });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static("mcp-session-id"),
        ]);

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/", get(server_info_handler).post(mcp_post_handler).delete(mcp_delete_handler))
        .route("/healthz", get(healthz_handler))
        .route("/query/{uuid}/progress", post(query_progress_handler))
        .route("/query/{uuid}/complete", put(query_complete_handler))
        .route("/query/{uuid}/fail", put(query_fail_handler))
        .route("/query/{uuid}/cancel", put(query_cancel_handler))
        .route("/ws", get(crate::server::ws::ws_handler))
        .route(
            "/{*rest}",
            get(mcp_get_handler).post(mcp_post_handler).delete(mcp_delete_handler),
        )
        .layer(SetRequestIdLayer::new(request_id_header.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `GET /` — unauthenticated server info.
async fn server_info_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let info = &state.bridge.config.server_info;
    let mut body = json!({
        "name": info.name,
        "description": info.description,
        "version": info.version,
    });
    if let Some(icon) = &info.icon_data_uri {
        body["icon"] = json!(icon);
    }
    Json(body)
}

/// `GET /healthz` — ambient liveness/readiness probe, no auth.
async fn healthz_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let status = health::run_health_checks(
        &state.bridge.sessions,
        &state.bridge.mcp_sessions,
        state.bridge.agent.is_configured(),
    )
    .await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// `GET` on any path: opens the SSE push channel for a known `Mcp-Session-Id`
/// when `Accept: text/event-stream` is set; otherwise not found.
#[instrument(skip(state, headers))]
async fn mcp_get_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    if !is_event_stream(&headers) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    }

    let Some(mcp_session_id) = mcp_session_header(&headers) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "MCP session not found"}))).into_response();
    };
    let Some(mcp_session) = state.bridge.mcp_sessions.get(mcp_session_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "MCP session not found"}))).into_response();
    };

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    mcp_session.attach_stream(tx).await;

    let stream = UnboundedReceiverStream::new(rx).map(|value| {
        Ok::<Event, Infallible>(Event::default().json_data(value).unwrap_or_else(|_| Event::default()))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_millis(SSE_KEEPALIVE_MS)))
        .into_response()
}

/// `POST` on any path: a JSON-RPC 2.0 request.
#[instrument(skip(state, headers, token_query, body))]
async fn mcp_post_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(token_query): Query<TokenQuery>,
    body: axum::body::Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid JSON-RPC request: {error}")})),
            )
                .into_response()
        }
    };

    let token = extract_token(&headers, &token_query);

    let meta = request.params.get("_meta");
    let query_id = meta.and_then(|m| m.get("queryId")).and_then(Value::as_str);

    let selector = match (query_id, token) {
        (Some(query_id), _) => AuthSelector::QueryId(query_id.to_string()),
        (None, Some(token)) => AuthSelector::Token(token),
        (None, None) => AuthSelector::Missing,
    };

    let mcp_session_id = mcp_session_header(&headers);

    match state.bridge.dispatcher.dispatch(request, selector, mcp_session_id).await {
        Ok(outcome) => {
            let mut response = Json(outcome.response).into_response();
            if let Some(new_id) = outcome.new_mcp_session_id {
                if let Ok(value) = new_id.to_string().parse() {
                    response.headers_mut().insert("Mcp-Session-Id", value);
                }
            } else if let Some(header) = headers.get("Mcp-Session-Id") {
                response.headers_mut().insert("Mcp-Session-Id", header.clone());
            }
            response
        }
        Err(McpSessionNotFound) => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "MCP session not found"}))).into_response()
        }
    }
}

/// `DELETE` on any path: tears down the MCP session named by `Mcp-Session-Id`.
#[instrument(skip(state, headers))]
async fn mcp_delete_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(mcp_session_id) = mcp_session_header(&headers) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "MCP session not found"}))).into_response();
    };
    match state.bridge.mcp_sessions.remove(mcp_session_id).await {
        Some(session) => {
            session.detach_stream().await;
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "MCP session not found"}))).into_response(),
    }
}

async fn query_progress_handler(
    State(state): State<Arc<HttpState>>,
    Path(uuid): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    if state.bridge.agent_query_progress(&uuid, payload).await {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "QueryNotFound"}))).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
struct CompleteBody {
    message: Option<Value>,
}

async fn query_complete_handler(
    State(state): State<Arc<HttpState>>,
    Path(uuid): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let parsed: CompleteBody = if body.is_empty() {
        CompleteBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };
    match state.bridge.agent_query_complete(&uuid, parsed.message).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(crate::query::CompleteError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": crate::protocol::error_code::QUERY_NOT_FOUND})),
        )
            .into_response(),
        Err(crate::query::CompleteError::ResponseToolDeclared) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": crate::protocol::error_code::QUERY_COMPLETE_NOT_ALLOWED})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct FailBody {
    #[serde(default)]
    error: String,
}

async fn query_fail_handler(
    State(state): State<Arc<HttpState>>,
    Path(uuid): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let parsed: FailBody = if body.is_empty() {
        FailBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };
    match state.bridge.agent_query_fail(&uuid, parsed.error).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(code) => (StatusCode::NOT_FOUND, Json(json!({"error": code}))).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct CancelBody {
    reason: Option<String>,
}

async fn query_cancel_handler(
    State(state): State<Arc<HttpState>>,
    Path(uuid): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let parsed: CancelBody = if body.is_empty() {
        CancelBody::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };
    match state.bridge.agent_query_cancel(&uuid, parsed.reason).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(code) => (StatusCode::NOT_FOUND, Json(json!({"error": code}))).into_response(),
    }
}
