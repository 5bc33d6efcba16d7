//! Per-request correlation for tool calls and resource reads.
//!
//! Mints a `requestId` for each outbound `tool-call`/`resource-read` frame,
//! parks a one-shot reply handler for it, and times it out after a fixed
//! window if the frontend never answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::scheduler::{Scheduler, TimerId};
use crate::session::FrontendSession;

/// Fixed per-request timeout. Deliberately not configurable.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Outcome of a correlated tool call.
#[derive(Debug, Clone)]
pub enum ToolCallOutcome {
    /// The frontend replied with a result value.
    Result(Value),
    /// No reply arrived before the timeout.
    Timeout,
    /// The socket was already closed; the request was never sent.
    SessionNotAvailable,
}

/// Outcome of a correlated resource read.
#[derive(Debug, Clone)]
pub enum ResourceReadOutcome {
    /// Textual content.
    Text {
        /// The resource body.
        content: String,
        /// MIME type, if reported.
        mime_type: Option<String>,
    },
    /// Binary content, base64-encoded by the frontend.
    Blob {
        /// The base64-encoded resource body.
        blob: String,
        /// MIME type, if reported.
        mime_type: Option<String>,
    },
    /// The frontend reported a read failure.
    Error(String),
    /// No reply arrived before the timeout.
    Timeout,
    /// The socket was already closed; the request was never sent.
    SessionNotAvailable,
}

enum Handler {
    Tool(oneshot::Sender<ToolCallOutcome>),
    Resource(oneshot::Sender<ResourceReadOutcome>),
}

/// Tracks in-flight tool-call and resource-read requests across all sessions.
pub struct CorrelationLayer {
    scheduler: Arc<dyn Scheduler>,
    pending: Arc<RwLock<HashMap<String, (Handler, TimerId)>>>,
}

impl CorrelationLayer {
    /// Construct a correlation layer driven by the given scheduler.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Send a tool call to `session` and await its reply or timeout.
    pub async fn call_tool(
        &self,
        session: &Arc<FrontendSession>,
        tool_name: String,
        tool_input: Option<Value>,
        query_id: Option<String>,
    ) -> ToolCallOutcome {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        if session
            .send(crate::protocol::OutboundFrame::ToolCall {
                request_id: request_id.clone(),
                tool_name,
                tool_input,
                query_id,
            })
            .is_err()
        {
            return ToolCallOutcome::SessionNotAvailable;
        }

        self.register(request_id.clone(), Handler::Tool(tx)).await;
        self.await_reply(rx, request_id, || ToolCallOutcome::Timeout).await
    }

    /// Send a resource read to `session` and await its reply or timeout.
    pub async fn read_resource(&self, session: &Arc<FrontendSession>, uri: String) -> ResourceReadOutcome {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        if session
            .send(crate::protocol::OutboundFrame::ResourceRead {
                request_id: request_id.clone(),
                uri,
            })
            .is_err()
        {
            return ResourceReadOutcome::SessionNotAvailable;
        }

        self.register(request_id.clone(), Handler::Resource(tx)).await;
        self.await_reply(rx, request_id, || ResourceReadOutcome::Timeout)
            .await
    }

    async fn register(&self, request_id: String, handler: Handler) {
        let pending = self.pending.clone();
        let timeout_id_request = request_id.clone();
        let timer_id = self.scheduler.schedule(
            REQUEST_TIMEOUT,
            Box::new(move || {
                Box::pin(async move {
                    if let Some((handler, _)) = pending.write().await.remove(&timeout_id_request) {
                        match handler {
                            Handler::Tool(tx) => {
                                let _ = tx.send(ToolCallOutcome::Timeout);
                            }
                            Handler::Resource(tx) => {
                                let _ = tx.send(ResourceReadOutcome::Timeout);
                            }
                        }
                    }
                })
            }),
        );
        self.pending.write().await.insert(request_id, (handler, timer_id));
    }

    async fn await_reply<T, F: FnOnce() -> T>(
        &self,
        rx: oneshot::Receiver<T>,
        request_id: String,
        on_channel_closed: F,
    ) -> T {
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                // handler dropped without a send — treat as a lost request
                self.pending.write().await.remove(&request_id);
                on_channel_closed()
            }
        }
    }

    /// Route a frontend `tool-response` frame to its waiting handler, if any.
    /// Resolves the matching handler exactly once and cancels its timer.
    pub async fn resolve_tool_response(&self, request_id: &str, result: Value) {
        let entry = self.pending.write().await.remove(request_id);
        if let Some((Handler::Tool(tx), timer_id)) = entry {
            self.scheduler.cancel(timer_id);
            let _ = tx.send(ToolCallOutcome::Result(result));
        }
    }

    /// Route a frontend `resource-response` frame to its waiting handler.
    #[allow(clippy::too_many_arguments)]
    pub async fn resolve_resource_response(
        &self,
        request_id: &str,
        content: Option<String>,
        blob: Option<String>,
        mime_type: Option<String>,
        error: Option<String>,
    ) {
        let entry = self.pending.write().await.remove(request_id);
        if let Some((Handler::Resource(tx), timer_id)) = entry {
            self.scheduler.cancel(timer_id);
            let outcome = if let Some(error) = error {
                ResourceReadOutcome::Error(error)
            } else if let Some(blob) = blob {
                if STANDARD.decode(&blob).is_err() {
                    ResourceReadOutcome::Error("invalid base64 blob content".into())
                } else {
                    ResourceReadOutcome::Blob { blob, mime_type }
                }
            } else {
                ResourceReadOutcome::Text {
                    content: content.unwrap_or_default(),
                    mime_type,
                }
            };
            let _ = tx.send(outcome);
        }
    }

    /// Number of requests currently awaiting a reply. Exposed for tests and
    /// health reporting.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use tokio::sync::mpsc;

    fn test_session() -> (Arc<FrontendSession>, mpsc::UnboundedReceiver<crate::session::SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(FrontendSession {
                session_id: "s1".into(),
                auth_token: "tok".into(),
                origin: "o".into(),
                page_title: None,
                session_name: None,
                user_agent: None,
                connected_at: chrono::Utc::now(),
                last_activity: tokio::sync::RwLock::new(chrono::Utc::now()),
                tools: tokio::sync::RwLock::new(HashMap::new()),
                resources: tokio::sync::RwLock::new(HashMap::new()),
                sender: tx,
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn tool_call_resolves_on_matching_response() {
        let scheduler = Arc::new(TokioScheduler::new());
        let layer = CorrelationLayer::new(scheduler);
        let (session, mut rx) = test_session();

        let call = layer.call_tool(&session, "echo".into(), None, None);
        let event = rx.recv().await.unwrap();
        let request_id = match event {
            crate::session::SocketEvent::Frame(crate::protocol::OutboundFrame::ToolCall { request_id, .. }) => {
                request_id
            }
            other => panic!("unexpected event: {other:?}"),
        };

        let resolve = layer.resolve_tool_response(&request_id, serde_json::json!("pong"));
        let (outcome, _) = tokio::join!(call, resolve);
        match outcome {
            ToolCallOutcome::Result(v) => assert_eq!(v, serde_json::json!("pong")),
            other => panic!("expected a result, got {other:?}"),
        }
        assert_eq!(layer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn call_tool_on_dead_socket_is_session_not_available() {
        let scheduler = Arc::new(TokioScheduler::new());
        let layer = CorrelationLayer::new(scheduler);
        let (session, rx) = test_session();
        drop(rx);

        let outcome = layer.call_tool(&session, "echo".into(), None, None).await;
        assert!(matches!(outcome, ToolCallOutcome::SessionNotAvailable));
        assert_eq!(layer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unmatched_response_is_ignored() {
        let scheduler = Arc::new(TokioScheduler::new());
        let layer = CorrelationLayer::new(scheduler);
        layer
            .resolve_tool_response("never-registered", serde_json::json!(null))
            .await;
        assert_eq!(layer.pending_count().await, 0);
    }
}
