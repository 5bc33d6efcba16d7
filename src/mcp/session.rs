//! MCP protocol sessions: one per `initialize` call from an MCP host.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Channel used to push a notification/event onto an open SSE stream.
pub type PushSender = mpsc::UnboundedSender<Value>;

/// A live MCP protocol session, created by `initialize` and addressed by
/// the `Mcp-Session-Id` header on every subsequent call.
pub struct McpSession {
    /// Session id, returned to the client on `initialize`.
    pub id: Uuid,
    /// Auth token the session was created under.
    pub auth_token: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time any JSON-RPC call referenced this session.
    pub last_activity: RwLock<DateTime<Utc>>,
    /// Writer for an open server-push (SSE) stream, if one is attached.
    pub push: RwLock<Option<PushSender>>,
}

impl McpSession {
    fn new(auth_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            auth_token,
            created_at: now,
            last_activity: RwLock::new(now),
            push: RwLock::new(None),
        }
    }

    /// Push a frame onto this session's SSE stream, if one is attached.
    /// Silently drops the frame if no stream is open or the receiver is gone.
    pub async fn push(&self, frame: Value) {
        if let Some(sender) = self.push.read().await.as_ref() {
            let _ = sender.send(frame);
        }
    }

    /// Attach (or replace) the push sender for this session.
    pub async fn attach_stream(&self, sender: PushSender) {
        *self.push.write().await = Some(sender);
    }

    /// Detach the push sender, e.g. on client disconnect.
    pub async fn detach_stream(&self) {
        *self.push.write().await = None;
    }

    /// Refresh `last_activity` to now.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }
}

/// Table of live MCP sessions, keyed by id.
pub struct McpSessionTable {
    sessions: RwLock<HashMap<Uuid, Arc<McpSession>>>,
}

impl McpSessionTable {
    /// Construct an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create and index a new session for `auth_token`.
    pub async fn create(&self, auth_token: String) -> Arc<McpSession> {
        let session = Arc::new(McpSession::new(auth_token));
        self.sessions.write().await.insert(session.id, session.clone());
        session
    }

    /// Look up a session by id.
    pub async fn get(&self, id: Uuid) -> Option<Arc<McpSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Every session sharing `auth_token`, used to fan out
    /// `notifications/tools/list_changed`.
    pub async fn by_token(&self, auth_token: &str) -> Vec<Arc<McpSession>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.auth_token == auth_token)
            .cloned()
            .collect()
    }

    /// Remove a session by id.
    pub async fn remove(&self, id: Uuid) -> Option<Arc<McpSession>> {
        self.sessions.write().await.remove(&id)
    }

    /// Sessions idle for longer than `max_idle_ms`.
    pub async fn expired(&self, now: DateTime<Utc>, max_idle_ms: i64) -> Vec<Arc<McpSession>> {
        let sessions = self.sessions.read().await;
        let mut expired = Vec::new();
        for session in sessions.values() {
            let last = *session.last_activity.read().await;
            if (now - last).num_milliseconds() > max_idle_ms {
                expired.push(session.clone());
            }
        }
        expired
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove every session. Used on shutdown.
    pub async fn clear(&self) -> Vec<Arc<McpSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }
}

impl Default for McpSessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle-expiry window for an MCP session.
pub const MCP_SESSION_IDLE_MS: i64 = 3_600_000;

/// Keepalive interval for an open SSE stream.
pub const SSE_KEEPALIVE_MS: u64 = 30_000;
