//! Frontend session registry.
//!
//! Tracks authenticated browser connections, indexes them by id and by auth
//! token, and enforces the configured per-token session cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use crate::config::SessionOverflowPolicy;
use crate::protocol::{error_code, OutboundFrame, ResourceDefinition, ToolDefinition};

/// An event destined for a frontend socket's writer task: either a JSON
/// frame, or a request to close the underlying connection with a given
/// close code. Kept out of [`OutboundFrame`] itself since a close is a
/// transport-level act, not a wire message.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Serialize and send this frame as a text message.
    Frame(OutboundFrame),
    /// Close the socket with the given close code and reason.
    Close {
        /// WebSocket close code (see [`crate::protocol::close_code`]).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Channel the registry uses to push events to a connected frontend socket.
pub type FrameSender = mpsc::UnboundedSender<SocketEvent>;

/// A live, authenticated frontend connection.
pub struct FrontendSession {
    /// Opaque id supplied by the frontend at connect time.
    pub session_id: String,
    /// Bearer token identifying the owner of this session.
    pub auth_token: String,
    /// Page origin reported at authenticate time.
    pub origin: String,
    /// Optional human-friendly page title.
    pub page_title: Option<String>,
    /// Optional unique-per-token session name.
    pub session_name: Option<String>,
    /// Optional browser user agent.
    pub user_agent: Option<String>,
    /// When the socket was authenticated.
    pub connected_at: DateTime<Utc>,
    /// Last time an `activity` frame (or any registry mutation) was observed.
    pub last_activity: RwLock<DateTime<Utc>>,
    /// Tools registered by this session, keyed by name.
    pub tools: RwLock<HashMap<String, ToolDefinition>>,
    /// Resources registered by this session, keyed by URI.
    pub resources: RwLock<HashMap<String, ResourceDefinition>>,
    pub(crate) sender: FrameSender,
}

impl FrontendSession {
    /// Send a frame to this session's socket. Errors (socket gone) are
    /// swallowed by the caller's `let _ =`, matching the best-effort
    /// delivery discipline used for session-closed/expired notices.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::SendError<SocketEvent>> {
        self.sender.send(SocketEvent::Frame(frame))
    }

    /// Request the socket close with the given code and reason.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.sender.send(SocketEvent::Close {
            code,
            reason: reason.into(),
        });
    }
}

/// Outcome of an `authenticate` attempt.
pub enum AuthOutcome {
    /// Accepted. If a session was evicted to make room, its id and sender
    /// are returned so the caller can notify and close it.
    Accepted {
        /// The newly created session.
        session: Arc<FrontendSession>,
        /// Session evicted under `close_oldest`, if any.
        evicted: Option<Arc<FrontendSession>>,
    },
    /// Rejected outright; caller should send a failure frame and close.
    Rejected {
        /// Human-readable reason.
        error: String,
        /// Named error code.
        code: &'static str,
    },
}

/// Registry of live frontend sessions.
pub struct SessionRegistry {
    by_id: RwLock<HashMap<String, Arc<FrontendSession>>>,
    by_token: RwLock<HashMap<String, HashSet<String>>>,
    max_sessions_per_token: Option<usize>,
    overflow_policy: SessionOverflowPolicy,
}

impl SessionRegistry {
    /// Construct an empty registry with the given caps.
    #[must_use]
    pub fn new(max_sessions_per_token: Option<usize>, overflow_policy: SessionOverflowPolicy) -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_token: RwLock::new(HashMap::new()),
            max_sessions_per_token,
            overflow_policy,
        }
    }

    /// Authenticate a new connection, enforcing the session cap and the
    /// per-token session-name uniqueness rule.
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
    ) -> AuthOutcome {
        let mut by_token = self.by_token.write().await;
        let mut by_id = self.by_id.write().await;

        if let Some(name) = &session_name {
            let collision = by_token
                .get(&auth_token)
                .map(|ids| {
                    ids.iter().any(|id| {
                        by_id
                            .get(id)
                            .map(|s| s.session_name.as_deref() == Some(name.as_str()))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if collision {
                return AuthOutcome::Rejected {
                    error: format!("session name '{name}' already in use"),
                    code: error_code::SESSION_NAME_ALREADY_IN_USE,
                };
            }
        }

        let mut evicted = None;
        if let Some(max) = self.max_sessions_per_token {
            let count = by_token.get(&auth_token).map(HashSet::len).unwrap_or(0);
            if count >= max {
                match self.overflow_policy {
                    SessionOverflowPolicy::CloseOldest => {
                        let oldest_id = by_token.get(&auth_token).and_then(|ids| {
                            ids.iter()
                                .filter_map(|id| by_id.get(id).map(|s| (id.clone(), s.connected_at)))
                                .min_by_key(|(_, connected_at)| *connected_at)
                                .map(|(id, _)| id)
                        });
                        if let Some(old_id) = oldest_id {
                            if let Some(old_session) = by_id.remove(&old_id) {
                                if let Some(ids) = by_token.get_mut(&auth_token) {
                                    ids.remove(&old_id);
                                }
                                evicted = Some(old_session);
                            }
                        }
                    }
                    SessionOverflowPolicy::Reject => {
                        return AuthOutcome::Rejected {
                            error: "session limit exceeded for this token".into(),
                            code: error_code::SESSION_LIMIT_EXCEEDED,
                        };
                    }
                }
            }
        }

        let now = Utc::now();
        let session = Arc::new(FrontendSession {
            session_id: session_id.clone(),
            auth_token: auth_token.clone(),
            origin,
            page_title,
            session_name,
            user_agent,
            connected_at: now,
            last_activity: RwLock::new(now),
            tools: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            sender,
        });

        by_id.insert(session_id.clone(), session.clone());
        by_token.entry(auth_token).or_default().insert(session_id);

        AuthOutcome::Accepted { session, evicted }
    }

    /// Look up a session by id.
    pub async fn get(&self, session_id: &str) -> Option<Arc<FrontendSession>> {
        self.by_id.read().await.get(session_id).cloned()
    }

    /// All sessions sharing the given auth token.
    pub async fn by_token(&self, auth_token: &str) -> Vec<Arc<FrontendSession>> {
        let by_token = self.by_token.read().await;
        let by_id = self.by_id.read().await;
        by_token
            .get(auth_token)
            .into_iter()
            .flatten()
            .filter_map(|id| by_id.get(id).cloned())
            .collect()
    }

    /// Upsert a tool definition on the named session.
    pub async fn register_tool(&self, session_id: &str, tool: ToolDefinition) -> bool {
        let Some(session) = self.get(session_id).await else {
            return false;
        };
        session.tools.write().await.insert(tool.name.clone(), tool);
        *session.last_activity.write().await = Utc::now();
        true
    }

    /// Upsert a resource definition on the named session.
    pub async fn register_resource(&self, session_id: &str, resource: ResourceDefinition) -> bool {
        let Some(session) = self.get(session_id).await else {
            return false;
        };
        session
            .resources
            .write()
            .await
            .insert(resource.uri.clone(), resource);
        *session.last_activity.write().await = Utc::now();
        true
    }

    /// Record an activity timestamp (ms since epoch) on the named session.
    pub async fn record_activity(&self, session_id: &str, timestamp: i64) {
        let Some(activity) = DateTime::<Utc>::from_timestamp_millis(timestamp) else {
            return;
        };
        if let Some(session) = self.get(session_id).await {
            *session.last_activity.write().await = activity;
        }
    }

    /// Remove a session from both indexes. Returns the removed session, if any.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<FrontendSession>> {
        let mut by_id = self.by_id.write().await;
        let session = by_id.remove(session_id)?;
        let mut by_token = self.by_token.write().await;
        if let Some(ids) = by_token.get_mut(&session.auth_token) {
            ids.remove(session_id);
            if ids.is_empty() {
                by_token.remove(&session.auth_token);
            }
        }
        Some(session)
    }

    /// Sessions whose idle duration now exceeds `max_duration_ms`.
    pub async fn expired(&self, now: DateTime<Utc>, max_duration_ms: u64) -> Vec<Arc<FrontendSession>> {
        let by_id = self.by_id.read().await;
        let mut expired = Vec::new();
        for session in by_id.values() {
            let age_ms = (now - session.connected_at).num_milliseconds();
            if age_ms >= 0 && age_ms as u64 > max_duration_ms {
                expired.push(session.clone());
            }
        }
        expired
    }

    /// Total number of live sessions, across all tokens.
    pub async fn len(&self) -> usize {
        self.by_id.read().await.len()
    }

    /// Remove every session and clear both indexes. Used on shutdown.
    pub async fn clear(&self) -> Vec<Arc<FrontendSession>> {
        let mut by_id = self.by_id.write().await;
        let mut by_token = self.by_token.write().await;
        by_token.clear();
        by_id.drain().map(|(_, session)| session).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (FrameSender, mpsc::UnboundedReceiver<SocketEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn authenticate_indexes_both_maps() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let (tx, _rx) = sender();
        let outcome = registry
            .authenticate(
                "s1".into(),
                "tok".into(),
                "https://example.com".into(),
                None,
                None,
                None,
                tx,
            )
            .await;
        assert!(matches!(outcome, AuthOutcome::Accepted { .. }));
        assert!(registry.get("s1").await.is_some());
        assert_eq!(registry.by_token("tok").await.len(), 1);
    }

    #[tokio::test]
    async fn cap_rejects_when_policy_is_reject() {
        let registry = SessionRegistry::new(Some(1), SessionOverflowPolicy::Reject);
        let (tx1, _rx1) = sender();
        registry
            .authenticate("s1".into(), "tok".into(), "o".into(), None, None, None, tx1)
            .await;
        let (tx2, _rx2) = sender();
        let outcome = registry
            .authenticate("s2".into(), "tok".into(), "o".into(), None, None, None, tx2)
            .await;
        match outcome {
            AuthOutcome::Rejected { code, .. } => assert_eq!(code, error_code::SESSION_LIMIT_EXCEEDED),
            _ => panic!("expected rejection"),
        }
        assert_eq!(registry.by_token("tok").await.len(), 1);
    }

    #[tokio::test]
    async fn cap_evicts_oldest_under_close_oldest() {
        let registry = SessionRegistry::new(Some(1), SessionOverflowPolicy::CloseOldest);
        let (tx1, _rx1) = sender();
        registry
            .authenticate("s1".into(), "tok".into(), "o".into(), None, None, None, tx1)
            .await;
        let (tx2, _rx2) = sender();
        let outcome = registry
            .authenticate("s2".into(), "tok".into(), "o".into(), None, None, None, tx2)
            .await;
        match outcome {
            AuthOutcome::Accepted { evicted, .. } => {
                assert_eq!(evicted.unwrap().session_id, "s1");
            }
            _ => panic!("expected acceptance"),
        }
        assert!(registry.get("s1").await.is_none());
        assert!(registry.get("s2").await.is_some());
        assert_eq!(registry.by_token("tok").await.len(), 1);
    }

    #[tokio::test]
    async fn session_name_collision_is_rejected() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let (tx1, _rx1) = sender();
        registry
            .authenticate(
                "s1".into(),
                "tok".into(),
                "o".into(),
                None,
                Some("main".into()),
                None,
                tx1,
            )
            .await;
        let (tx2, _rx2) = sender();
        let outcome = registry
            .authenticate(
                "s2".into(),
                "tok".into(),
                "o".into(),
                None,
                Some("main".into()),
                None,
                tx2,
            )
            .await;
        match outcome {
            AuthOutcome::Rejected { code, .. } => {
                assert_eq!(code, error_code::SESSION_NAME_ALREADY_IN_USE);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn remove_clears_both_indexes_and_empty_token_bucket() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let (tx, _rx) = sender();
        registry
            .authenticate("s1".into(), "tok".into(), "o".into(), None, None, None, tx)
            .await;
        registry.remove("s1").await;
        assert!(registry.get("s1").await.is_none());
        assert!(registry.by_token("tok").await.is_empty());
    }

    #[tokio::test]
    async fn register_tool_updates_activity() {
        let registry = SessionRegistry::new(None, SessionOverflowPolicy::Reject);
        let (tx, _rx) = sender();
        registry
            .authenticate("s1".into(), "tok".into(), "o".into(), None, None, None, tx)
            .await;
        let ok = registry
            .register_tool(
                "s1",
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes input".into(),
                    input_schema: None,
                    output_schema: None,
                    meta: None,
                },
            )
            .await;
        assert!(ok);
        let session = registry.get("s1").await.unwrap();
        assert!(session.tools.read().await.contains_key("echo"));
    }
}
