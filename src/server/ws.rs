//! The duplex frontend socket: authenticate, then exchange [`InboundFrame`]s
//! and [`OutboundFrame`]s for the lifetime of the connection.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::protocol::{close_code, InboundFrame};
use crate::server::http::HttpState;
use crate::session::SocketEvent;

#[derive(Debug, Deserialize)]
pub(super) struct ConnectQuery {
    session: Option<String>,
}

/// `GET /ws?session=<id>` — upgrade to the frontend duplex socket.
pub(crate) async fn ws_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ConnectQuery>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state, query.session))
}

#[instrument(skip(socket, state))]
async fn handle_socket(mut socket: WebSocket, state: Arc<HttpState>, session_key: Option<String>) {
    if session_key.is_none() {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Missing session key".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SocketEvent>();

    let mut authenticated_id: Option<String> = None;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(event) = outbound else { break };
                match event {
                    SocketEvent::Frame(frame) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(error) => {
                                warn!(%error, "failed to serialize outbound frame");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    SocketEvent::Close { code, reason } => {
                        let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        handle_inbound_text(&state, &mut authenticated_id, &tx, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(session_id) = authenticated_id {
        if let Some(session) = state.bridge.sessions.remove(&session_id).await {
            state
                .bridge
                .queries
                .remove_for_session(&session_id, &session.auth_token)
                .await;
            state
                .bridge
                .dispatcher
                .notify_tools_list_changed(&session.auth_token)
                .await;
        }
    }
}

async fn handle_inbound_text(
    state: &Arc<HttpState>,
    authenticated_id: &mut Option<String>,
    tx: &tokio::sync::mpsc::UnboundedSender<SocketEvent>,
    text: &str,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(%error, "invalid inbound JSON frame");
            let _ = tx.send(SocketEvent::Close {
                code: close_code::INVALID_JSON,
                reason: "invalid JSON".into(),
            });
            return;
        }
    };

    match (authenticated_id.as_ref(), frame) {
        (None, InboundFrame::Authenticate {
            session_id,
            auth_token,
            origin,
            page_title,
            session_name,
            user_agent,
            ..
        }) => {
            let outcome = state
                .bridge
                .authenticate(session_id.clone(), auth_token, origin, page_title, session_name, user_agent, tx.clone())
                .await;
            match outcome {
                crate::session::AuthOutcome::Accepted { session, .. } => {
                    *authenticated_id = Some(session.session_id.clone());
                    let _ = session.send(crate::protocol::OutboundFrame::Authenticated {
                        session_id: session.session_id.clone(),
                        success: true,
                    });
                }
                crate::session::AuthOutcome::Rejected { error, code } => {
                    let _ = tx.send(SocketEvent::Frame(crate::protocol::OutboundFrame::AuthenticationFailed {
                        error,
                        code: code.into(),
                    }));
                    let _ = tx.send(SocketEvent::Close {
                        code: close_code::POLICY,
                        reason: "authentication rejected".into(),
                    });
                }
            }
        }
        (None, _) => {
            let _ = tx.send(SocketEvent::Close {
                code: close_code::POLICY,
                reason: "not authenticated".into(),
            });
        }
        (Some(session_id), frame) => {
            state.bridge.handle_inbound_frame(session_id, frame).await;
        }
    }
}
