//! WebSocket endpoint for chat clients.
//!
//! Flow:
//! 1. Client connects to `/ws` (optionally `?session_id=<prior>` to
//!    resume a suspended session and drain its queue).
//! 2. A writer task forwards the session's outbound channel to the
//!    socket; a heartbeat task pings every 30 s.
//! 3. The reader loop parses inbound frames into [`ClientMessage`]s.
//!    Malformed frames produce a typed `error` event and the session
//!    stays live.

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::runtime::{self, truncate_str, TurnInput};
use crate::session::{spawn_heartbeat, ClientMessage, ServerEvent};
use crate::state::AppState;

/// Title given to a conversation created implicitly by a first message.
const TITLE_MAX_CHARS: usize = 48;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Prior session id for reconnection.
    pub session_id: Option<String>,
}

/// GET /ws -- upgrade to WebSocket.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, prior_id: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (ws_id, _reconnected, mut outbound_rx) = state.sessions.connect(prior_id.as_deref());

    // Writer task: session outbound channel -> socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            if ws_sink
                .send(WsFrame::Text(event.to_string()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    spawn_heartbeat(state.sessions.clone(), ws_id.clone());

    // Reader loop.
    while let Some(Ok(frame)) = ws_stream.next().await {
        match frame {
            WsFrame::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state, &ws_id, msg).await,
                Err(e) => {
                    tracing::debug!(ws_id = %ws_id, error = %e, "malformed client message");
                    state
                        .sessions
                        .send_to(
                            &ws_id,
                            ServerEvent::Error {
                                category: "protocol".into(),
                                message: format!("malformed message: {e}"),
                            },
                        )
                        .await;
                }
            },
            WsFrame::Close(_) => break,
            // Transport-level ping/pong is handled by axum.
            _ => {}
        }
    }

    // Channel loss suspends the session; the queue keeps accumulating.
    state.sessions.suspend(&ws_id);
    writer.abort();
    tracing::info!(ws_id = %ws_id, "socket closed");
}

async fn handle_client_message(state: &AppState, ws_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::Text { text, conv_id } => {
            if text.trim().is_empty() {
                return;
            }
            let conv_id = match resolve_conversation(state, ws_id, conv_id, &text).await {
                Some(id) => id,
                None => return,
            };

            let state = state.clone();
            let ws_id = ws_id.to_string();
            let user_message = text;
            tokio::spawn(async move {
                // Turns within one session are serialized.
                let _permit = state.session_locks.acquire(&ws_id).await;
                runtime::run_turn(
                    &state,
                    TurnInput {
                        ws_id,
                        conv_id,
                        user_message,
                    },
                )
                .await;
            });
        }

        ClientMessage::Abort => {
            if state.cancel_map.cancel(ws_id) {
                tracing::info!(ws_id = %ws_id, "abort requested");
            } else {
                state
                    .sessions
                    .send_to(
                        ws_id,
                        ServerEvent::System {
                            content: "nothing to abort".into(),
                        },
                    )
                    .await;
            }
        }

        ClientMessage::SetModel { model } => {
            if !matches!(model.as_str(), "local" | "hosted" | "auto") {
                state
                    .sessions
                    .send_to(
                        ws_id,
                        ServerEvent::Error {
                            category: "protocol".into(),
                            message: format!("unknown model '{model}' (local, hosted, auto)"),
                        },
                    )
                    .await;
                return;
            }
            state.sessions.set_force_model(ws_id, &model);
            state
                .sessions
                .send_to(
                    ws_id,
                    ServerEvent::System {
                        content: format!("model set to {model}"),
                    },
                )
                .await;
        }

        ClientMessage::SetConversation { conv_id } => {
            match state.store.get_conversation(&conv_id) {
                Ok(Some(conv)) => {
                    state.sessions.set_conversation(ws_id, &conv.id);
                    state
                        .sessions
                        .send_to(
                            ws_id,
                            ServerEvent::ConversationSet {
                                conv_id: conv.id,
                                title: Some(conv.title),
                            },
                        )
                        .await;
                }
                Ok(None) => {
                    state
                        .sessions
                        .send_to(
                            ws_id,
                            ServerEvent::Error {
                                category: "protocol".into(),
                                message: format!("unknown conversation: {conv_id}"),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    state
                        .sessions
                        .send_to(
                            ws_id,
                            ServerEvent::Error {
                                category: "store".into(),
                                message: e.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        ClientMessage::Pong => {
            state.sessions.record_pong(ws_id);
        }
    }
}

/// Resolve the conversation for a text message: an explicit id wins,
/// then the session's current conversation, else a new one titled from
/// the first message.
async fn resolve_conversation(
    state: &AppState,
    ws_id: &str,
    explicit: Option<String>,
    text: &str,
) -> Option<String> {
    if let Some(conv_id) = explicit {
        state.sessions.set_conversation(ws_id, &conv_id);
        return Some(conv_id);
    }
    if let Some(conv_id) = state.sessions.conversation_of(ws_id) {
        return Some(conv_id);
    }

    let title = truncate_str(text.trim(), TITLE_MAX_CHARS);
    match state.store.create_conversation(&title) {
        Ok(conv) => {
            state.sessions.set_conversation(ws_id, &conv.id);
            state
                .sessions
                .send_to(
                    ws_id,
                    ServerEvent::ConversationSet {
                        conv_id: conv.id.clone(),
                        title: Some(conv.title),
                    },
                )
                .await;
            Some(conv.id)
        }
        Err(e) => {
            state
                .sessions
                .send_to(
                    ws_id,
                    ServerEvent::Error {
                        category: "store".into(),
                        message: e.to_string(),
                    },
                )
                .await;
            None
        }
    }
}
