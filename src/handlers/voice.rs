//! Voice WebSocket handler.
//!
//! Upgrades `/voice/{session_id}`, authenticates (guest fallback), resolves
//! or resurrects the session, and pumps frames between the socket and the
//! turn orchestrator. Outgoing messages flow through an mpsc-fed sender task
//! so sends are serialized per connection.

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::session::messages::{ControlMessage, ServerMessage};
use crate::session::orchestrator::TurnOrchestrator;
use crate::state::AppState;
use crate::store::{SessionState, SessionUpdate};

/// Outgoing channel depth per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Binary frames at or below this size are ignored as non-audio noise.
const MIN_AUDIO_FRAME_BYTES: usize = 100;

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `/voice/{session_id}`.
pub async fn voice_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<VoiceQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Authenticate before upgrading: a missing token downgrades to a guest
    // identity, an invalid one closes the door here.
    let Some(user_id) = state.auth.authenticate(query.token.as_deref()) else {
        warn!(session_id, "rejecting connection with invalid token");
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    };

    // Connection cap.
    let active = state.active_connections.load(Ordering::SeqCst);
    if active >= state.config.max_concurrent_sessions {
        warn!(active, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    }

    info!(session_id, user_id, "voice connection upgrade");
    ws.on_upgrade(move |socket| handle_voice_socket(socket, state, session_id, user_id))
}

async fn handle_voice_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    user_id: String,
) {
    state.active_connections.fetch_add(1, Ordering::SeqCst);
    state
        .metrics
        .set_active_sessions(state.active_connections.load(Ordering::SeqCst));

    // Resolve or create the session; history survives reconnects within the
    // TTL.
    let session = match state.sessions.get(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => match state
            .sessions
            .create(Some(user_id.clone()), Some(session_id.clone()), None)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(session_id, "failed to create session: {e}");
                finish_connection(&state);
                return;
            }
        },
        Err(e) => {
            error!(session_id, "failed to load session: {e}");
            finish_connection(&state);
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    // Sender task serializes all outgoing frames.
    let sender_session = session_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize outgoing message: {e}");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!(session_id = %sender_session, "send failed, client gone: {e}");
                break;
            }
        }
    });

    let mut orchestrator = TurnOrchestrator::new(
        session_id.clone(),
        user_id.clone(),
        session.conversation_history.clone(),
        Arc::clone(&state.turn_services),
        outbound_tx,
    );
    orchestrator.start().await;
    info!(session_id, user_id, "voice session started");

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                if data.len() > MIN_AUDIO_FRAME_BYTES {
                    orchestrator.handle_audio(data).await;
                } else {
                    debug!(bytes = data.len(), "ignoring undersized binary frame");
                }
            }
            Ok(Message::Text(text)) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(control) => orchestrator.handle_control(control).await,
                Err(e) => warn!(session_id, "unparseable control frame: {e}"),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id, "client closed connection");
                break;
            }
            Err(e) => {
                warn!(session_id, "websocket error: {e}");
                break;
            }
        }
    }

    // Disconnect: stop any in-flight turn, flush history, park the session.
    let history = orchestrator.history_handle();
    orchestrator.shutdown().await;
    flush_history(&state, &session_id, history).await;
    if let Err(e) = state
        .sessions
        .update(
            &session_id,
            SessionUpdate {
                state: Some(SessionState::Idle),
                ..Default::default()
            },
        )
        .await
    {
        warn!(session_id, "failed to park session: {e}");
    }

    sender_task.abort();
    finish_connection(&state);
    info!(session_id, "voice session ended");
}

/// Write any history entries the turn pipeline did not manage to persist.
async fn flush_history(
    state: &Arc<AppState>,
    session_id: &str,
    history: Arc<tokio::sync::Mutex<Vec<crate::core::llm::ChatMessage>>>,
) {
    let history = history.lock().await;
    let stored_len = match state.sessions.get(session_id).await {
        Ok(Some(session)) => session.conversation_history.len(),
        _ => return,
    };

    for message in history.iter().skip(stored_len) {
        if let Err(e) = state
            .sessions
            .update(
                session_id,
                SessionUpdate {
                    add_message: Some(message.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(session_id, "history flush failed: {e}");
            break;
        }
    }
}

fn finish_connection(state: &Arc<AppState>) {
    state.active_connections.fetch_sub(1, Ordering::SeqCst);
    state
        .metrics
        .set_active_sessions(state.active_connections.load(Ordering::SeqCst));
}
