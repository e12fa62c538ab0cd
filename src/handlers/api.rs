//! HTTP admin handlers: health, metrics, session administration, token
//! issuance and provider status.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::TOKEN_TTL_SECS;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// `GET /` - liveness probe.
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "vox-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health` - component statuses and active-session count.
pub async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let kv_health = state.kv.health_check().await;
    let session_count = state.sessions.count().await?;

    let family_status = |empty: bool| if empty { "unconfigured" } else { "operational" };

    Ok(Json(json!({
        "status": "healthy",
        "services": {
            "stt": family_status(state.turn_services.stt.is_empty()),
            "llm": family_status(state.turn_services.llm.is_empty()),
            "tts": family_status(state.turn_services.tts.is_empty()),
            "search": family_status(state.turn_services.search.is_none()),
            "redis": kv_health,
        },
        "sessions": { "active": session_count },
        "cache": state.cache.stats(),
    })))
}

/// `GET /metrics` - aggregated latency statistics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "pipeline": state.metrics.stats(100),
        "cache": state.cache.stats(),
    }))
}

/// `GET /providers` - structured status of the provider managers.
pub async fn providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "stt": state.turn_services.stt.status(),
        "llm": state.turn_services.llm.status(),
        "tts": state.turn_services.tts.status(),
    }))
}

/// `GET /sessions` - list active session IDs.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let sessions = state.sessions.list_active().await?;
    Ok(Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

/// `GET /sessions/{id}` - session details.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Value>> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
    Ok(Json(serde_json::to_value(session).map_err(|e| {
        AppError::Internal(e.to_string())
    })?))
}

/// `DELETE /sessions/{id}` - delete a session.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Value>> {
    if !state.sessions.delete(&session_id).await? {
        return Err(AppError::NotFound(format!("session {session_id}")));
    }
    Ok(Json(json!({
        "message": "Session deleted",
        "session_id": session_id,
    })))
}

/// `DELETE /sessions/cleanup` - run the expiry sweep now.
pub async fn cleanup_sessions(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let removed = state.sessions.cleanup_expired().await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user_id: String,
    pub expires_in: u64,
}

/// `POST /auth/token` - issue a token for a user, or a guest token.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    request: Option<Json<TokenRequest>>,
) -> AppResult<Json<TokenResponse>> {
    let requested_user = request.and_then(|Json(r)| r.user_id);

    let (token, user_id) = match requested_user {
        Some(user_id) => (state.auth.create_token(&user_id)?, user_id),
        None => state.auth.create_guest_token()?,
    };

    Ok(Json(TokenResponse {
        token,
        user_id,
        expires_in: TOKEN_TTL_SECS,
    }))
}
