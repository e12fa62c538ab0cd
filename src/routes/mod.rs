//! Router assembly.

use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;

use crate::handlers::{api, voice};
use crate::state::AppState;

/// Admin and auth HTTP routes.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        .route("/providers", get(api::providers))
        .route("/sessions", get(api::list_sessions))
        .route("/sessions/cleanup", delete(api::cleanup_sessions))
        .route("/sessions/{session_id}", get(api::get_session))
        .route("/sessions/{session_id}", delete(api::delete_session))
        .route("/auth/token", post(api::create_token))
}

/// Voice WebSocket route.
pub fn create_voice_router() -> Router<Arc<AppState>> {
    Router::new().route("/voice/{session_id}", get(voice::voice_handler))
}
