//! Redis-backed session records.
//!
//! One `session:{id}` JSON record per session at the configured TTL, plus a
//! `user_sessions:{user_id}` index kept at twice the TTL so history can be
//! found across reconnects. Every update refreshes `last_activity` and
//! re-extends the TTL; a session resurrected within the TTL keeps its
//! conversation history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::llm::ChatMessage;

use super::{KvStore, StoreError};

const SESSION_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "user_sessions:";

/// Default session TTL (30 minutes).
pub const DEFAULT_SESSION_TTL: u64 = 1800;

/// Connection-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Thinking => write!(f, "thinking"),
            SessionState::Speaking => write!(f, "speaking"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub user_id: String,
    /// Seconds since epoch
    pub created_at: f64,
    /// Seconds since epoch, refreshed on every update
    pub last_activity: f64,
    pub state: SessionState,
    pub conversation_history: Vec<ChatMessage>,
    pub metadata: HashMap<String, Value>,
}

/// Partial update applied by [`SessionStore::update`].
#[derive(Debug, Default)]
pub struct SessionUpdate {
    pub state: Option<SessionState>,
    pub add_message: Option<ChatMessage>,
    pub metadata: Option<HashMap<String, Value>>,
}

/// Keyed session records with TTL and per-user indexing.
pub struct SessionStore {
    kv: Arc<KvStore>,
    ttl: u64,
}

impl SessionStore {
    pub fn new(kv: Arc<KvStore>, ttl: u64) -> Self {
        Self { kv, ttl }
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_PREFIX}{session_id}")
    }

    fn user_sessions_key(user_id: &str) -> String {
        format!("{USER_SESSIONS_PREFIX}{user_id}")
    }

    /// Create a session, generating IDs when not supplied.
    pub async fn create(
        &self,
        user_id: Option<String>,
        session_id: Option<String>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<SessionData, StoreError> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let user_id = user_id.unwrap_or_else(crate::auth::guest_user_id);
        let now = epoch_secs();

        let session = SessionData {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            created_at: now,
            last_activity: now,
            state: SessionState::Idle,
            conversation_history: Vec::new(),
            metadata: metadata.unwrap_or_default(),
        };

        self.kv
            .json_set(&Self::session_key(&session_id), &session, Some(self.ttl))
            .await?;

        // User index lives twice as long as any one session.
        let mut user_sessions = self.user_sessions(&user_id).await?;
        if !user_sessions.contains(&session_id) {
            user_sessions.push(session_id.clone());
        }
        self.kv
            .json_set(
                &Self::user_sessions_key(&user_id),
                &user_sessions,
                Some(self.ttl * 2),
            )
            .await?;

        info!(session_id, user_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        self.kv.json_get(&Self::session_key(session_id)).await
    }

    /// Apply a partial update, refreshing `last_activity` and the TTL.
    pub async fn update(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Option<SessionData>, StoreError> {
        let Some(mut session) = self.get(session_id).await? else {
            warn!(session_id, "session not found for update");
            return Ok(None);
        };

        session.last_activity = epoch_secs();
        if let Some(state) = update.state {
            session.state = state;
        }
        if let Some(message) = update.add_message {
            session.conversation_history.push(message);
        }
        if let Some(metadata) = update.metadata {
            session.metadata.extend(metadata);
        }

        self.kv
            .json_set(&Self::session_key(session_id), &session, Some(self.ttl))
            .await?;
        Ok(Some(session))
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let Some(session) = self.get(session_id).await? else {
            return Ok(false);
        };

        let mut user_sessions = self.user_sessions(&session.user_id).await?;
        if let Some(pos) = user_sessions.iter().position(|s| s == session_id) {
            user_sessions.remove(pos);
            self.kv
                .json_set(
                    &Self::user_sessions_key(&session.user_id),
                    &user_sessions,
                    Some(self.ttl * 2),
                )
                .await?;
        }

        let removed = self.kv.delete(&Self::session_key(session_id)).await?;
        info!(session_id, "session deleted");
        Ok(removed)
    }

    /// All session IDs for one user.
    pub async fn user_sessions(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .kv
            .json_get(&Self::user_sessions_key(user_id))
            .await?
            .unwrap_or_default())
    }

    /// All active session IDs.
    pub async fn list_active(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.kv.keys(&format!("{SESSION_PREFIX}*")).await?;
        Ok(keys
            .into_iter()
            .map(|k| k.trim_start_matches(SESSION_PREFIX).to_string())
            .collect())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.kv.keys(&format!("{SESSION_PREFIX}*")).await?.len())
    }

    /// Refresh a session's TTL without other changes.
    pub async fn extend(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .update(session_id, SessionUpdate::default())
            .await?
            .is_some())
    }

    /// Delete sessions whose `last_activity` is older than the TTL.
    ///
    /// Redis expires records on its own; this sweep is what enforces expiry
    /// for the in-memory fallback.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = epoch_secs();
        let mut removed = 0;

        for session_id in self.list_active().await? {
            if let Some(session) = self.get(&session_id).await?
                && now - session.last_activity > self.ttl as f64
            {
                self.delete(&session_id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "cleaned up expired sessions");
        } else {
            debug!("no expired sessions");
        }
        Ok(removed)
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(KvStore::in_memory()), 1800)
    }

    #[tokio::test]
    async fn test_create_generates_ids() {
        let sessions = store();
        let session = sessions.create(None, None, None).await.unwrap();
        assert!(!session.session_id.is_empty());
        assert!(session.user_id.starts_with("guest_"));
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.conversation_history.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let sessions = store();
        let created = sessions
            .create(Some("user-1".to_string()), Some("sess-1".to_string()), None)
            .await
            .unwrap();

        let fetched = sessions.get("sess-1").await.unwrap().unwrap();
        assert_eq!(fetched.session_id, created.session_id);
        assert_eq!(fetched.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_update_appends_history() {
        let sessions = store();
        sessions
            .create(Some("user-1".to_string()), Some("sess-1".to_string()), None)
            .await
            .unwrap();

        sessions
            .update(
                "sess-1",
                SessionUpdate {
                    add_message: Some(ChatMessage::user("hello")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        sessions
            .update(
                "sess-1",
                SessionUpdate {
                    state: Some(SessionState::Listening),
                    add_message: Some(ChatMessage::assistant("hi there")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let session = sessions.get("sess-1").await.unwrap().unwrap();
        assert_eq!(session.conversation_history.len(), 2);
        assert_eq!(session.conversation_history[1].content, "hi there");
        assert_eq!(session.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn test_update_missing_session_is_none() {
        let sessions = store();
        let result = sessions
            .update("missing", SessionUpdate::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_user_index_tracks_sessions() {
        let sessions = store();
        sessions
            .create(Some("user-1".to_string()), Some("a".to_string()), None)
            .await
            .unwrap();
        sessions
            .create(Some("user-1".to_string()), Some("b".to_string()), None)
            .await
            .unwrap();

        let ids = sessions.user_sessions("user-1").await.unwrap();
        assert_eq!(ids, vec!["a", "b"]);

        sessions.delete("a").await.unwrap();
        let ids = sessions.user_sessions("user-1").await.unwrap();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let sessions = store();
        sessions
            .create(None, Some("a".to_string()), None)
            .await
            .unwrap();
        sessions
            .create(None, Some("b".to_string()), None)
            .await
            .unwrap();

        let mut active = sessions.list_active().await.unwrap();
        active.sort();
        assert_eq!(active, vec!["a", "b"]);
        assert_eq!(sessions.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_stale_sessions() {
        let sessions = SessionStore::new(Arc::new(KvStore::in_memory()), 1);
        sessions
            .create(None, Some("stale".to_string()), None)
            .await
            .unwrap();

        // Backdate the session past its TTL.
        let mut session = sessions.get("stale").await.unwrap().unwrap();
        session.last_activity -= 10.0;
        sessions
            .kv
            .json_set(&SessionStore::session_key("stale"), &session, None)
            .await
            .unwrap();

        let removed = sessions.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(sessions.get("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_refreshes_activity() {
        let sessions = store();
        sessions
            .create(None, Some("s".to_string()), None)
            .await
            .unwrap();
        let before = sessions.get("s").await.unwrap().unwrap().last_activity;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(sessions.extend("s").await.unwrap());
        let after = sessions.get("s").await.unwrap().unwrap().last_activity;
        assert!(after > before);
        assert!(!sessions.extend("missing").await.unwrap());
    }
}
