//! State stores: the key/value layer with in-memory fallback and the
//! Redis-backed session store built on top of it.

pub mod kv;
pub mod session;

pub use kv::{KvHealth, KvStore};
pub use session::{SessionData, SessionState, SessionStore, SessionUpdate};

/// Errors raised by the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
