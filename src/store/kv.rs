//! Key/value store with a transparent in-memory fallback.
//!
//! Binds to Redis at startup (5 s connect and response timeouts); if the
//! connection or the ping fails the process switches to a single
//! process-local map implementing the same surface. The fallback does not
//! honor TTLs — expiry of sessions is covered by the periodic cleanup sweep,
//! and fallback cache entries simply live until restart.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::StoreError;

/// Connect timeout for the initial Redis binding.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-command response timeout.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Active backend, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct KvHealth {
    pub status: &'static str,
    pub detail: String,
}

enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

/// Process-local fallback implementing the same surface as Redis.
#[derive(Default)]
struct MemoryStore {
    strings: DashMap<String, String>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
}

/// Abstraction over the remote cache with a process-local fallback.
pub struct KvStore {
    backend: Backend,
}

impl KvStore {
    /// Bind to Redis, falling back to the in-memory store on failure.
    pub async fn connect(redis_url: &str) -> Self {
        match Self::try_redis(redis_url).await {
            Ok(manager) => {
                info!("redis connected: {}", redact(redis_url));
                Self {
                    backend: Backend::Redis(manager),
                }
            }
            Err(e) => {
                warn!("redis connection failed ({e}), using in-memory fallback");
                Self::in_memory()
            }
        }
    }

    /// Construct a purely in-memory store (used by tests and as fallback).
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::default()),
        }
    }

    async fn try_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(CONNECT_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT)
            .set_number_of_retries(1);

        let mut manager =
            tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new_with_config(client, config))
                .await
                .map_err(|_| {
                    StoreError::Redis(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "connect timed out",
                    )))
                })??;

        redis::cmd("PING").query_async::<()>(&mut manager).await?;
        Ok(manager)
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.backend, Backend::Memory(_))
    }

    pub async fn health_check(&self) -> KvHealth {
        match &self.backend {
            Backend::Memory(store) => KvHealth {
                status: "fallback",
                detail: format!("in-memory storage, {} keys", store.strings.len()),
            },
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match redis::cmd("PING").query_async::<String>(&mut conn).await {
                    Ok(_) => KvHealth {
                        status: "connected",
                        detail: "redis responding".to_string(),
                    },
                    Err(e) => KvHealth {
                        status: "error",
                        detail: e.to_string(),
                    },
                }
            }
        }
    }

    // Key-value operations

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.strings.get(key).map(|v| v.clone())),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.get(key).await?)
            }
        }
    }

    /// Set a key with an optional TTL in seconds.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                store.strings.insert(key.to_string(), value.to_string());
                Ok(())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match ttl {
                    Some(secs) => conn.set_ex::<_, _, ()>(key, value, secs).await?,
                    None => conn.set::<_, _, ()>(key, value).await?,
                }
                Ok(())
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.strings.remove(key).is_some()
                || store.hashes.remove(key).is_some()
                || store.sets.remove(key).is_some()),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let removed: i64 = conn.del(key).await?;
                Ok(removed > 0)
            }
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.strings.contains_key(key)),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.exists(key).await?)
            }
        }
    }

    /// Keys matching a glob-style pattern.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store
                .strings
                .iter()
                .map(|e| e.key().clone())
                .filter(|k| glob_match(pattern, k))
                .collect()),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.keys(pattern).await?)
            }
        }
    }

    /// Remaining TTL in seconds: -1 when no expiry, -2 when missing.
    pub async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(if store.strings.contains_key(key) { -1 } else { -2 }),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.ttl(key).await?)
            }
        }
    }

    // JSON convenience

    pub async fn json_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, "discarding undecodable JSON value: {e}");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn json_set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl).await
    }

    // Hash operations

    pub async fn hget(&self, name: &str, key: &str) -> Result<Option<String>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                Ok(store.hashes.get(name).and_then(|h| h.get(key).cloned()))
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.hget(name, key).await?)
            }
        }
    }

    pub async fn hset(&self, name: &str, key: &str, value: &str) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .hashes
                    .entry(name.to_string())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
                Ok(())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.hset::<_, _, _, ()>(name, key, value).await?;
                Ok(())
            }
        }
    }

    pub async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                Ok(store.hashes.get(name).map(|h| h.clone()).unwrap_or_default())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.hgetall(name).await?)
            }
        }
    }

    pub async fn hdel(&self, name: &str, key: &str) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                let removed = store
                    .hashes
                    .get_mut(name)
                    .map(|mut h| h.remove(key).is_some())
                    .unwrap_or(false);
                Ok(removed as usize)
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.hdel(name, key).await?)
            }
        }
    }

    // Set operations

    pub async fn sadd(&self, name: &str, member: &str) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                let added = store
                    .sets
                    .entry(name.to_string())
                    .or_default()
                    .insert(member.to_string());
                Ok(added as usize)
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.sadd(name, member).await?)
            }
        }
    }

    pub async fn srem(&self, name: &str, member: &str) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Memory(store) => {
                let removed = store
                    .sets
                    .get_mut(name)
                    .map(|mut s| s.remove(member))
                    .unwrap_or(false);
                Ok(removed as usize)
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.srem(name, member).await?)
            }
        }
    }

    pub async fn smembers(&self, name: &str) -> Result<Vec<String>, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store
                .sets
                .get(name)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.smembers(name).await?)
            }
        }
    }
}

/// Minimal glob matcher covering the patterns the stores use
/// (`prefix:*`, `*`, literal keys).
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut remaining = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(part) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Strip credentials from a Redis URL for logging.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}:{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("unknown"),
            parsed.port().unwrap_or(6379)
        ),
        Err(_) => "redis://<unparseable>".to_string(),
    }
}
