//! Semantic cache for LLM responses.
//!
//! Entries are keyed by a 16-hex-character digest of the query text and
//! indexed by the query's embedding: a lookup scans the membership index,
//! scores every stored embedding against the query by cosine similarity and
//! returns the best entry at or above the threshold.
//!
//! Layout in the KV store:
//! - `sem_cache:{digest}` - JSON response record
//! - `sem_emb:{digest}` - JSON embedding vector
//! - `sem_cache:index` - set of active digests
//!
//! All three writes carry the same TTL, chosen by classifying the query when
//! the caller does not supply one.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::core::embedding::{cosine_similarity, embed};
use crate::store::KvStore;

const CACHE_PREFIX: &str = "sem_cache:";
const EMBEDDING_PREFIX: &str = "sem_emb:";
const INDEX_KEY: &str = "sem_cache:index";

/// TTL classes for cached queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    /// Time-sensitive queries, 5 minutes
    Temporal,
    /// Current-events queries, 15 minutes
    Search,
    /// Factual queries, 2 hours
    Knowledge,
    /// Everything else, default TTL
    General,
}

const TEMPORAL_KEYWORDS: &[&str] = &["weather", "time", "today", "now", "current", "latest"];
const SEARCH_KEYWORDS: &[&str] = &["news", "happened", "recent", "update"];
const KNOWLEDGE_KEYWORDS: &[&str] = &["what is", "who is", "how to", "explain", "define"];

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: String,
    pub similarity: f32,
    pub original_query: String,
    pub cached_at: f64,
}

/// Hit/miss statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total: u64,
    pub hit_rate: f64,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    query: String,
    response: String,
    cached_at: f64,
    #[serde(default)]
    metadata: Value,
}

/// Embedding-indexed response cache with TTL classes.
pub struct SemanticCache {
    kv: Arc<KvStore>,
    similarity_threshold: f32,
    default_ttl: u64,
    stats: Mutex<(u64, u64)>,
}

impl SemanticCache {
    pub fn new(kv: Arc<KvStore>, similarity_threshold: f32, default_ttl: u64) -> Self {
        Self {
            kv,
            similarity_threshold,
            default_ttl,
            stats: Mutex::new((0, 0)),
        }
    }

    /// 16-hex-character digest of the query text.
    fn digest(query: &str) -> String {
        let hash = Sha256::digest(query.as_bytes());
        hex::encode(hash)[..16].to_string()
    }

    /// Classify a query into a TTL class by simple substring rules.
    pub fn classify_query(&self, query: &str) -> (QueryClass, u64) {
        let lower = query.to_lowercase();
        if TEMPORAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            (QueryClass::Temporal, 300)
        } else if SEARCH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            (QueryClass::Search, 900)
        } else if KNOWLEDGE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            (QueryClass::Knowledge, 7200)
        } else {
            (QueryClass::General, self.default_ttl)
        }
    }

    /// Look up the most similar cached query at or above the threshold.
    pub async fn get(&self, query: &str) -> Option<CacheHit> {
        match self.lookup(query).await {
            Ok(Some(hit)) => {
                self.stats.lock().0 += 1;
                info!(
                    similarity = hit.similarity,
                    query = %truncate(query, 50),
                    "cache hit"
                );
                Some(hit)
            }
            Ok(None) => {
                self.stats.lock().1 += 1;
                debug!(query = %truncate(query, 50), "cache miss");
                None
            }
            Err(e) => {
                self.stats.lock().1 += 1;
                error!("cache get error: {e}");
                None
            }
        }
    }

    async fn lookup(&self, query: &str) -> Result<Option<CacheHit>, crate::store::StoreError> {
        let query_embedding = embed(query);
        let digests = self.kv.smembers(INDEX_KEY).await?;
        if digests.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(String, f32)> = None;
        for digest in digests {
            let Some(stored): Option<Vec<f32>> = self
                .kv
                .json_get(&format!("{EMBEDDING_PREFIX}{digest}"))
                .await?
            else {
                continue;
            };

            let similarity = cosine_similarity(&query_embedding, &stored);
            if similarity >= self.similarity_threshold
                && best.as_ref().is_none_or(|(_, s)| similarity > *s)
            {
                best = Some((digest, similarity));
            }
        }

        let Some((digest, similarity)) = best else {
            return Ok(None);
        };
        let Some(record): Option<CacheRecord> =
            self.kv.json_get(&format!("{CACHE_PREFIX}{digest}")).await?
        else {
            return Ok(None);
        };

        Ok(Some(CacheHit {
            response: record.response,
            similarity,
            original_query: record.query,
            cached_at: record.cached_at,
        }))
    }

    /// Cache a response. When `ttl` is absent the query is classified.
    pub async fn set(
        &self,
        query: &str,
        response: &str,
        ttl: Option<u64>,
        metadata: Option<Value>,
    ) -> bool {
        let ttl = ttl.unwrap_or_else(|| {
            let (class, ttl) = self.classify_query(query);
            debug!(?class, ttl, "classified query");
            ttl
        });

        let digest = Self::digest(query);
        let record = CacheRecord {
            query: query.to_string(),
            response: response.to_string(),
            cached_at: epoch_secs(),
            metadata: metadata.unwrap_or(Value::Null),
        };
        let embedding = embed(query);

        let result = async {
            self.kv
                .json_set(&format!("{CACHE_PREFIX}{digest}"), &record, Some(ttl))
                .await?;
            self.kv
                .json_set(&format!("{EMBEDDING_PREFIX}{digest}"), &embedding, Some(ttl))
                .await?;
            self.kv.sadd(INDEX_KEY, &digest).await?;
            Ok::<_, crate::store::StoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(ttl, query = %truncate(query, 50), "cached response");
                true
            }
            Err(e) => {
                error!("cache set error: {e}");
                false
            }
        }
    }

    /// Delete a cached query's records and index membership.
    pub async fn invalidate(&self, query: &str) -> bool {
        let digest = Self::digest(query);
        let result = async {
            self.kv.delete(&format!("{CACHE_PREFIX}{digest}")).await?;
            self.kv.delete(&format!("{EMBEDDING_PREFIX}{digest}")).await?;
            self.kv.srem(INDEX_KEY, &digest).await?;
            Ok::<_, crate::store::StoreError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(query = %truncate(query, 50), "invalidated cache entry");
                true
            }
            Err(e) => {
                error!("cache invalidate error: {e}");
                false
            }
        }
    }

    /// Wipe all entries observed via the index. Returns the entry count.
    pub async fn clear(&self) -> usize {
        let digests = match self.kv.smembers(INDEX_KEY).await {
            Ok(d) => d,
            Err(e) => {
                error!("cache clear error: {e}");
                return 0;
            }
        };

        let mut deleted = 0;
        for digest in &digests {
            let _ = self.kv.delete(&format!("{CACHE_PREFIX}{digest}")).await;
            let _ = self.kv.delete(&format!("{EMBEDDING_PREFIX}{digest}")).await;
            deleted += 1;
        }
        let _ = self.kv.delete(INDEX_KEY).await;

        *self.stats.lock() = (0, 0);
        info!(deleted, "cleared semantic cache");
        deleted
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = *self.stats.lock();
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            total,
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
