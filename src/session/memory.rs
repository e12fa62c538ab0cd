//! Long-term conversation memory seam.
//!
//! Relational persistence of conversation history and summaries lives
//! outside this gateway; the pipeline only needs a best-effort sink to hand
//! committed messages to. The default implementation just logs.

use async_trait::async_trait;
use tracing::debug;

use crate::core::llm::Role;

/// Best-effort sink for committed conversation messages.
#[async_trait]
pub trait MemorySink: Send + Sync {
    /// Persist one committed message. Failures must be swallowed by the
    /// implementation; the turn pipeline never blocks on memory.
    async fn save_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
        used_search: bool,
    );
}

/// Logging no-op sink used when no memory backend is wired in.
pub struct NoopMemory;

#[async_trait]
impl MemorySink for NoopMemory {
    async fn save_message(
        &self,
        session_id: &str,
        _user_id: &str,
        role: Role,
        content: &str,
        _used_search: bool,
    ) {
        debug!(
            session_id,
            ?role,
            chars = content.len(),
            "memory sink disabled, dropping message"
        );
    }
}
