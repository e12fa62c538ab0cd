//! Background maintenance tasks.
//!
//! One periodic task sweeps expired sessions; the sweep is what enforces
//! TTLs when the state store is running on the in-memory fallback. Start
//! and stop are idempotent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::SessionStore;

/// Sweep interval (5 minutes).
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Background task runner for session maintenance.
#[derive(Default)]
pub struct BackgroundTasks {
    inner: Mutex<Option<Running>>,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the cleanup loop. A second call is a no-op.
    pub fn start(&self, sessions: Arc<SessionStore>) {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(CLEANUP_INTERVAL) => {
                        match sessions.cleanup_expired().await {
                            Ok(removed) => {
                                let active = sessions.count().await.unwrap_or(0);
                                info!(active, removed, "session sweep complete");
                            }
                            Err(e) => error!("session sweep failed: {e}"),
                        }
                    }
                }
            }
        });

        *inner = Some(Running { token, handle });
        info!("background tasks started");
    }

    /// Stop the cleanup loop. A second call is a no-op.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(running) = inner.take() {
            running.token.cancel();
            running.handle.abort();
            info!("background tasks stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStore;

    fn sessions() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Arc::new(KvStore::in_memory()), 1800))
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let tasks = BackgroundTasks::new();
        assert!(!tasks.is_running());

        tasks.start(sessions());
        assert!(tasks.is_running());
        tasks.start(sessions());
        assert!(tasks.is_running());

        tasks.stop();
        assert!(!tasks.is_running());
        tasks.stop();
        assert!(!tasks.is_running());
    }
}
