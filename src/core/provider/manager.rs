//! Priority-ordered provider pool with automatic fallback.
//!
//! The manager holds adapters sorted by priority and routes each call to the
//! current provider, falling back through the remaining allowed providers
//! when a call fails. Circuit breakers gate which providers are eligible; an
//! open circuit is skipped without counting as a tried provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{ManagedProvider, ProviderError, ProviderKind};

/// Structured snapshot of a manager and its providers.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub provider_type: ProviderKind,
    pub current_provider: Option<String>,
    pub fallback_count: u64,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub available: bool,
    pub circuit: Value,
}

/// Manages multiple providers of one family with automatic fallback.
///
/// Generic over the family trait object (`dyn SttProvider`, `dyn
/// LlmProvider`, ...) so each family keeps its own operation signatures
/// while sharing the selection and failover algorithm.
pub struct ProviderManager<P: ManagedProvider + ?Sized> {
    kind: ProviderKind,
    providers: Vec<Arc<P>>,
    /// Index of the currently preferred provider. Reads are serialized
    /// against updates; the lock is never held across provider I/O.
    current: Mutex<Option<usize>>,
    fallback_count: AtomicU64,
}

impl<P: ManagedProvider + ?Sized> ProviderManager<P> {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            providers: Vec::new(),
            current: Mutex::new(None),
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Register a provider, keeping the pool sorted by priority.
    pub fn register(&mut self, provider: Arc<P>) {
        info!(
            kind = %self.kind,
            provider = provider.name(),
            priority = provider.priority(),
            "registered provider"
        );
        self.providers.push(provider);
        self.providers.sort_by_key(|p| p.priority());
        let mut current = self.current.lock();
        if current.is_none() {
            *current = Some(0);
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn providers(&self) -> &[Arc<P>] {
        &self.providers
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    pub fn current_name(&self) -> Option<String> {
        let current = self.current.lock();
        current.map(|idx| self.providers[idx].name().to_string())
    }

    fn is_allowed(&self, idx: usize) -> bool {
        let provider = &self.providers[idx];
        provider.enabled() && provider.circuit().allow()
    }

    /// Pick the next allowed provider not yet tried this call.
    fn next_candidate(&self, tried: &[String]) -> Option<usize> {
        // Prefer the current provider, then fall through priority order.
        let preferred = *self.current.lock();
        if let Some(idx) = preferred
            && !tried.iter().any(|n| n == self.providers[idx].name())
            && self.is_allowed(idx)
        {
            return Some(idx);
        }
        (0..self.providers.len()).find(|&idx| {
            !tried.iter().any(|n| n == self.providers[idx].name()) && self.is_allowed(idx)
        })
    }

    fn promote(&self, idx: usize) {
        let mut current = self.current.lock();
        if *current != Some(idx) {
            let old = current.map(|i| self.providers[i].name().to_string());
            info!(
                kind = %self.kind,
                from = old.as_deref().unwrap_or("none"),
                to = self.providers[idx].name(),
                "provider switched"
            );
            *current = Some(idx);
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Execute an operation against the pool with automatic fallback.
    ///
    /// Providers are tried in priority order starting from the current one,
    /// skipping open circuits. The first success is recorded on that
    /// provider's circuit and promotes it to current. When every provider
    /// has been tried or skipped, `AllProvidersFailed` carries the
    /// per-provider error summaries.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(Arc<P>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut tried: Vec<String> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();

        while let Some(idx) = self.next_candidate(&tried) {
            let provider = Arc::clone(&self.providers[idx]);
            tried.push(provider.name().to_string());

            debug!(kind = %self.kind, provider = provider.name(), "trying provider");
            match op(Arc::clone(&provider)).await {
                Ok(result) => {
                    provider.circuit().record_success();
                    self.promote(idx);
                    return Ok(result);
                }
                Err(e) => {
                    error!(kind = %self.kind, provider = provider.name(), "provider failed: {e}");
                    provider.circuit().record_failure(&e);
                    errors.push((provider.name().to_string(), truncate(&e.to_string(), 50)));
                }
            }
        }

        let summary = if errors.is_empty() {
            "no provider available".to_string()
        } else {
            errors
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(ProviderError::AllProvidersFailed {
            kind: self.kind,
            summary,
        })
    }

    /// Execute against a specific provider with no fallback.
    pub async fn execute_with<T, F, Fut>(&self, name: &str, op: F) -> Result<T, ProviderError>
    where
        F: FnOnce(Arc<P>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let idx = self
            .providers
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;

        if !self.is_allowed(idx) {
            return Err(ProviderError::Unavailable(name.to_string()));
        }

        let provider = Arc::clone(&self.providers[idx]);
        match op(provider.clone()).await {
            Ok(result) => {
                provider.circuit().record_success();
                Ok(result)
            }
            Err(e) => {
                provider.circuit().record_failure(&e);
                Err(e)
            }
        }
    }

    /// Run health checks on all providers.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for provider in &self.providers {
            let healthy = provider.health_check().await;
            results.insert(provider.name().to_string(), healthy);
        }
        results
    }

    /// Detailed status of the pool, including circuit snapshots.
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            provider_type: self.kind,
            current_provider: self.current_name(),
            fallback_count: self.fallback_count(),
            providers: self
                .providers
                .iter()
                .map(|p| ProviderStatus {
                    name: p.name().to_string(),
                    priority: p.priority(),
                    enabled: p.enabled(),
                    available: p.enabled() && p.circuit().state() != crate::core::circuit::CircuitState::Open,
                    circuit: serde_json::to_value(p.circuit().snapshot()).unwrap_or(Value::Null),
                })
                .collect(),
        }
    }

    /// Reset every provider circuit in the pool.
    pub fn reset_all(&self) {
        for provider in &self.providers {
            provider.circuit().reset();
        }
        info!(kind = %self.kind, "reset all circuits");
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
