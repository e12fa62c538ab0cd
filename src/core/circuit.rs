//! Circuit breaker for remote provider resilience.
//!
//! Each remote dependency gets a named breaker that tracks consecutive
//! failures and fast-fails while the dependency looks unhealthy.
//!
//! States:
//! - `Closed`: normal operation, requests pass through
//! - `Open`: provider failing, requests blocked
//! - `HalfOpen`: recovery testing, a probe request is allowed through
//!
//! Transitions:
//! - `Closed → Open` after `failure_threshold` consecutive failures
//! - `Open → HalfOpen` once `recovery_timeout` has elapsed and `allow()` is called
//! - `HalfOpen → Closed` after `success_threshold` successes
//! - `HalfOpen → Open` on any failure

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Breaker tuning parameters.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long to wait before testing recovery
    pub recovery_timeout: Duration,
    /// Successes needed in half-open to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Observable breaker state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    /// Seconds since the last state change
    pub seconds_in_state: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    half_open_successes: u32,
    state_changed_at: Instant,
}

impl Inner {
    fn transition_to(&mut self, name: &str, new_state: CircuitState) {
        let old_state = self.state;
        self.state = new_state;
        self.state_changed_at = Instant::now();
        self.half_open_successes = 0;
        info!(circuit = name, "circuit {old_state} -> {new_state}");
    }
}

/// A named breaker guarding a single remote dependency.
///
/// State mutations are serialized under one mutex per breaker; the lock is
/// never held across I/O.
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                consecutive_failures: 0,
                half_open_successes: 0,
                state_changed_at: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true iff a call may proceed right now.
    ///
    /// An open circuit whose recovery timeout has elapsed transitions to
    /// half-open and lets the probe request through.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.state_changed_at.elapsed() >= self.config.recovery_timeout {
                    inner.transition_to(&self.name, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        inner.successful_requests += 1;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.transition_to(&self.name, CircuitState::Closed);
                info!(circuit = %self.name, "circuit recovered");
            }
        }
    }

    pub fn record_failure(&self, error: &dyn std::fmt::Display) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        inner.failed_requests += 1;
        inner.consecutive_failures += 1;

        let error_string = error.to_string();
        let message = truncate(&error_string, 100);
        warn!(
            circuit = %self.name,
            consecutive = inner.consecutive_failures,
            "circuit failure: {message}"
        );

        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition_to(&self.name, CircuitState::Open);
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.transition_to(&self.name, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_requests > 0 {
            inner.failed_requests as f64 / inner.total_requests as f64 * 100.0
        } else {
            0.0
        };
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            consecutive_failures: inner.consecutive_failures,
            failure_rate,
            seconds_in_state: inner.state_changed_at.elapsed().as_secs(),
        }
    }

    /// Reset the breaker to closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.total_requests = 0;
        inner.successful_requests = 0;
        inner.failed_requests = 0;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.state_changed_at = Instant::now();
        info!(circuit = %self.name, "circuit reset to closed");
    }

    #[cfg(test)]
    fn force_recovery_elapsed(&self) {
        let mut inner = self.inner.lock();
        inner.state_changed_at = Instant::now() - self.config.recovery_timeout;
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::with_config(
            "test",
            CircuitConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                success_threshold: 1,
            },
        )
    }

    #[test]
    fn test_starts_closed_and_allows() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = breaker();
        cb.record_failure(&"boom");
        cb.record_failure(&"boom");
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure(&"boom");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker();
        cb.record_failure(&"boom");
        cb.record_failure(&"boom");
        cb.record_success();
        cb.record_failure(&"boom");
        cb.record_failure(&"boom");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_recovery_cycle() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure(&"boom");
        }
        assert!(!cb.allow());

        // After the recovery timeout, the first allow() transitions to half-open.
        cb.force_recovery_elapsed();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // One success closes the circuit (success_threshold = 1).
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure(&"boom");
        }
        cb.force_recovery_elapsed();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(&"still down");
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn test_snapshot_counters() {
        let cb = breaker();
        cb.record_success();
        cb.record_success();
        cb.record_failure(&"boom");

        let snap = cb.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.successful_requests, 2);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.consecutive_failures, 1);
        assert!((snap.failure_rate - 100.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure(&"boom");
        }
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().total_requests, 0);
        assert!(cb.allow());
    }
}
