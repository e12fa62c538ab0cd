//! Per-turn latency metrics.
//!
//! Each turn gets a correlation ID; the orchestrator marks stage boundaries
//! (stt/llm/tts/search) and finalizes the record with its outcome. The
//! collector keeps a bounded ring of the most recent records and serves
//! percentile aggregates to the admin surface. Discarding an in-flight
//! request (the empty-transcript case) is explicit and touches no counters.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// Default ring capacity.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Pipeline stages tracked per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Stt,
    Llm,
    Tts,
    Search,
}

/// Finalized metrics for one turn.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub correlation_id: String,
    pub session_id: String,
    pub user_id: String,
    pub stt_ms: f64,
    pub llm_ms: f64,
    pub tts_ms: f64,
    pub search_ms: f64,
    pub total_ms: f64,
    pub success: bool,
    pub error: Option<String>,
    pub used_search: bool,
}

#[derive(Debug)]
struct InFlight {
    session_id: String,
    user_id: String,
    started: Instant,
    stages: HashMap<Stage, (Instant, Option<Instant>)>,
}

#[derive(Default)]
struct Inner {
    history: VecDeque<TurnRecord>,
    in_flight: HashMap<String, InFlight>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
}

/// Aggregate stats for one latency series.
#[derive(Debug, Clone, Serialize, Default)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
}

/// Aggregated statistics over the most recent turns.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub active_sessions: usize,
    pub error_rate: f64,
    pub latencies: HashMap<&'static str, LatencyStats>,
    pub search_usage_rate: f64,
}

/// Bounded ring of turn records with stage timing.
pub struct MetricsCollector {
    max_history: usize,
    inner: Mutex<Inner>,
    active_sessions: AtomicUsize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            inner: Mutex::new(Inner::default()),
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Begin tracking a turn.
    pub fn start_request(&self, correlation_id: &str, session_id: &str, user_id: &str) {
        let mut inner = self.inner.lock();
        inner.in_flight.insert(
            correlation_id.to_string(),
            InFlight {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                started: Instant::now(),
                stages: HashMap::new(),
            },
        );
        debug!(correlation_id, "started tracking turn");
    }

    /// Mark a stage start. The first call per stage wins.
    pub fn start_stage(&self, correlation_id: &str, stage: Stage) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.in_flight.get_mut(correlation_id) {
            entry
                .stages
                .entry(stage)
                .or_insert_with(|| (Instant::now(), None));
        }
    }

    /// Mark a stage end. Later calls extend the stage span.
    pub fn end_stage(&self, correlation_id: &str, stage: Stage) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.in_flight.get_mut(correlation_id)
            && let Some(times) = entry.stages.get_mut(&stage)
        {
            times.1 = Some(Instant::now());
        }
    }

    /// Finalize a turn and fold it into the ring and counters.
    pub fn end_request(
        &self,
        correlation_id: &str,
        success: bool,
        error: Option<&str>,
        used_search: bool,
    ) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.in_flight.remove(correlation_id) else {
            return;
        };

        let stage_ms = |stage: Stage| -> f64 {
            entry
                .stages
                .get(&stage)
                .and_then(|(start, end)| end.map(|e| e.duration_since(*start).as_secs_f64() * 1000.0))
                .unwrap_or(0.0)
        };

        let record = TurnRecord {
            correlation_id: correlation_id.to_string(),
            session_id: entry.session_id,
            user_id: entry.user_id,
            stt_ms: stage_ms(Stage::Stt),
            llm_ms: stage_ms(Stage::Llm),
            tts_ms: stage_ms(Stage::Tts),
            search_ms: stage_ms(Stage::Search),
            total_ms: entry.started.elapsed().as_secs_f64() * 1000.0,
            success,
            error: error.map(|e| e.to_string()),
            used_search,
        };

        info!(
            correlation_id,
            stt_ms = record.stt_ms as u64,
            llm_ms = record.llm_ms as u64,
            tts_ms = record.tts_ms as u64,
            total_ms = record.total_ms as u64,
            success,
            "turn complete"
        );

        inner.total_requests += 1;
        if success {
            inner.successful_requests += 1;
        } else {
            inner.failed_requests += 1;
        }

        inner.history.push_back(record);
        while inner.history.len() > self.max_history {
            inner.history.pop_front();
        }
    }

    /// Drop an in-flight turn without touching counters or the ring.
    pub fn discard_request(&self, correlation_id: &str) {
        let mut inner = self.inner.lock();
        if inner.in_flight.remove(correlation_id).is_some() {
            debug!(correlation_id, "discarded in-flight turn");
        }
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Aggregated stats over the last `last_n` records.
    pub fn stats(&self, last_n: usize) -> MetricsStats {
        let inner = self.inner.lock();
        let recent: Vec<&TurnRecord> = inner
            .history
            .iter()
            .rev()
            .take(last_n)
            .collect();

        let series = |f: fn(&TurnRecord) -> f64| -> Vec<f64> {
            recent.iter().map(|r| f(r)).filter(|&v| v > 0.0).collect()
        };

        let mut latencies = HashMap::new();
        latencies.insert("stt", latency_stats(&series(|r| r.stt_ms)));
        latencies.insert("llm", latency_stats(&series(|r| r.llm_ms)));
        latencies.insert("tts", latency_stats(&series(|r| r.tts_ms)));
        latencies.insert("search", latency_stats(&series(|r| r.search_ms)));
        latencies.insert("total", latency_stats(&series(|r| r.total_ms)));

        let search_count = recent.iter().filter(|r| r.used_search).count();

        MetricsStats {
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            active_sessions: self.active_sessions(),
            error_rate: if inner.total_requests > 0 {
                round2(inner.failed_requests as f64 / inner.total_requests as f64 * 100.0)
            } else {
                0.0
            },
            latencies,
            search_usage_rate: if recent.is_empty() {
                0.0
            } else {
                round2(search_count as f64 / recent.len() as f64 * 100.0)
            },
        }
    }

    /// The most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TurnRecord> {
        let inner = self.inner.lock();
        inner.history.iter().rev().take(limit).cloned().collect()
    }
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() as f64 * pct / 100.0) as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn latency_stats(values: &[f64]) -> LatencyStats {
    if values.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    LatencyStats {
        p50: round1(percentile(&sorted, 50.0)),
        p95: round1(percentile(&sorted, 95.0)),
        p99: round1(percentile(&sorted, 99.0)),
        avg: round1(mean),
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_full_turn_lifecycle() {
        let metrics = MetricsCollector::default();
        metrics.start_request("c1", "s1", "u1");
        metrics.start_stage("c1", Stage::Stt);
        std::thread::sleep(Duration::from_millis(5));
        metrics.end_stage("c1", Stage::Stt);
        metrics.end_request("c1", true, None, false);

        let records = metrics.recent(10);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.stt_ms >= 5.0);
        assert_eq!(record.llm_ms, 0.0);
        assert!(record.total_ms >= record.stt_ms);
        assert!(record.success);
    }

    #[test]
    fn test_stage_sum_bounded_by_total() {
        let metrics = MetricsCollector::default();
        metrics.start_request("c1", "s1", "u1");
        for stage in [Stage::Stt, Stage::Llm, Stage::Tts] {
            metrics.start_stage("c1", stage);
            std::thread::sleep(Duration::from_millis(2));
            metrics.end_stage("c1", stage);
        }
        metrics.end_request("c1", true, None, false);

        let record = &metrics.recent(1)[0];
        let stage_sum = record.stt_ms + record.llm_ms + record.tts_ms + record.search_ms;
        assert!(stage_sum <= record.total_ms + 0.5, "stages {stage_sum} > total {}", record.total_ms);
    }

    #[test]
    fn test_discard_touches_nothing() {
        let metrics = MetricsCollector::default();
        metrics.start_request("c1", "s1", "u1");
        metrics.discard_request("c1");

        let stats = metrics.stats(100);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.failed_requests, 0);
        assert!(metrics.recent(10).is_empty());
    }

    #[test]
    fn test_failure_counters() {
        let metrics = MetricsCollector::default();
        metrics.start_request("c1", "s1", "u1");
        metrics.end_request("c1", false, Some("interrupted"), false);

        let stats = metrics.stats(100);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.error_rate, 100.0);
        assert_eq!(metrics.recent(1)[0].error.as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_ring_is_bounded() {
        let metrics = MetricsCollector::new(5);
        for i in 0..10 {
            let id = format!("c{i}");
            metrics.start_request(&id, "s", "u");
            metrics.end_request(&id, true, None, false);
        }
        assert_eq!(metrics.recent(100).len(), 5);
        assert_eq!(metrics.recent(100)[0].correlation_id, "c9");
        // Counters keep the full totals.
        assert_eq!(metrics.stats(100).total_requests, 10);
    }

    #[test]
    fn test_percentiles() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let stats = latency_stats(&values);
        assert_eq!(stats.p50, 51.0);
        assert_eq!(stats.p95, 96.0);
        assert_eq!(stats.p99, 100.0);
        assert_eq!(stats.avg, 50.5);
    }

    #[test]
    fn test_search_usage_rate() {
        let metrics = MetricsCollector::default();
        for (i, used) in [true, false, false, true].iter().enumerate() {
            let id = format!("c{i}");
            metrics.start_request(&id, "s", "u");
            metrics.end_request(&id, true, None, *used);
        }
        let stats = metrics.stats(100);
        assert_eq!(stats.search_usage_rate, 50.0);
    }

    #[test]
    fn test_unknown_correlation_is_ignored() {
        let metrics = MetricsCollector::default();
        metrics.start_stage("missing", Stage::Stt);
        metrics.end_stage("missing", Stage::Stt);
        metrics.end_request("missing", true, None, false);
        assert_eq!(metrics.stats(100).total_requests, 0);
    }
}
