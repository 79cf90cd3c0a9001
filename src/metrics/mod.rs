//! Metrics collection module
//!
//! Tracks per-source call counts, error kinds and latency. Observability
//! only: nothing in the request path reads these numbers back.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Latency samples kept per source
const LATENCY_WINDOW: usize = 100;

#[derive(Default)]
struct SourceCounters {
    calls: u64,
    successes: u64,
    errors: BTreeMap<String, u64>,
    latencies: VecDeque<u64>,
}

/// Process-wide metrics collector
pub struct Metrics {
    /// Orchestrated operations (one per tool call)
    total_operations: AtomicU64,
    sources: RwLock<HashMap<String, SourceCounters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_operations: AtomicU64::new(0),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Count one orchestrated operation
    pub fn inc_operation(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful source call
    pub fn record_success(&self, source: &str, time_ms: u64) {
        let mut sources = self.sources.write();
        let counters = sources.entry(source.to_string()).or_default();
        counters.calls += 1;
        counters.successes += 1;
        Self::push_latency(counters, time_ms);
    }

    /// Record a failed source call under its error kind
    pub fn record_error(&self, source: &str, kind: &str, time_ms: u64) {
        let mut sources = self.sources.write();
        let counters = sources.entry(source.to_string()).or_default();
        counters.calls += 1;
        *counters.errors.entry(kind.to_string()).or_insert(0) += 1;
        Self::push_latency(counters, time_ms);
    }

    fn push_latency(counters: &mut SourceCounters, time_ms: u64) {
        if counters.latencies.len() >= LATENCY_WINDOW {
            counters.latencies.pop_front();
        }
        counters.latencies.push_back(time_ms);
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    /// Average latency over the recent window
    pub fn avg_response_time(&self, source: &str) -> Option<u64> {
        let sources = self.sources.read();
        sources.get(source).and_then(|c| {
            if c.latencies.is_empty() {
                None
            } else {
                Some(c.latencies.iter().sum::<u64>() / c.latencies.len() as u64)
            }
        })
    }

    /// Success percentage; 100 when nothing was recorded
    pub fn reliability(&self, source: &str) -> f64 {
        let sources = self.sources.read();
        match sources.get(source) {
            Some(c) if c.calls > 0 => (c.successes as f64 / c.calls as f64) * 100.0,
            _ => 100.0,
        }
    }

    /// Snapshot of every source
    pub fn snapshot(&self) -> MetricsSnapshot {
        let names: Vec<String> = self.sources.read().keys().cloned().collect();
        let mut sources = BTreeMap::new();

        for name in names {
            let (calls, errors) = {
                let guard = self.sources.read();
                match guard.get(&name) {
                    Some(c) => (c.calls, c.errors.clone()),
                    None => continue,
                }
            };
            sources.insert(
                name.clone(),
                SourceStats {
                    calls,
                    errors,
                    avg_response_time_ms: self.avg_response_time(&name),
                    reliability: self.reliability(&name),
                },
            );
        }

        MetricsSnapshot {
            total_operations: self.total_operations(),
            sources,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for a single source
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub calls: u64,
    pub errors: BTreeMap<String, u64>,
    pub avg_response_time_ms: Option<u64>,
    pub reliability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_operations: u64,
    pub sources: BTreeMap<String, SourceStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        metrics.inc_operation();
        metrics.record_success("insee", 100);
        metrics.record_error("insee", "network_or_timeout", 300);

        assert_eq!(metrics.total_operations(), 1);
        assert_eq!(metrics.avg_response_time("insee"), Some(200));
        assert_eq!(metrics.reliability("insee"), 50.0);
        assert_eq!(metrics.reliability("unseen"), 100.0);

        let snapshot = metrics.snapshot();
        let insee = &snapshot.sources["insee"];
        assert_eq!(insee.calls, 2);
        assert_eq!(insee.errors["network_or_timeout"], 1);
    }

    #[test]
    fn test_latency_window() {
        let metrics = Metrics::new();
        for _ in 0..LATENCY_WINDOW {
            metrics.record_success("inpi", 1000);
        }
        for _ in 0..LATENCY_WINDOW {
            metrics.record_success("inpi", 10);
        }
        assert_eq!(metrics.avg_response_time("inpi"), Some(10));
    }
}
