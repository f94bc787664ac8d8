//! The metrics surface. This crate's stand-in for
//! `spark_core::observability::MetricsProvider`, kept minimal and
//! trait-object friendly so a host application can wire it into whatever
//! metrics backend it already runs (Prometheus, StatsD, OpenTelemetry).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Counters, histograms, and a gauge the run loop emits on every tick.
/// Every method has a no-op default so an implementor only overrides
/// what it actually records.
pub trait MetricsSink: Send + Sync + 'static {
    fn inc_envelopes(&self) {}
    fn inc_null_envelopes(&self) {}
    fn inc_processes(&self) {}
    fn inc_windows(&self) {}
    fn inc_commits(&self) {}
    fn inc_duplicate_callback(&self) {}
    fn inc_stuck_dispatch(&self) {}
    fn observe_choose_ns(&self, _nanos: u64) {}
    fn observe_block_ns(&self, _nanos: u64) {}
    fn observe_process_ns(&self, _nanos: u64) {}
    fn observe_window_ns(&self, _nanos: u64) {}
    fn observe_commit_ns(&self, _nanos: u64) {}
    fn observe_pending_messages(&self, _count: u64) {}
    fn set_utilization(&self, _ratio: f64) {}
}

/// Discards everything. The default when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

/// An in-memory sink for assertions in tests: counters by name, plus the
/// last-observed value of every histogram/gauge.
#[derive(Default)]
pub struct RecordingMetricsSink {
    counters: Mutex<HashMap<&'static str, u64>>,
    last_observed: Mutex<HashMap<&'static str, f64>>,
    total_observations: AtomicU64,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.last_observed.lock().get(name).copied()
    }

    pub fn total_observations(&self) -> u64 {
        self.total_observations.load(Ordering::Relaxed)
    }

    fn bump(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
    }

    fn record(&self, name: &'static str, value: f64) {
        self.last_observed.lock().insert(name, value);
        self.total_observations.fetch_add(1, Ordering::Relaxed);
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn inc_envelopes(&self) {
        self.bump("envelopes");
    }
    fn inc_null_envelopes(&self) {
        self.bump("null_envelopes");
    }
    fn inc_processes(&self) {
        self.bump("processes");
    }
    fn inc_windows(&self) {
        self.bump("windows");
    }
    fn inc_commits(&self) {
        self.bump("commits");
    }
    fn inc_duplicate_callback(&self) {
        self.bump("duplicate_callback");
    }
    fn inc_stuck_dispatch(&self) {
        self.bump("stuck_dispatch");
    }
    fn observe_choose_ns(&self, nanos: u64) {
        self.record("choose_ns", nanos as f64);
    }
    fn observe_block_ns(&self, nanos: u64) {
        self.record("block_ns", nanos as f64);
    }
    fn observe_process_ns(&self, nanos: u64) {
        self.record("process_ns", nanos as f64);
    }
    fn observe_window_ns(&self, nanos: u64) {
        self.record("window_ns", nanos as f64);
    }
    fn observe_commit_ns(&self, nanos: u64) {
        self.record("commit_ns", nanos as f64);
    }
    fn observe_pending_messages(&self, count: u64) {
        self.record("pending_messages", count as f64);
    }
    fn set_utilization(&self, ratio: f64) {
        self.record("utilization", ratio);
    }
}
