use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use extract::ModelTier;

use crate::engine::DocumentStatus;

/// Process-wide decision counters, snapshotted for `/metrics` and run summaries.
#[derive(Default)]
pub struct Metrics {
    // Documents by final status
    accepted_primary: AtomicUsize,
    accepted_understudy: AtomicUsize,
    rejected: AtomicUsize,
    escalation_failed: AtomicUsize,
    errors: AtomicUsize,
    skipped: AtomicUsize,

    escalations: AtomicUsize,
    gate_failures: AtomicUsize,

    // Calls (timing in microseconds)
    primary_calls: AtomicUsize,
    understudy_calls: AtomicUsize,
    total_call_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, tier: ModelTier, duration: Duration) {
        match tier {
            ModelTier::Primary => self.primary_calls.fetch_add(1, Ordering::Relaxed),
            ModelTier::Understudy => self.understudy_calls.fetch_add(1, Ordering::Relaxed),
        };
        self.total_call_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_failure(&self) {
        self.gate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_document(&self, status: DocumentStatus, winner: Option<ModelTier>) {
        let counter = match (status, winner) {
            (DocumentStatus::Accepted, Some(ModelTier::Understudy)) => &self.accepted_understudy,
            (DocumentStatus::Accepted, _) => &self.accepted_primary,
            (DocumentStatus::Rejected, _) => &self.rejected,
            (DocumentStatus::EscalationFailed, _) => &self.escalation_failed,
            (DocumentStatus::Error, _) => &self.errors,
            (DocumentStatus::Skipped, _) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let primary_calls = self.primary_calls.load(Ordering::Relaxed);
        let understudy_calls = self.understudy_calls.load(Ordering::Relaxed);
        let calls = primary_calls + understudy_calls;
        let total_us = self.total_call_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            accepted_primary: self.accepted_primary.load(Ordering::Relaxed),
            accepted_understudy: self.accepted_understudy.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            escalation_failed: self.escalation_failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            gate_failures: self.gate_failures.load(Ordering::Relaxed),
            primary_calls,
            understudy_calls,
            avg_call_time_ms: if calls > 0 {
                total_us / calls as f64 / 1000.0 // Convert to ms
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub accepted_primary: usize,
    pub accepted_understudy: usize,
    pub rejected: usize,
    pub escalation_failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub escalations: usize,
    pub gate_failures: usize,
    pub primary_calls: usize,
    pub understudy_calls: usize,
    pub avg_call_time_ms: f64,
}

impl MetricsSnapshot {
    /// Share of escalations among documents that reached a decision.
    pub fn escalation_rate(&self) -> f64 {
        let decided = self.accepted_primary + self.accepted_understudy + self.rejected + self.escalation_failed;
        if decided == 0 {
            0.0
        } else {
            self.escalations as f64 / decided as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts_by_status_and_tier() {
        let metrics = Metrics::new();
        metrics.record_call(ModelTier::Primary, Duration::from_millis(10));
        metrics.record_call(ModelTier::Primary, Duration::from_millis(30));
        metrics.record_call(ModelTier::Understudy, Duration::from_millis(50));
        metrics.record_escalation();
        metrics.record_document(DocumentStatus::Accepted, Some(ModelTier::Primary));
        metrics.record_document(DocumentStatus::Accepted, Some(ModelTier::Understudy));
        metrics.record_document(DocumentStatus::Skipped, None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.accepted_primary, 1);
        assert_eq!(snapshot.accepted_understudy, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.primary_calls, 2);
        assert_eq!(snapshot.understudy_calls, 1);
        assert!((snapshot.avg_call_time_ms - 30.0).abs() < 1e-9);
        assert!((snapshot.escalation_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.avg_call_time_ms, 0.0);
        assert_eq!(snapshot.escalation_rate(), 0.0);
    }
}
