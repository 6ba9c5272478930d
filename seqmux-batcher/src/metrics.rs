//! Scheduler metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for scheduler activity, shared between the
/// coordinator and every worker.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Requests that passed admission.
    pub requests_admitted: AtomicU64,

    /// Requests rejected at admission (bad batch size, zero correlation
    /// id, missing START).
    pub requests_rejected: AtomicU64,

    /// START requests that collided with a live sequence of the same
    /// correlation id.
    pub sequence_conflicts: AtomicU64,

    /// Slots handed to a starting sequence from the ready stack.
    pub slots_acquired: AtomicU64,

    /// Slots returned to the ready stack after a sequence ended.
    pub slots_released: AtomicU64,

    /// Backlogged sequences promoted into a freed slot.
    pub backlog_promotions: AtomicU64,

    /// Batches handed to the backend.
    pub batches_dispatched: AtomicU64,

    /// Payloads across all dispatched batches, including padding.
    pub batched_payloads: AtomicU64,

    /// Not-ready placeholder payloads used to pad batches.
    pub null_payloads: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.sequence_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slot_acquired(&self) {
        self.slots_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slot_released(&self) {
        self.slots_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backlog_promotion(&self) {
        self.backlog_promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, width: usize, padding: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.batched_payloads.fetch_add(width as u64, Ordering::Relaxed);
        self.null_payloads.fetch_add(padding as u64, Ordering::Relaxed);
    }

    /// Average payloads per dispatched batch.
    pub fn avg_batch_width(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.batched_payloads.load(Ordering::Relaxed) as f64 / batches as f64
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_admitted: self.requests_admitted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            sequence_conflicts: self.sequence_conflicts.load(Ordering::Relaxed),
            slots_acquired: self.slots_acquired.load(Ordering::Relaxed),
            slots_released: self.slots_released.load(Ordering::Relaxed),
            backlog_promotions: self.backlog_promotions.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batched_payloads: self.batched_payloads.load(Ordering::Relaxed),
            null_payloads: self.null_payloads.load(Ordering::Relaxed),
            avg_batch_width: self.avg_batch_width(),
        }
    }
}

/// Snapshot of scheduler metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_admitted: u64,
    pub requests_rejected: u64,
    pub sequence_conflicts: u64,
    pub slots_acquired: u64,
    pub slots_released: u64,
    pub backlog_promotions: u64,
    pub batches_dispatched: u64,
    pub batched_payloads: u64,
    pub null_payloads: u64,
    pub avg_batch_width: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_accounting() {
        let metrics = SchedulerMetrics::new();

        metrics.record_batch(2, 0);
        metrics.record_batch(2, 1);
        metrics.record_batch(1, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_dispatched, 3);
        assert_eq!(snapshot.batched_payloads, 5);
        assert_eq!(snapshot.null_payloads, 1);
        assert!((snapshot.avg_batch_width - 5.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_slot_accounting() {
        let metrics = SchedulerMetrics::new();
        metrics.record_slot_acquired();
        metrics.record_slot_acquired();
        metrics.record_slot_released();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.slots_acquired, 2);
        assert_eq!(snapshot.slots_released, 1);
    }

    #[test]
    fn test_avg_batch_width_empty() {
        let metrics = SchedulerMetrics::new();
        assert_eq!(metrics.avg_batch_width(), 0.0);
    }
}
