//! Per-request stats handles.
//!
//! A caller hands one [`InferStats`] per request into the scheduler. The
//! scheduler records queue-wait time when the request is pulled into a
//! batch, and credits exactly one model execution per batch to the first
//! successful payload that carries a handle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free stats for a single inference request.
#[derive(Debug, Default)]
pub struct InferStats {
    execution_count: AtomicU32,
    queue_wait_ns: AtomicU64,
}

impl InferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of model executions this request was credited with.
    pub fn set_model_execution_count(&self, count: u32) {
        self.execution_count.store(count, Ordering::Relaxed);
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Relaxed)
    }

    /// Record time the request spent queued before batch assembly.
    pub fn record_queue_wait(&self, wait: Duration) {
        self.queue_wait_ns
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_nanos(self.queue_wait_ns.load(Ordering::Relaxed))
    }
}

/// Timer tracking one request from enqueue to batch assembly.
#[derive(Debug)]
pub struct RequestTimer {
    queued_at: Instant,
    dequeued_at: Option<Instant>,
}

impl RequestTimer {
    /// Start timing; called when the request enters the scheduler.
    pub fn start() -> Self {
        Self { queued_at: Instant::now(), dequeued_at: None }
    }

    /// Mark the request as pulled out of its queue into a batch.
    pub fn mark_dequeued(&mut self) {
        self.dequeued_at = Some(Instant::now());
    }

    /// Time spent queued so far, frozen once the request is dequeued.
    pub fn queue_wait(&self) -> Duration {
        match self.dequeued_at {
            Some(at) => at.duration_since(self.queued_at),
            None => self.queued_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_count() {
        let stats = InferStats::new();
        assert_eq!(stats.execution_count(), 0);
        stats.set_model_execution_count(1);
        assert_eq!(stats.execution_count(), 1);
    }

    #[test]
    fn test_queue_wait_accumulates() {
        let stats = InferStats::new();
        stats.record_queue_wait(Duration::from_millis(3));
        stats.record_queue_wait(Duration::from_millis(2));
        assert_eq!(stats.queue_wait(), Duration::from_millis(5));
    }

    #[test]
    fn test_timer_freezes_on_dequeue() {
        let mut timer = RequestTimer::start();
        timer.mark_dequeued();
        let wait = timer.queue_wait();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.queue_wait(), wait);
    }
}
