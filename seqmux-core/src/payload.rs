//! Payloads: one queued request with everything needed to execute and
//! complete it.

use std::sync::Arc;

use crate::error::Status;
use crate::request::{RequestProvider, ResponseProvider};
use crate::stats::{InferStats, RequestTimer};

/// Completion callback invoked with the request's final status, on the
/// worker thread (or inline on the caller thread for admission failures).
pub type CompletionFn = Box<dyn FnOnce(Status) + Send>;

/// One queued request.
///
/// A payload owns its providers; a provider is visited by at most one
/// thread at a time, which is what makes the per-step override rebinding
/// sound. Payloads without a completion callback are "silent": the null
/// placeholders that pad a batch. The backend stamps `status` /
/// `compute_status` per payload while executing a batch.
pub struct Payload {
    timer: Option<RequestTimer>,
    stats: Option<Arc<InferStats>>,
    request: Box<dyn RequestProvider>,
    response: Option<Box<dyn ResponseProvider>>,
    on_complete: Option<CompletionFn>,

    /// Per-payload status stamped by the backend before compute.
    pub status: Status,
    /// Per-payload status stamped by the backend during compute.
    pub compute_status: Status,
}

impl Payload {
    /// A live payload carrying a client request.
    pub fn new(
        timer: RequestTimer,
        stats: Arc<InferStats>,
        request: Box<dyn RequestProvider>,
        response: Box<dyn ResponseProvider>,
        on_complete: CompletionFn,
    ) -> Self {
        Self {
            timer: Some(timer),
            stats: Some(stats),
            request,
            response: Some(response),
            on_complete: Some(on_complete),
            status: Ok(()),
            compute_status: Ok(()),
        }
    }

    /// A placeholder payload padding an empty batch slot. Carries no
    /// stats, no response target, and no completion callback.
    pub fn null(request: Box<dyn RequestProvider>) -> Self {
        Self {
            timer: None,
            stats: None,
            request,
            response: None,
            on_complete: None,
            status: Ok(()),
            compute_status: Ok(()),
        }
    }

    pub fn request(&self) -> &dyn RequestProvider {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> &mut dyn RequestProvider {
        self.request.as_mut()
    }

    pub fn response(&self) -> Option<&dyn ResponseProvider> {
        self.response.as_deref()
    }

    pub fn stats(&self) -> Option<&Arc<InferStats>> {
        self.stats.as_ref()
    }

    /// Whether this payload has no completion callback (a null
    /// placeholder). A silent payload's failure has nowhere to be
    /// reported and escalates to the whole batch.
    pub fn is_silent(&self) -> bool {
        self.on_complete.is_none()
    }

    /// Record the transition from queued to batched: freezes the queue
    /// timer and charges the wait to the stats handle.
    pub fn mark_dequeued(&mut self) {
        if let Some(timer) = self.timer.as_mut() {
            timer.mark_dequeued();
            if let Some(stats) = &self.stats {
                stats.record_queue_wait(timer.queue_wait());
            }
        }
    }

    /// The payload's own final status: the pre-compute status if it
    /// failed, otherwise the compute status.
    pub fn resolved_status(&self) -> Status {
        if self.status.is_err() {
            self.status.clone()
        } else {
            self.compute_status.clone()
        }
    }

    /// Invoke the completion callback, if any, with the final status.
    pub fn complete(self, final_status: Status) {
        if let Some(on_complete) = self.on_complete {
            on_complete(final_status);
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("correlation_id", &self.request.request_header().correlation_id)
            .field("silent", &self.is_silent())
            .field("status", &self.status)
            .field("compute_status", &self.compute_status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::SchedulerError;
    use crate::request::{flags, InferenceRequest, InferenceResponse, NullRequest, RequestHeader};

    fn live_payload(on_complete: CompletionFn) -> Payload {
        let header = RequestHeader::new(1, 1, flags::SEQUENCE_START);
        Payload::new(
            RequestTimer::start(),
            Arc::new(InferStats::new()),
            Box::new(InferenceRequest::new("m", header)),
            Box::new(InferenceResponse),
            on_complete,
        )
    }

    #[test]
    fn test_silent_detection() {
        let live = live_payload(Box::new(|_| {}));
        assert!(!live.is_silent());

        let header = RequestHeader::new(1, 1, 0);
        let null = Payload::null(Box::new(NullRequest::new(header, "m")));
        assert!(null.is_silent());
        assert!(null.stats().is_none());
        assert!(null.response().is_none());
    }

    #[test]
    fn test_resolved_status_prefers_pre_compute_failure() {
        let mut payload = live_payload(Box::new(|_| {}));
        payload.compute_status = Err(SchedulerError::backend("compute"));
        payload.status = Err(SchedulerError::backend("input"));
        assert_eq!(payload.resolved_status(), Err(SchedulerError::backend("input")));

        let mut payload = live_payload(Box::new(|_| {}));
        payload.compute_status = Err(SchedulerError::backend("compute"));
        assert_eq!(payload.resolved_status(), Err(SchedulerError::backend("compute")));
    }

    #[test]
    fn test_complete_invokes_callback() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let payload = live_payload(Box::new(move |status| {
            assert!(status.is_ok());
            flag.store(true, Ordering::SeqCst);
        }));
        payload.complete(Ok(()));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mark_dequeued_charges_stats() {
        let stats = Arc::new(InferStats::new());
        let header = RequestHeader::new(1, 1, flags::SEQUENCE_START);
        let mut payload = Payload::new(
            RequestTimer::start(),
            stats.clone(),
            Box::new(InferenceRequest::new("m", header)),
            Box::new(InferenceResponse),
            Box::new(|_| {}),
        );
        payload.mark_dequeued();
        // Instant resolution may floor to zero, but the call must not panic
        // and must freeze the timer.
        let first = stats.queue_wait();
        payload.mark_dequeued();
        assert!(stats.queue_wait() >= first);
    }
}
