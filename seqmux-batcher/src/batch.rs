//! Batches handed to the backend, and batch completion.

use std::sync::Arc;

use seqmux_core::{Payload, Status};

/// Backend entry point: invoked on the worker thread with one assembled
/// batch. The backend stamps per-payload statuses through
/// [`Batch::payloads_mut`] and finishes by calling [`Batch::complete`],
/// from any thread.
pub type OnSchedule = Arc<dyn Fn(u32, Batch) + Send + Sync>;

/// One assembled batch: payloads in slot order, empty slots padded with
/// not-ready placeholders so live payloads stay aligned to their slots.
pub struct Batch {
    batcher_idx: u32,
    payloads: Vec<Payload>,
}

impl Batch {
    pub(crate) fn new(batcher_idx: u32, payloads: Vec<Payload>) -> Self {
        Self { batcher_idx, payloads }
    }

    /// Index of the runner this batch was assembled for.
    pub fn batcher_idx(&self) -> u32 {
        self.batcher_idx
    }

    /// Batch width, padding included.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Payloads in slot order.
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    /// Mutable payloads, for the backend to stamp per-payload statuses.
    pub fn payloads_mut(&mut self) -> &mut [Payload] {
        &mut self.payloads
    }

    /// Complete every payload with its final status.
    ///
    /// With an OK overall status each payload resolves to its own stamped
    /// status; a failed overall status overrides every payload. A failure
    /// on a silent payload (a padding placeholder, which has no caller to
    /// report to) likely indicates a batch-wide alignment problem, so it
    /// escalates to the whole batch. Exactly one successful payload per
    /// batch is credited with the model execution.
    pub fn complete(self, mut status: Status) {
        if status.is_ok() {
            for payload in &self.payloads {
                if payload.is_silent() {
                    if let Err(e) = payload.resolved_status() {
                        status = Err(e);
                        break;
                    }
                }
            }
        }

        let mut credited = false;
        for payload in self.payloads {
            let final_status = match &status {
                Ok(()) => payload.resolved_status(),
                Err(e) => Err(e.clone()),
            };

            if !credited && final_status.is_ok() {
                if let Some(stats) = payload.stats() {
                    stats.set_model_execution_count(1);
                    credited = true;
                }
            }

            payload.complete(final_status);
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("batcher_idx", &self.batcher_idx)
            .field("len", &self.payloads.len())
            .finish()
    }
}
