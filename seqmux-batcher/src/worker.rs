//! Per-runner slot batcher and its worker thread.
//!
//! Each batcher owns one queue per slot and a dedicated thread that, per
//! step, pops at most one payload per slot, pads idle slots with
//! not-ready placeholders, rebinds the control overrides, and invokes the
//! backend with the assembled batch. The worker sleeps on a condition
//! variable while its queues are empty and is woken by the next enqueue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use seqmux_core::{NullRequest, Payload, RequestHeader, RequestProvider, SchedulerError};

use crate::batch::{Batch, OnSchedule};
use crate::control::ControlOverrides;
use crate::metrics::SchedulerMetrics;
use crate::scheduler::{BatchSlot, SchedulerCore};

/// How long an idle worker sleeps before rechecking its queues.
const DEFAULT_WAIT: Duration = Duration::from_millis(500);

/// Poll interval while the debug-delay knob is holding the worker back.
const DELAY_POLL: Duration = Duration::from_millis(10);

/// Per-batcher state behind the batch lock.
struct BatchState {
    /// One FIFO of payloads per slot.
    queues: Vec<VecDeque<Payload>>,
    /// Whether each slot currently holds a sequence.
    active_slots: Vec<bool>,
    /// Greatest active slot index, or -1. Batches are assembled at width
    /// `max_active_slot + 1` instead of always padding to full width.
    max_active_slot: i32,
    /// Header captured from the first enqueue, used to synthesize
    /// placeholder requests with matching shape.
    null_request_header: Option<RequestHeader>,
    /// Worker is parked on the condvar; enqueues should notify.
    idle: bool,
    /// Worker should exit at its next wake.
    exit: bool,
}

struct BatcherInner {
    batcher_idx: u32,
    model_name: String,
    nice: i32,
    initial_delay: usize,
    state: Mutex<BatchState>,
    wake: Condvar,
    core: Arc<SchedulerCore>,
    overrides: ControlOverrides,
    on_schedule: OnSchedule,
    metrics: Arc<SchedulerMetrics>,
}

/// One runner's batch of slots plus the worker thread driving it.
pub(crate) struct SlotBatcher {
    inner: Arc<BatcherInner>,
    thread: Option<JoinHandle<()>>,
}

impl SlotBatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        batcher_idx: u32,
        batch_size: usize,
        model_name: String,
        nice: i32,
        initial_delay: usize,
        core: Arc<SchedulerCore>,
        overrides: ControlOverrides,
        on_schedule: OnSchedule,
        metrics: Arc<SchedulerMetrics>,
    ) -> Result<Self, SchedulerError> {
        let inner = Arc::new(BatcherInner {
            batcher_idx,
            model_name,
            nice,
            initial_delay,
            state: Mutex::new(BatchState {
                queues: (0..batch_size).map(|_| VecDeque::new()).collect(),
                active_slots: vec![false; batch_size],
                max_active_slot: -1,
                null_request_header: None,
                idle: false,
                exit: false,
            }),
            wake: Condvar::new(),
            core,
            overrides,
            on_schedule,
            metrics,
        });

        let worker = inner.clone();
        let thread = thread::Builder::new()
            .name(format!("seqmux-batcher-{batcher_idx}"))
            .spawn(move || worker_loop(&worker))
            .map_err(|e| {
                SchedulerError::internal(format!("failed to spawn batcher thread: {e}"))
            })?;

        Ok(Self { inner, thread: Some(thread) })
    }

    /// Append a payload to one slot's queue and wake the worker if it is
    /// parked.
    pub(crate) fn enqueue(&self, slot: u32, payload: Payload) {
        let wake = {
            let mut state = self.inner.state.lock().expect("batcher lock poisoned");

            // Every request in this batch executes together, so all must
            // share one shape. The first header seen stands in for the
            // placeholder requests that pad empty slots.
            if state.max_active_slot == -1 {
                state.null_request_header = Some(payload.request().request_header().clone());
            }

            state.queues[slot as usize].push_back(payload);
            state.active_slots[slot as usize] = true;
            state.max_active_slot = state.max_active_slot.max(slot as i32);

            // Notify outside the lock so the woken thread does not
            // immediately block on it.
            state.idle
        };

        if wake {
            self.inner.wake.notify_one();
        }
    }
}

impl Drop for SlotBatcher {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().expect("batcher lock poisoned");
            state.exit = true;
        }
        self.inner.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(inner: &BatcherInner) {
    apply_nice_level(inner.nice, inner.batcher_idx);

    let mut delay_target = inner.initial_delay;
    debug!(batcher = inner.batcher_idx, "starting sequence-batch worker");

    loop {
        let mut batch_payloads: Vec<Payload> = Vec::new();
        let mut padding = 0usize;

        {
            let mut state = inner.state.lock().expect("batcher lock poisoned");
            if state.exit {
                break;
            }

            let mut wait: Option<Duration> = None;
            let mut adjust_max_active = false;

            if delay_target > 0 {
                // Debug knob: hold off assembly until the queues contain
                // the requested number of payloads across all batchers.
                wait = Some(DELAY_POLL);
                let queued: usize = state.queues.iter().map(|q| q.len()).sum();
                if !inner.core.delay_scheduler(inner.batcher_idx, queued, delay_target) {
                    delay_target = 0;
                }
                debug!(
                    batcher = inner.batcher_idx,
                    queued,
                    target = delay_target,
                    "delaying batch assembly"
                );
            } else {
                // Find the widest slot with work pending.
                let mut max_slot = state.max_active_slot;
                while max_slot >= 0 && state.queues[max_slot as usize].is_empty() {
                    max_slot -= 1;
                }

                if max_slot < 0 {
                    wait = Some(DEFAULT_WAIT);
                } else {
                    let null_header = state.null_request_header.clone();

                    for slot in 0..=(max_slot as usize) {
                        if state.queues[slot].is_empty() {
                            // Pad the slot so its neighbors keep their
                            // positions; the not-ready override tells the
                            // backend to ignore it.
                            match null_header.clone() {
                                Some(header) => {
                                    let mut null_request =
                                        NullRequest::new(header, inner.model_name.as_str());
                                    null_request
                                        .set_input_override(inner.overrides.not_ready.clone());
                                    batch_payloads.push(Payload::null(Box::new(null_request)));
                                    padding += 1;
                                }
                                None => error!(
                                    batcher = inner.batcher_idx,
                                    slot, "internal: no captured header to pad idle slot"
                                ),
                            }
                        } else if let Some(mut payload) = state.queues[slot].pop_front() {
                            let overrides =
                                if payload.request().request_header().is_sequence_start() {
                                    inner.overrides.start.clone()
                                } else {
                                    inner.overrides.continuation.clone()
                                };
                            payload.request_mut().set_input_override(overrides);
                            payload.mark_dequeued();

                            let ends = payload.request().request_header().is_sequence_end();
                            batch_payloads.push(payload);

                            if ends {
                                // Nothing may trail the END marker; a
                                // backlog promotion would clobber it.
                                if !state.queues[slot].is_empty() {
                                    error!(
                                        slot,
                                        model = %inner.model_name,
                                        "internal: unexpected requests after sequence end"
                                    );
                                }

                                let batch_slot = BatchSlot {
                                    batcher_idx: inner.batcher_idx,
                                    slot: slot as u32,
                                };
                                let released =
                                    inner.core.release_slot(batch_slot, &mut state.queues[slot]);
                                if released {
                                    state.active_slots[slot] = false;
                                    // Defer recomputing the width: several
                                    // slots may end in one pass.
                                    if slot as i32 == state.max_active_slot {
                                        adjust_max_active = true;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if adjust_max_active {
                while state.max_active_slot >= 0
                    && !state.active_slots[state.max_active_slot as usize]
                {
                    state.max_active_slot -= 1;
                }
            }

            if let Some(timeout) = wait {
                state.idle = true;
                let (guard, _) = inner
                    .wake
                    .wait_timeout(state, timeout)
                    .expect("batcher lock poisoned");
                state = guard;
                state.idle = false;
            }
        }

        if !batch_payloads.is_empty() {
            inner.metrics.record_batch(batch_payloads.len(), padding);
            (inner.on_schedule)(
                inner.batcher_idx,
                Batch::new(inner.batcher_idx, batch_payloads),
            );
        }
    }

    debug!(batcher = inner.batcher_idx, "stopping sequence-batch worker");
}

#[cfg(target_os = "linux")]
fn apply_nice_level(nice: i32, batcher_idx: u32) {
    // SAFETY: setpriority on the calling thread's own id; no memory is
    // touched.
    let applied = unsafe {
        let tid = libc::syscall(libc::SYS_gettid);
        libc::setpriority(libc::PRIO_PROCESS as _, tid as _, nice) == 0
    };
    if applied {
        debug!(batcher = batcher_idx, nice, "worker thread nice level applied");
    } else {
        debug!(
            batcher = batcher_idx,
            nice, "worker thread keeping default nice level"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_nice_level(_nice: i32, batcher_idx: u32) {
    debug!(
        batcher = batcher_idx,
        "thread priority adjustment not supported on this platform"
    );
}
