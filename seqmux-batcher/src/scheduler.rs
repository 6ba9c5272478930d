//! The sequence scheduler: admission, routing, and slot lifecycle.
//!
//! The coordinator owns the correlation-id maps, the ready-slot stack,
//! and the backlog FIFO. A request either lands in the slot its sequence
//! already owns, in its sequence's backlog queue, in a freshly acquired
//! slot (START requests when a slot is free), or in a freshly opened
//! backlog queue. Workers hand slots back through the coordinator's
//! release path when a sequence ends, at which point the oldest
//! backlogged sequence is promoted into the freed slot.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use seqmux_core::{
    CompletionFn, CorrelationId, InferStats, ModelConfig, Payload, RequestProvider, RequestTimer,
    ResponseProvider, SchedulerError,
};

use crate::backlog::{BacklogQueues, SharedQueue};
use crate::batch::OnSchedule;
use crate::control::ControlOverrides;
use crate::env::SchedulerEnv;
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::worker::SlotBatcher;

/// One position inside one batcher's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSlot {
    pub batcher_idx: u32,
    pub slot: u32,
}

/// Coordinator state behind the scheduler lock.
struct SchedulerState {
    /// Free slots, handed out LIFO. Slots are interchangeable.
    ready_slots: Vec<BatchSlot>,
    /// Sequences that currently own a slot.
    sequence_to_slot: HashMap<CorrelationId, BatchSlot>,
    /// Sequences still accumulating requests in the backlog. A
    /// correlation id never appears in both maps.
    sequence_to_backlog: HashMap<CorrelationId, SharedQueue>,
    /// Backlogged sequences in promotion order.
    backlog: BacklogQueues,
    /// Per-batcher queued-payload counts, used only by the delay knob.
    queue_request_counts: Vec<usize>,
    /// Backlog threshold of the delay knob; zero when inactive.
    backlog_delay: usize,
}

/// The slice of the coordinator that workers call back into: slot release
/// and the debug-delay check. Shared by `Arc` so worker threads never own
/// the coordinator.
pub(crate) struct SchedulerCore {
    state: Mutex<SchedulerState>,
    metrics: Arc<SchedulerMetrics>,
    model_name: String,
}

impl SchedulerCore {
    /// Hand a freed slot back, or promote the oldest backlogged sequence
    /// into it.
    ///
    /// Returns `true` when the slot went back on the ready stack. Returns
    /// `false` when the backlog refilled `queue` instead: the slot stays
    /// active and now belongs to the promoted sequence.
    pub(crate) fn release_slot(
        &self,
        batch_slot: BatchSlot,
        queue: &mut VecDeque<Payload>,
    ) -> bool {
        let mut state = self.state.lock().expect("scheduler lock poisoned");

        if let Some(promoted) = state.backlog.pop_front() {
            {
                let mut promoted = promoted.lock().expect("backlog queue lock poisoned");
                *queue = std::mem::take(&mut *promoted);
            }

            // Nothing may follow an END marker within a slot queue. A
            // backlog violating that would clobber a later sequence, so
            // cut it off at the first END.
            if let Some(end_pos) = queue
                .iter()
                .position(|p| p.request().request_header().is_sequence_end())
            {
                if end_pos + 1 < queue.len() {
                    error!(
                        model = %self.model_name,
                        dropped = queue.len() - end_pos - 1,
                        "internal: requests beyond sequence end in promoted backlog"
                    );
                    queue.truncate(end_pos + 1);
                }
            }

            if let Some(last) = queue.back() {
                let header = last.request().request_header();
                let correlation_id = header.correlation_id;

                // If the promoted queue does not end the sequence, the
                // rest is still arriving: future requests must route to
                // this slot instead of the backlog.
                if !header.is_sequence_end() {
                    if state.sequence_to_slot.contains_key(&correlation_id) {
                        error!(
                            correlation_id,
                            model = %self.model_name,
                            "internal: backlog sequence conflicts with an in-flight sequence"
                        );
                    }
                    state.sequence_to_backlog.remove(&correlation_id);
                    state.sequence_to_slot.insert(correlation_id, batch_slot);
                }

                self.metrics.record_backlog_promotion();
                debug!(
                    correlation_id,
                    batcher = batch_slot.batcher_idx,
                    slot = batch_slot.slot,
                    "promoted backlogged sequence into freed slot"
                );
                return false;
            }

            // A backlog queue is non-empty for its entire lifetime.
            error!(model = %self.model_name, "internal: empty backlog queue");
        }

        state.ready_slots.push(batch_slot);
        self.metrics.record_slot_released();
        true
    }

    /// Debug-delay check: record this batcher's queued-payload count and
    /// report whether workers should keep holding off batch assembly.
    pub(crate) fn delay_scheduler(&self, batcher_idx: u32, count: usize, total: usize) -> bool {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.queue_request_counts[batcher_idx as usize] = count;

        let seen: usize = state.queue_request_counts.iter().sum();
        if seen < total {
            return true;
        }

        if state.backlog_delay > 0 && state.backlog.total_payloads() < state.backlog_delay {
            return true;
        }

        false
    }
}

/// Sequence-aware batching scheduler.
///
/// Multiplexes stateful sequences onto `runner_count` batchers with
/// `max_batch_size` slots each. Requests complete asynchronously through
/// their completion callback on a worker thread; admission failures
/// complete inline on the calling thread.
pub struct SequenceScheduler {
    core: Arc<SchedulerCore>,
    batchers: Vec<SlotBatcher>,
    metrics: Arc<SchedulerMetrics>,
}

impl SequenceScheduler {
    /// Create a scheduler for `config` with `runner_count` batchers,
    /// reading the debug-delay knobs from the process environment.
    pub fn create(
        config: &ModelConfig,
        runner_count: u32,
        on_schedule: OnSchedule,
    ) -> Result<Self, SchedulerError> {
        Self::with_env(config, runner_count, SchedulerEnv::from_env(), on_schedule)
    }

    /// Create a scheduler with explicit debug-delay settings.
    pub fn with_env(
        config: &ModelConfig,
        runner_count: u32,
        env: SchedulerEnv,
        on_schedule: OnSchedule,
    ) -> Result<Self, SchedulerError> {
        if runner_count == 0 {
            return Err(SchedulerError::invalid_argument(
                "sequence scheduler requires at least one runner",
            ));
        }

        let overrides = ControlOverrides::build(config)?;
        let batch_size = config.effective_batch_size();
        let metrics = Arc::new(SchedulerMetrics::new());

        // Seed the ready stack so low batchers and low slots pop first;
        // batch width then grows only as concurrency demands it.
        let mut ready_slots = Vec::with_capacity(runner_count as usize * batch_size);
        for batcher_idx in (0..runner_count).rev() {
            for slot in (0..batch_size as u32).rev() {
                ready_slots.push(BatchSlot { batcher_idx, slot });
            }
        }

        let core = Arc::new(SchedulerCore {
            state: Mutex::new(SchedulerState {
                ready_slots,
                sequence_to_slot: HashMap::new(),
                sequence_to_backlog: HashMap::new(),
                backlog: BacklogQueues::default(),
                queue_request_counts: vec![0; runner_count as usize],
                backlog_delay: env.backlog_delay_scheduler.unwrap_or(0),
            }),
            metrics: metrics.clone(),
            model_name: config.name.clone(),
        });

        let mut batchers = Vec::with_capacity(runner_count as usize);
        for batcher_idx in 0..runner_count {
            batchers.push(SlotBatcher::new(
                batcher_idx,
                batch_size,
                config.name.clone(),
                config.nice,
                env.delay_scheduler.unwrap_or(0),
                core.clone(),
                overrides.clone(),
                on_schedule.clone(),
                metrics.clone(),
            )?);
        }

        Ok(Self { core, batchers, metrics })
    }

    /// Admit one request.
    ///
    /// The request must have batch size 1 and a non-zero correlation id,
    /// and the first request of a sequence must carry the START flag;
    /// violations complete `on_complete` inline with an invalid-argument
    /// error. Admitted requests complete later, on a worker thread.
    pub fn enqueue(
        &self,
        stats: Arc<InferStats>,
        request: Box<dyn RequestProvider>,
        response: Box<dyn ResponseProvider>,
        on_complete: CompletionFn,
    ) {
        let timer = RequestTimer::start();
        let header = request.request_header().clone();
        let model_name = request.model_name().to_string();
        let payload = Payload::new(timer, stats, request, response, on_complete);

        if header.batch_size != 1 {
            self.metrics.record_rejected();
            payload.complete(Err(SchedulerError::invalid_argument(format!(
                "inference request to model '{model_name}' must specify batch-size 1 \
                 due to requirements of sequence batcher"
            ))));
            return;
        }

        let correlation_id = header.correlation_id;
        if correlation_id == 0 {
            self.metrics.record_rejected();
            payload.complete(Err(SchedulerError::invalid_argument(format!(
                "inference request to model '{model_name}' must specify a non-zero \
                 correlation ID"
            ))));
            return;
        }

        let seq_start = header.is_sequence_start();
        let seq_end = header.is_sequence_end();

        let mut state = self.core.state.lock().expect("scheduler lock poisoned");

        let has_slot = state.sequence_to_slot.contains_key(&correlation_id);
        let has_backlog = state.sequence_to_backlog.contains_key(&correlation_id);

        // A non-START request must already have a target, in a slot or in
        // the backlog. Otherwise the sequence was never started correctly
        // or there is a correlation-id conflict.
        if !seq_start && !has_slot && !has_backlog {
            drop(state);
            self.metrics.record_rejected();
            payload.complete(Err(SchedulerError::invalid_argument(format!(
                "inference request for sequence {correlation_id} to model '{model_name}' \
                 must specify the START flag on the first request of the sequence"
            ))));
            return;
        }

        // A START against a live sequence means the previous sequence did
        // not end correctly. The new sequence continues in the same slot
        // or backlog queue; a queue may hold multiple starts as long as it
        // has a single end.
        if seq_start && (has_slot || has_backlog) {
            self.metrics.record_conflict();
            warn!(
                correlation_id,
                model = %model_name,
                "sequence start conflicts with a live sequence; the previous \
                 sequence will be terminated early"
            );
        }

        self.metrics.record_admitted();

        // The sequence already owns a slot...
        let target = if let Some(&slot) = state.sequence_to_slot.get(&correlation_id) {
            if seq_end {
                state.sequence_to_slot.remove(&correlation_id);
            }
            slot
        }
        // ...or is already collecting in the backlog...
        else if let Some(queue) = state.sequence_to_backlog.get(&correlation_id).cloned() {
            queue
                .lock()
                .expect("backlog queue lock poisoned")
                .push_back(payload);
            // On END, forget the correlation id; a later START with the
            // same id collects in a fresh backlog queue.
            if seq_end {
                state.sequence_to_backlog.remove(&correlation_id);
            }
            debug!(correlation_id, model = %model_name, "appended to backlogged sequence");
            return;
        }
        // ...or starts fresh in a free slot...
        else if let Some(slot) = state.ready_slots.pop() {
            self.metrics.record_slot_acquired();
            if !seq_end {
                state.sequence_to_slot.insert(correlation_id, slot);
            }
            slot
        }
        // ...or has to wait in a new backlog queue.
        else {
            let queue = state.backlog.open(payload);
            if !seq_end {
                state.sequence_to_backlog.insert(correlation_id, queue);
            }
            debug!(correlation_id, model = %model_name, "no free slot; sequence backlogged");
            return;
        };

        // Hand the payload to the batcher without holding the scheduler
        // lock.
        drop(state);

        debug!(
            correlation_id,
            model = %model_name,
            batcher = target.batcher_idx,
            slot = target.slot,
            "enqueuing into batch slot"
        );
        self.batchers[target.batcher_idx as usize].enqueue(target.slot, payload);
    }

    /// Point-in-time scheduler metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of slots currently free across all batchers.
    pub fn ready_slot_count(&self) -> usize {
        self.core.state.lock().expect("scheduler lock poisoned").ready_slots.len()
    }

    /// Number of sequences currently assigned a slot.
    pub fn active_sequence_count(&self) -> usize {
        self.core.state.lock().expect("scheduler lock poisoned").sequence_to_slot.len()
    }

    /// Number of sequences still accumulating in the backlog.
    pub fn backlogged_sequence_count(&self) -> usize {
        self.core
            .state
            .lock()
            .expect("scheduler lock poisoned")
            .sequence_to_backlog
            .len()
    }

    /// Number of backlog queues awaiting promotion.
    pub fn backlog_queue_count(&self) -> usize {
        self.core.state.lock().expect("scheduler lock poisoned").backlog.len()
    }
}
