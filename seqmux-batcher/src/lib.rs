//! Sequence-aware batching scheduler.
//!
//! Stateful models carry hidden state across a sequence of correlated
//! requests. This crate multiplexes many independent sequences onto a
//! fixed number of batch slots per runner, so the backend executes one
//! wide batch per step while each slot privately holds the state of
//! exactly one sequence at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 SequenceScheduler                    │
//! │  correlation → slot map      ready-slot stack        │
//! │  correlation → backlog map   backlog FIFO            │
//! └──────┬──────────────────────────────┬────────────────┘
//!        │ slot assigned                │ all slots busy
//!        ▼                              ▼
//! ┌─────────────┐  ┌─────────────┐   ┌─────────────┐
//! │ SlotBatcher │  │ SlotBatcher │   │   Backlog   │
//! │ slot queues │  │ slot queues │   │ (per-seq    │
//! │ + worker    │  │ + worker    │   │  queues)    │
//! └──────┬──────┘  └──────┬──────┘   └─────────────┘
//!        │                │    promoted when a slot frees
//!        ▼                ▼
//!   on_schedule(batcher_idx, batch)   one batch per step,
//!                                     empty slots padded with
//!                                     not-ready placeholders
//! ```
//!
//! Each runner owns a dedicated worker thread. Per step the worker pops at
//! most one payload per slot, pads idle slots with null placeholders, and
//! rebinds each request's control-signal overrides (sequence start /
//! ready) before invoking the backend.

mod backlog;
mod worker;

pub mod batch;
pub mod control;
pub mod env;
pub mod metrics;
pub mod scheduler;

pub use batch::{Batch, OnSchedule};
pub use control::ControlOverrides;
pub use env::SchedulerEnv;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use scheduler::{BatchSlot, SequenceScheduler};
