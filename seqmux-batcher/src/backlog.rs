//! Backlog of sequences waiting for a batch slot.
//!
//! A backlog queue is shared between the promotion FIFO and, while its
//! sequence is still accumulating requests, the coordinator's
//! correlation map. The shared handle lets later requests append to the
//! same queue the FIFO will eventually promote. All access happens under
//! the coordinator lock; the inner mutex exists only to make the handle
//! shareable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use seqmux_core::Payload;

/// Shared handle to one sequence's backlogged payloads.
pub(crate) type SharedQueue = Arc<Mutex<VecDeque<Payload>>>;

/// FIFO of backlogged sequences, promoted oldest-first when slots free.
#[derive(Debug, Default)]
pub(crate) struct BacklogQueues {
    queues: VecDeque<SharedQueue>,
}

impl BacklogQueues {
    /// Open a new backlog queue seeded with `payload` and return its
    /// handle. A queue is non-empty for its entire lifetime.
    pub(crate) fn open(&mut self, payload: Payload) -> SharedQueue {
        let queue: SharedQueue = Arc::new(Mutex::new(VecDeque::from([payload])));
        self.queues.push_back(queue.clone());
        queue
    }

    /// Take the oldest backlogged sequence for promotion into a slot.
    pub(crate) fn pop_front(&mut self) -> Option<SharedQueue> {
        self.queues.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    /// Total payloads across all backlogged sequences, for the
    /// backlog-delay debug knob.
    pub(crate) fn total_payloads(&self) -> usize {
        self.queues
            .iter()
            .map(|q| q.lock().expect("backlog queue lock poisoned").len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqmux_core::{flags, NullRequest, RequestHeader};

    fn payload(correlation_id: u64) -> Payload {
        let header = RequestHeader::new(correlation_id, 1, flags::SEQUENCE_START);
        Payload::null(Box::new(NullRequest::new(header, "m")))
    }

    #[test]
    fn test_fifo_promotion_order() {
        let mut backlog = BacklogQueues::default();
        let first = backlog.open(payload(1));
        let _second = backlog.open(payload(2));
        assert_eq!(backlog.len(), 2);

        let promoted = backlog.pop_front().unwrap();
        assert!(Arc::ptr_eq(&promoted, &first));
        assert_eq!(backlog.len(), 1);
    }

    #[test]
    fn test_append_through_handle() {
        let mut backlog = BacklogQueues::default();
        let handle = backlog.open(payload(1));
        handle.lock().unwrap().push_back(payload(1));
        assert_eq!(backlog.total_payloads(), 2);

        let promoted = backlog.pop_front().unwrap();
        assert_eq!(promoted.lock().unwrap().len(), 2);
        assert_eq!(backlog.len(), 0);
        assert_eq!(backlog.total_payloads(), 0);
    }
}
