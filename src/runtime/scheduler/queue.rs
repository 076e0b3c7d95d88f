//! Task queue for the scheduler
//!
//! Multi-producer, multi-consumer task queue with one FIFO bucket per
//! priority level. Claims are filtered: a task is only removed when the
//! claiming thread's [`Eligibility`] admits it, and skipped tasks keep their
//! place.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::arena::ArenaSlot;
use super::context::{Admission, Eligibility};
use super::task::{Task, TaskPriority};

/// A task removed from a queue together with the arena slot it runs under.
pub(crate) struct Claim {
    pub(crate) task: Arc<Task>,
    pub(crate) slot: Option<ArenaSlot>,
}

/// End of a bucket a claim scans from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimOrder {
    /// Oldest first (injector, thieves).
    Fifo,
    /// Newest first (owner of a local queue).
    Lifo,
}

/// Priority-aware task queue.
///
/// Tasks are ordered by priority, then by arrival.
#[derive(Debug, Default)]
pub struct PriorityTaskQueue {
    /// High, medium and low buckets, in that order.
    buckets: Mutex<[VecDeque<Arc<Task>>; 3]>,
}

impl PriorityTaskQueue {
    /// Create a new priority task queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a task into the bucket of its priority.
    pub fn push(
        &self,
        task: Arc<Task>,
    ) {
        let bucket = task.priority().bucket();
        self.buckets.lock()[bucket].push_back(task);
    }

    /// Pop the oldest task of the highest non-empty priority, unfiltered.
    pub fn pop(&self) -> Option<Arc<Task>> {
        let mut buckets = self.buckets.lock();
        buckets.iter_mut().find_map(|bucket| bucket.pop_front())
    }

    /// Claim the first task of `priority` that `filter` admits.
    pub(crate) fn claim(
        &self,
        priority: TaskPriority,
        order: ClaimOrder,
        filter: &Eligibility,
    ) -> Option<Claim> {
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[priority.bucket()];
        if bucket.is_empty() {
            return None;
        }

        let len = bucket.len();
        for step in 0..len {
            let position = match order {
                ClaimOrder::Fifo => step,
                ClaimOrder::Lifo => len - 1 - step,
            };
            if let Admission::Granted(slot) = filter.admit(&bucket[position]) {
                return bucket
                    .remove(position)
                    .map(|task| Claim { task, slot });
            }
        }
        None
    }

    /// Number of queued tasks at `priority`.
    pub fn len_at(
        &self,
        priority: TaskPriority,
    ) -> usize {
        self.buckets.lock()[priority.bucket()].len()
    }

    /// Get total number of tasks.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().iter().all(VecDeque::is_empty)
    }
}
