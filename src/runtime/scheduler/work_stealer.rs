//! Work stealing for load balancing across worker threads.
//!
//! Each worker owns a local [`PriorityTaskQueue`]. An idle (or waiting)
//! worker that finds nothing admissible at a priority level in its own queue
//! or the injector scans its peers, starting at a random victim, and takes
//! the oldest admissible task of that level.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use super::context::Eligibility;
use super::queue::{Claim, ClaimOrder, PriorityTaskQueue};
use super::task::TaskPriority;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of failed steal attempts.
    pub steal_failures: AtomicUsize,
    /// Total number of steal attempts.
    pub total_attempts: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(&self) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal attempt.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get success rate as a fraction.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.steal_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }
}

/// Owner of the per-worker queues.
#[derive(Debug)]
pub struct WorkStealer {
    /// All worker queues, indexed by worker id.
    queues: Arc<[PriorityTaskQueue]>,
    /// Statistics.
    stats: StealStats,
}

impl WorkStealer {
    /// Create a work stealer with one queue per worker.
    pub fn new(num_workers: usize) -> Self {
        let queues = (0..num_workers)
            .map(|_| PriorityTaskQueue::new())
            .collect::<Vec<_>>();

        Self {
            queues: queues.into(),
            stats: StealStats::default(),
        }
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }

    /// Local queue of `worker_id`.
    #[inline]
    pub fn local(
        &self,
        worker_id: usize,
    ) -> &PriorityTaskQueue {
        &self.queues[worker_id]
    }

    /// Total number of tasks sitting in local queues.
    pub fn queued(&self) -> usize {
        self.queues.iter().map(PriorityTaskQueue::len).sum()
    }

    /// Steal the oldest admissible task of `priority` from any peer of `thief`.
    pub(crate) fn steal(
        &self,
        thief: usize,
        priority: TaskPriority,
        filter: &Eligibility,
    ) -> Option<Claim> {
        let num_workers = self.num_workers();
        if num_workers <= 1 {
            return None;
        }

        let start = rand::rng().random_range(0..num_workers);
        for offset in 0..num_workers {
            let victim = (start + offset) % num_workers;
            if victim == thief {
                continue;
            }
            if let Some(claim) = self.queues[victim].claim(priority, ClaimOrder::Fifo, filter) {
                self.stats.record_success();
                return Some(claim);
            }
        }

        self.stats.record_failure();
        None
    }

    /// Get steal statistics.
    #[inline]
    pub fn stats(&self) -> &StealStats {
        &self.stats
    }
}
