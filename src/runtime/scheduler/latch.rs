//! Counting latch used for structured joins and graph quiescence.
//!
//! The count may go back up after reaching zero, so one latch can track
//! several activation rounds of the same graph. A latch living on a waiter's
//! stack may only be dropped after [`CountLatch::wait`] returned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct CountLatch {
    count: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CountLatch {
    /// Latch with an initial count.
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Register one more outstanding unit.
    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark one unit complete, waking waiters when the count reaches zero.
    ///
    /// The lock is held across the update so a waiter that passed
    /// [`wait`](Self::wait) knows no decrement still touches the latch.
    pub fn decrement(&self) {
        let _guard = self.lock.lock();
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.cond.notify_all();
        }
    }

    /// Outstanding units.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether nothing is outstanding.
    #[inline]
    pub fn probe(&self) -> bool {
        self.count() == 0
    }

    /// Block until the count is zero.
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.probe() {
            self.cond.wait(&mut guard);
        }
    }

    /// Block until the count is zero or `timeout` elapsed. Returns `probe()`.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        let mut guard = self.lock.lock();
        if !self.probe() {
            self.cond.wait_for(&mut guard, timeout);
        }
        self.probe()
    }
}
