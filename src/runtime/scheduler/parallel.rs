//! Isolation boundary and the parallel-for primitive.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::context::{self, Frame, FrameGuard, IsolationToken};
use super::error::{PoolError, TaskError};
use super::erase_job;
use super::latch::CountLatch;

/// Run `f` inside a fresh isolated region.
///
/// While this thread waits for work spawned inside `f` (for example the
/// leaves of a [`parallel_for`]), it only picks up tasks created inside the
/// region. Other workers may still steal those tasks. The region is left on
/// every exit path, unwinding included.
pub fn isolate<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let core = context::current_core();
    let base = Frame::current_for(&core);
    let token = IsolationToken::child_of(base.isolation.clone());
    trace!(token = token.id(), "enter isolated region");

    let _guard = FrameGuard::push(Frame {
        isolation: Some(token),
        ..base
    });
    f()
}

/// Call `body` once per index of `[begin, end)` in parallel.
///
/// See [`parallel_for_ranges`] for splitting, context and failure rules.
pub fn parallel_for<F>(
    begin: usize,
    end: usize,
    grain: usize,
    body: F,
) -> Result<(), TaskError>
where
    F: Fn(usize) + Sync,
{
    parallel_for_ranges(begin, end, grain, |range| range.for_each(&body))
}

/// Call `body` once per leaf sub-range of `[begin, end)` in parallel.
///
/// The range is halved recursively; every partition is its own task, and a
/// partition of at most `grain` indices is a leaf. `grain == 0` picks a grain
/// from the pool size. Tasks run under the caller's arena, priority and
/// isolation region. The call returns once every leaf has finished; a
/// panicking leaf does not stop its siblings and the first failure is
/// returned.
pub fn parallel_for_ranges<F>(
    begin: usize,
    end: usize,
    grain: usize,
    body: F,
) -> Result<(), TaskError>
where
    F: Fn(Range<usize>) + Sync,
{
    if begin >= end {
        return Ok(());
    }

    let core = context::current_core();
    let grain = match grain {
        0 => auto_grain(end - begin, core.num_workers()),
        grain => grain,
    };
    let split = RangeSplit {
        body: &body,
        grain,
        frame: Frame::current_for(&core),
        latch: CountLatch::new(0),
        failures: Mutex::new(Vec::new()),
    };

    split.spawn(begin..end)?;
    core.wait_until(&split.latch);

    let failures = split.failures.into_inner();
    if failures.len() > 1 {
        warn!(failed = failures.len(), "parallel_for leaves failed");
    }
    match failures.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn auto_grain(
    len: usize,
    num_workers: usize,
) -> usize {
    (len / (4 * num_workers.max(1))).max(1)
}

struct RangeSplit<'a> {
    body: &'a (dyn Fn(Range<usize>) + Sync),
    grain: usize,
    frame: Frame,
    latch: CountLatch,
    failures: Mutex<Vec<TaskError>>,
}

impl RangeSplit<'_> {
    fn spawn(
        &self,
        range: Range<usize>,
    ) -> Result<(), PoolError> {
        self.latch.increment();
        let job = Box::new(move || self.run(range));
        // SAFETY: every spawned range holds one latch count until its last
        // statement and `run` catches panics from the body, so the caller of
        // `parallel_for_ranges` waits out every task before `self` is dropped.
        let job = unsafe { erase_job(job) };

        let frame = self.frame.clone();
        let submitted = self
            .frame
            .core
            .submit("parallel_for", frame.priority, frame, job);
        if let Err(err) = submitted {
            self.latch.decrement();
            return Err(err);
        }
        Ok(())
    }

    fn run(
        &self,
        range: Range<usize>,
    ) {
        if range.len() > self.grain {
            let mid = range.start + range.len() / 2;
            for half in [range.start..mid, mid..range.end] {
                if self.spawn(half.clone()).is_err() {
                    self.run(half);
                }
            }
        } else {
            let leaf = range.clone();
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| (self.body)(leaf))) {
                let name = format!("parallel_for[{}..{})", range.start, range.end);
                self.failures.lock().push(TaskError::from_panic(name, panic));
            }
        }
        self.latch.decrement();
    }
}
