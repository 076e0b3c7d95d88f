//! Arenas: named execution contexts on top of a worker pool.
//!
//! An arena owns no threads. It binds a priority and a concurrency cap to the
//! work submitted through it; the cap counts tasks of the arena running at the
//! same time, and a task over the cap simply stays queued.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::context::{self, Frame, FrameGuard};
use super::error::{panic_message, PoolError, TaskError};
use super::latch::CountLatch;
use super::task::TaskPriority;
use super::{erase_job, FlowScheduler, SchedulerCore};

static NEXT_ARENA_ID: AtomicUsize = AtomicUsize::new(0);

/// Concurrency cap of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// As many as the pool has workers.
    #[default]
    Automatic,
    /// At most this many tasks at once, clamped to `1..=workers`.
    Limited(usize),
}

impl Concurrency {
    fn resolve(
        self,
        num_workers: usize,
    ) -> usize {
        match self {
            Concurrency::Automatic => num_workers,
            Concurrency::Limited(n) => n.clamp(1, num_workers.max(1)),
        }
    }
}

/// Arena bookkeeping shared with frames and queued tasks.
#[derive(Debug)]
pub(crate) struct ArenaState {
    id: usize,
    limit: usize,
    priority: TaskPriority,
    active: AtomicUsize,
}

impl ArenaState {
    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }
}

/// One occupied concurrency slot; released on drop.
#[derive(Debug)]
pub(crate) struct ArenaSlot {
    arena: Arc<ArenaState>,
}

impl ArenaSlot {
    pub(crate) fn try_acquire(arena: &Arc<ArenaState>) -> Option<Self> {
        arena
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < arena.limit).then_some(active + 1)
            })
            .ok()
            .map(|_| Self {
                arena: arena.clone(),
            })
    }
}

impl Drop for ArenaSlot {
    fn drop(&mut self) {
        self.arena.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Execution context with its own priority and concurrency cap.
///
/// # Example
///
/// ```
/// use yaoxiang_flow::runtime::scheduler::{parallel_for, Arena, Concurrency, TaskPriority};
///
/// let arena = Arena::new(Concurrency::Automatic, TaskPriority::High);
/// let sum = std::sync::atomic::AtomicUsize::new(0);
/// arena
///     .execute(|| {
///         parallel_for(0, 100, 10, |i| {
///             sum.fetch_add(i, std::sync::atomic::Ordering::Relaxed);
///         })
///     })
///     .unwrap()
///     .unwrap();
/// assert_eq!(sum.into_inner(), 4950);
/// ```
#[derive(Clone)]
pub struct Arena {
    core: Arc<SchedulerCore>,
    state: Arc<ArenaState>,
}

impl std::fmt::Debug for Arena {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.state.id)
            .field("pool", &self.core.id())
            .field("priority", &self.state.priority)
            .field("max_concurrency", &self.state.limit)
            .field("active", &self.active())
            .finish()
    }
}

impl Arena {
    /// Arena on the process-wide pool.
    ///
    /// # Panics
    ///
    /// Panics if the global pool cannot be started; see [`Arena::try_new`].
    pub fn new(
        concurrency: Concurrency,
        priority: TaskPriority,
    ) -> Self {
        Self::with_scheduler(FlowScheduler::global(), concurrency, priority)
    }

    /// Arena on the process-wide pool, failing if that pool cannot start.
    pub fn try_new(
        concurrency: Concurrency,
        priority: TaskPriority,
    ) -> Result<Self, PoolError> {
        let scheduler = FlowScheduler::try_global()?;
        Ok(Self::with_scheduler(scheduler, concurrency, priority))
    }

    /// Arena on an explicit pool.
    pub fn with_scheduler(
        scheduler: &FlowScheduler,
        concurrency: Concurrency,
        priority: TaskPriority,
    ) -> Self {
        let core = scheduler.core().clone();
        let state = Arc::new(ArenaState {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            limit: concurrency.resolve(core.num_workers()),
            priority,
            active: AtomicUsize::new(0),
        });
        Self { core, state }
    }

    /// Priority of the work this arena spawns.
    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.state.priority
    }

    /// Effective concurrency cap.
    #[inline]
    pub fn max_concurrency(&self) -> usize {
        self.state.limit
    }

    /// Tasks of this arena running right now.
    #[inline]
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    pub(crate) fn frame(&self) -> Frame {
        Frame {
            core: self.core.clone(),
            arena: Some(self.state.clone()),
            priority: self.state.priority,
            isolation: context::current_isolation(),
        }
    }

    /// Run `f` inside this arena and return its result.
    ///
    /// On a worker of the same pool with a free (or already held) slot, `f`
    /// runs right here inside a pushed frame. Otherwise it is submitted at the
    /// arena's priority and the caller waits, helping with other work if it is
    /// a worker. Either way the call returns only after `f` and everything it
    /// joined have completed.
    pub fn execute<F, R>(
        &self,
        f: F,
    ) -> Result<R, TaskError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let on_worker = context::worker_index(&self.core).is_some();
        if on_worker {
            let slot = if context::holds_arena(self.state.id) {
                Some(None)
            } else {
                ArenaSlot::try_acquire(&self.state).map(Some)
            };
            if let Some(slot) = slot {
                debug!(arena = self.state.id, "execute inline");
                let _frame = FrameGuard::push(self.frame());
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                drop(slot);
                return outcome.map_err(|panic| TaskError::from_panic(self.task_name(), panic));
            }
        }

        self.execute_submitted(f)
    }

    fn execute_submitted<F, R>(
        &self,
        f: F,
    ) -> Result<R, TaskError>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        debug!(arena = self.state.id, "execute submitted");
        let latch = CountLatch::new(1);
        let result: Mutex<Option<std::thread::Result<R>>> = Mutex::new(None);

        let job = {
            let latch = &latch;
            let result = &result;
            Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                *result.lock() = Some(outcome);
                latch.decrement();
            })
        };
        // SAFETY: `latch` is only released by the job's last statement and
        // the job catches panics from `f`; we wait on the latch before
        // `latch`, `result` or anything `f` borrows goes out of scope.
        let job = unsafe { erase_job(job) };

        self.core
            .submit(self.task_name(), self.state.priority, self.frame(), job)?;
        self.core.wait_until(&latch);

        match result.into_inner() {
            Some(Ok(value)) => Ok(value),
            Some(Err(panic)) => Err(TaskError::from_panic(self.task_name(), panic)),
            None => Err(TaskError::body_failed(
                self.task_name(),
                anyhow::anyhow!("arena task finished without a result"),
            )),
        }
    }

    /// Submit `f` to this arena without waiting for it.
    pub fn enqueue<F>(
        &self,
        f: F,
    ) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.task_name();
        let job_name = name.clone();
        let job = Box::new(move || {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(f)) {
                warn!(task = %job_name, "{}", panic_message(panic.as_ref()));
            }
        });
        let frame = Frame {
            isolation: None,
            ..self.frame()
        };
        self.core
            .submit(name, self.state.priority, frame, job)
            .map(|_| ())
    }

    fn task_name(&self) -> String {
        format!("arena-{}", self.state.id)
    }
}
