//! Task scheduler for concurrent execution
//!
//! This module provides the FlowScheduler, a fixed-size pool of worker
//! threads with per-worker priority queues and work stealing, together with
//! the execution contexts layered on top of it: arenas, isolated regions and
//! the parallel-for primitive.

pub mod arena;
pub mod context;
pub mod error;
pub mod latch;
pub mod parallel;
pub mod queue;
pub mod task;
pub mod work_stealer;

pub use arena::{Arena, Concurrency};
pub use context::{current_isolation, current_priority, IsolationToken};
pub use error::{PoolError, TaskError};
pub use latch::CountLatch;
pub use parallel::{isolate, parallel_for, parallel_for_ranges};
pub use queue::PriorityTaskQueue;
pub use task::{Task, TaskId, TaskIdGenerator, TaskPriority, TaskState};
pub use work_stealer::{StealStats, WorkStealer};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::util::config::EngineConfig;
use context::{Eligibility, Frame, FrameGuard};
use queue::{Claim, ClaimOrder};
use task::Job;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);
static GLOBAL: OnceCell<FlowScheduler> = OnceCell::new();

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub num_workers: usize,
    /// Stack size of each worker thread.
    pub stack_size: usize,
    /// Whether idle workers steal from their peers.
    pub use_work_stealing: bool,
    /// Longest an idle worker sleeps before rescanning the queues.
    pub idle_timeout: Duration,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
    /// Priority of work spawned outside of any arena.
    pub default_priority: TaskPriority,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            stack_size: 2 * 1024 * 1024,
            use_work_stealing: true,
            idle_timeout: Duration::from_millis(1),
            thread_name_prefix: "flow-worker".to_string(),
            default_priority: TaskPriority::Medium,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with exactly `num_workers` threads (at least one).
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            ..Self::default()
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks scheduled.
    pub tasks_scheduled: AtomicUsize,
    /// Total tasks completed.
    pub tasks_completed: AtomicUsize,
    /// Tasks whose closure panicked past every capture.
    pub tasks_failed: AtomicUsize,
    /// Tasks claimed from a peer's queue.
    pub tasks_stolen: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
    /// Tasks running right now.
    pub running: AtomicUsize,
    /// Peak number of running tasks.
    pub peak_parallelism: AtomicUsize,
}

impl SchedulerStats {
    /// Record a scheduled task.
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task starting and update the parallelism peak.
    #[inline]
    pub fn record_started(&self) {
        let current = self.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_parallelism.fetch_max(current, Ordering::AcqRel);
    }

    /// Record a completed task.
    #[inline]
    pub fn record_completed(
        &self,
        duration_us: usize,
    ) {
        self.running.fetch_sub(1, Ordering::AcqRel);
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.total_exec_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Record a steal.
    #[inline]
    pub fn record_steal(&self) {
        self.tasks_stolen.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between a pool handle, its workers and every frame.
pub(crate) struct SchedulerCore {
    id: usize,
    config: SchedulerConfig,
    /// Per-worker local queues.
    work_stealer: WorkStealer,
    /// Submissions from threads that are not workers of this pool.
    injector: PriorityTaskQueue,
    /// Tasks sitting in any queue.
    queued: AtomicUsize,
    /// Cleared by `shutdown`.
    accepting: AtomicBool,
    sleep_lock: Mutex<()>,
    wake: Condvar,
    stats: SchedulerStats,
    task_ids: TaskIdGenerator,
}

impl SchedulerCore {
    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn num_workers(&self) -> usize {
        self.work_stealer.num_workers()
    }

    #[inline]
    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Submit a job under `frame`.
    ///
    /// Workers of this pool push onto their own queue and are never refused,
    /// so work spawned while draining at shutdown still completes. Any other
    /// thread goes through the injector and is refused after shutdown.
    pub(crate) fn submit(
        &self,
        name: impl Into<String>,
        priority: TaskPriority,
        frame: Frame,
        job: Job,
    ) -> Result<TaskId, PoolError> {
        let local = context::worker_index(self);
        if local.is_none() && !self.is_accepting() {
            return Err(PoolError::ShutdownInProgress);
        }

        let id = self.task_ids.generate();
        let task = Arc::new(Task::new(id, name, priority, frame, job));
        trace!(task = %id, priority = %priority, "spawn");

        self.queued.fetch_add(1, Ordering::AcqRel);
        match local {
            Some(index) => self.work_stealer.local(index).push(task),
            None => self.injector.push(task),
        }
        self.stats.record_scheduled();
        self.wake.notify_one();
        Ok(id)
    }

    /// Find the best admissible task for worker `index`.
    ///
    /// Higher priority always wins; within a level the own queue is tried
    /// first (newest first), then the injector and the peers (oldest first).
    fn find_task(
        &self,
        index: usize,
    ) -> Option<Claim> {
        if self.queued.load(Ordering::Acquire) == 0 {
            return None;
        }

        let filter = Eligibility::current();
        for priority in TaskPriority::DESCENDING {
            let claim = self
                .work_stealer
                .local(index)
                .claim(priority, ClaimOrder::Lifo, &filter)
                .or_else(|| self.injector.claim(priority, ClaimOrder::Fifo, &filter))
                .or_else(|| {
                    if !self.config.use_work_stealing {
                        return None;
                    }
                    let stolen = self.work_stealer.steal(index, priority, &filter);
                    if stolen.is_some() {
                        self.stats.record_steal();
                    }
                    stolen
                });

            if let Some(claim) = claim {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                return Some(claim);
            }
        }
        None
    }

    /// Run a claimed task on the current worker.
    fn execute(
        &self,
        claim: Claim,
    ) {
        let Claim { task, slot } = claim;
        let _frame = FrameGuard::push(task.frame().clone());

        task.set_state(TaskState::Running);
        self.stats.record_started();
        trace!(task = %task.id(), name = task.name(), "run");

        let start = Instant::now();
        let outcome = match task.take_executor() {
            Some(job) => panic::catch_unwind(AssertUnwindSafe(job)),
            None => Ok(()),
        };
        let duration_us = start.elapsed().as_micros() as usize;

        match outcome {
            Ok(()) => task.set_state(TaskState::Finished),
            Err(panic) => {
                self.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = %task.id(),
                    name = task.name(),
                    "{}",
                    error::panic_message(panic.as_ref())
                );
                task.set_state(TaskState::Failed);
            },
        }
        self.stats.record_completed(duration_us);
        drop(slot);
    }

    /// Block until `latch` is released.
    ///
    /// A worker of this pool keeps dispatching admissible tasks while it
    /// waits; any other thread sleeps on the latch.
    pub(crate) fn wait_until(
        &self,
        latch: &CountLatch,
    ) {
        let Some(index) = context::worker_index(self) else {
            latch.wait();
            return;
        };

        let backoff = Backoff::new();
        while !latch.probe() {
            if let Some(claim) = self.find_task(index) {
                self.execute(claim);
                backoff.reset();
            } else if backoff.is_completed() {
                latch.wait_timeout(self.config.idle_timeout);
            } else {
                backoff.snooze();
            }
        }
        latch.wait();
    }

    fn worker_main(
        self: Arc<Self>,
        index: usize,
    ) {
        context::register_worker(&self, index);
        debug!(pool = self.id, worker = index, "worker started");

        loop {
            if let Some(claim) = self.find_task(index) {
                self.execute(claim);
                continue;
            }
            if !self.is_accepting() && self.queued.load(Ordering::Acquire) == 0 {
                break;
            }
            let mut guard = self.sleep_lock.lock();
            self.wake.wait_for(&mut guard, self.config.idle_timeout);
        }

        debug!(pool = self.id, worker = index, "worker stopped");
        context::unregister_worker();
    }
}

/// Work-stealing worker pool.
///
/// Dropping a pool shuts it down: queued work is drained, then the worker
/// threads are joined.
pub struct FlowScheduler {
    core: Arc<SchedulerCore>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for FlowScheduler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FlowScheduler")
            .field("id", &self.core.id)
            .field("num_workers", &self.num_workers())
            .field("running", &self.is_running())
            .finish()
    }
}

impl FlowScheduler {
    /// Create a pool with the default configuration.
    #[inline]
    pub fn new() -> Result<Self, PoolError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a pool with a custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, PoolError> {
        let num_workers = config.num_workers.max(1);
        let core = Arc::new(SchedulerCore {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            work_stealer: WorkStealer::new(num_workers),
            injector: PriorityTaskQueue::new(),
            queued: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            sleep_lock: Mutex::new(()),
            wake: Condvar::new(),
            stats: SchedulerStats::default(),
            task_ids: TaskIdGenerator::new(),
            config: SchedulerConfig {
                num_workers,
                ..config
            },
        });

        let scheduler = Self {
            core,
            workers: Mutex::new(Vec::with_capacity(num_workers)),
        };
        scheduler.spawn_workers()?;
        debug!(
            pool = scheduler.core.id,
            workers = num_workers,
            "flow scheduler started"
        );
        Ok(scheduler)
    }

    /// Spawn worker threads.
    fn spawn_workers(&self) -> Result<(), PoolError> {
        let config = &self.core.config;
        let mut workers = self.workers.lock();

        for worker_id in 0..config.num_workers {
            let core = self.core.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, worker_id))
                .stack_size(config.stack_size)
                .spawn(move || core.worker_main(worker_id));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(workers);
                    self.shutdown();
                    return Err(PoolError::WorkerSpawn(err.to_string()));
                },
            }
        }
        Ok(())
    }

    /// Process-wide pool, created on first use from the environment
    /// configuration (see [`EngineConfig::from_env`]).
    ///
    /// # Panics
    ///
    /// Panics if the pool has to be created and a worker thread cannot be
    /// spawned. Use [`try_global`](Self::try_global) to handle that case.
    pub fn global() -> &'static FlowScheduler {
        Self::try_global()
            .unwrap_or_else(|err| panic!("failed to start the global flow scheduler: {err}"))
    }

    /// Like [`global`](Self::global), but reports a failed start.
    pub fn try_global() -> Result<&'static FlowScheduler, PoolError> {
        GLOBAL.get_or_try_init(|| {
            let config = EngineConfig::from_env().scheduler_config();
            FlowScheduler::with_config(config)
        })
    }

    /// Install the process-wide pool explicitly. Fails if the global pool
    /// already exists.
    pub fn init_global(config: SchedulerConfig) -> Result<&'static FlowScheduler, PoolError> {
        let mut created = false;
        let pool = GLOBAL.get_or_try_init(|| {
            created = true;
            FlowScheduler::with_config(config)
        })?;
        if created {
            Ok(pool)
        } else {
            Err(PoolError::AlreadyInitialized)
        }
    }

    pub(crate) fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    /// Spawn a detached task at `priority`.
    ///
    /// From inside a task of this pool the task inherits the current arena
    /// and isolation region.
    pub fn spawn<F>(
        &self,
        priority: TaskPriority,
        f: F,
    ) -> Result<TaskId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let frame = Frame::current_for(&self.core);
        self.core.submit("spawn", priority, frame, Box::new(f))
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.core.stats
    }

    /// Get work stealing statistics.
    #[inline]
    pub fn steal_stats(&self) -> &StealStats {
        self.core.work_stealer.stats()
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.core.num_workers()
    }

    /// Tasks currently queued.
    #[inline]
    pub fn queued(&self) -> usize {
        self.core.queued.load(Ordering::Acquire)
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// Check if the scheduler still accepts external submissions.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.core.is_accepting()
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        context::worker_index(&self.core).is_some()
    }

    /// Shutdown the scheduler: refuse new external work, drain the queues,
    /// join the workers. Idempotent.
    pub fn shutdown(&self) {
        if self.core.accepting.swap(false, Ordering::AcqRel) {
            debug!(pool = self.core.id, "flow scheduler shutting down");
        }
        self.core.wake.notify_all();

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(pool = self.core.id, "worker thread panicked");
            }
        }
    }
}

impl Drop for FlowScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Erase the lifetime of a job that borrows from the submitting stack frame.
///
/// # Safety
///
/// The caller must not let any borrow captured by `job` end before the job
/// has run to completion, typically by blocking on a latch the job releases
/// as its last action and catching every panic inside the job.
pub(crate) unsafe fn erase_job<'a>(job: Box<dyn FnOnce() + Send + 'a>) -> Job {
    std::mem::transmute::<Box<dyn FnOnce() + Send + 'a>, Job>(job)
}

#[cfg(test)]
mod tests;
