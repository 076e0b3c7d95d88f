//! Task definitions for the scheduler.
//!
//! A task is a boxed closure plus the priority and execution frame it was
//! spawned under. Tasks are shared as `Arc<Task>` between the queue that holds
//! them and the worker that claims them; the closure itself is taken exactly
//! once.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::context::Frame;

/// Type-erased unit of work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, waiting for a worker.
    Ready = 0,
    /// Claimed by a worker and executing.
    Running = 1,
    /// Ran to completion.
    Finished = 2,
    /// The closure panicked outside of any failure capture.
    Failed = 3,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TaskState::Running,
            2 => TaskState::Finished,
            3 => TaskState::Failed,
            _ => TaskState::Ready,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Task priority levels.
///
/// Priority only orders the selection among tasks that are ready at the same
/// dispatch decision. A running task is never preempted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Low priority tasks.
    Low = 0,
    /// Medium priority (default).
    #[default]
    Medium = 1,
    /// High priority tasks.
    High = 2,
}

impl TaskPriority {
    /// Every level, most important first. Dispatch scans in this order.
    pub const DESCENDING: [TaskPriority; 3] =
        [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low];

    /// Bucket index inside a [`PriorityTaskQueue`](super::PriorityTaskQueue).
    #[inline]
    pub(crate) fn bucket(self) -> usize {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }

    /// Lowercase name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task that can be scheduled for execution.
pub struct Task {
    /// Unique task ID.
    id: TaskId,
    /// Task name for debugging.
    name: String,
    /// Current state (atomic for thread-safe access).
    state: AtomicU8,
    /// Priority of the task.
    priority: TaskPriority,
    /// Execution context captured at spawn time.
    frame: Frame,
    /// The actual work to execute.
    executor: Mutex<Option<Job>>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("priority", &self.priority)
            .field("frame", &self.frame)
            .finish()
    }
}

impl Task {
    /// Create a new task with the given ID and executor.
    pub(crate) fn new(
        id: TaskId,
        name: impl Into<String>,
        priority: TaskPriority,
        frame: Frame,
        executor: Job,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            state: AtomicU8::new(TaskState::Ready.as_u8()),
            priority,
            frame,
            executor: Mutex::new(Some(executor)),
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the task state.
    #[inline]
    pub(crate) fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Get the priority.
    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Execution frame the task was spawned under.
    #[inline]
    pub(crate) fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Take the executor closure from the task.
    #[inline]
    pub(crate) fn take_executor(&self) -> Option<Job> {
        self.executor.lock().take()
    }
}

/// Generator for task IDs, shared by every thread submitting to one pool.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    pub fn generate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
