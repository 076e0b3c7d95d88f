//! Execution-context stack.
//!
//! Every thread keeps a stack of [`Frame`]s. Entering an arena or an isolated
//! region pushes a frame through a [`FrameGuard`]; the guard pops it on every
//! exit path, unwinding included. Spawned tasks capture the top frame, and a
//! worker pushes the task's frame while running it, so nested spawns inherit
//! the arena, priority and isolation token of their parent.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use super::arena::{ArenaSlot, ArenaState};
use super::task::{Task, TaskPriority};
use super::{FlowScheduler, SchedulerCore};

thread_local! {
    /// Pool and index of the worker running on this thread, if any.
    static WORKER: RefCell<Option<(Arc<SchedulerCore>, usize)>> = const { RefCell::new(None) };
    /// Active execution frames, innermost last.
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

struct TokenNode {
    id: u64,
    parent: Option<IsolationToken>,
}

/// Marker of one isolated region.
///
/// Tokens form a chain: a region opened inside another region gets the outer
/// token as parent.
#[derive(Clone)]
pub struct IsolationToken(Arc<TokenNode>);

impl IsolationToken {
    /// Fresh token nested in `parent`.
    pub(crate) fn child_of(parent: Option<IsolationToken>) -> Self {
        IsolationToken(Arc::new(TokenNode {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            parent,
        }))
    }

    /// Numeric id, for logs.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether `self` is `ancestor` or was opened (transitively) inside it.
    pub fn descends_from(
        &self,
        ancestor: &IsolationToken,
    ) -> bool {
        let mut cursor = Some(self);
        while let Some(token) = cursor {
            if Arc::ptr_eq(&token.0, &ancestor.0) {
                return true;
            }
            cursor = token.0.parent.as_ref();
        }
        false
    }
}

impl PartialEq for IsolationToken {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for IsolationToken {}

impl fmt::Debug for IsolationToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "IsolationToken({})", self.0.id)
    }
}

/// One entry of the execution-context stack.
#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) core: Arc<SchedulerCore>,
    pub(crate) arena: Option<Arc<ArenaState>>,
    pub(crate) priority: TaskPriority,
    pub(crate) isolation: Option<IsolationToken>,
}

impl fmt::Debug for Frame {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Frame")
            .field("pool", &self.core.id())
            .field("arena", &self.arena.as_ref().map(|arena| arena.id()))
            .field("priority", &self.priority)
            .field("isolation", &self.isolation)
            .finish()
    }
}

impl Frame {
    /// Outermost frame of a pool: no arena, no isolation.
    pub(crate) fn root(core: Arc<SchedulerCore>) -> Self {
        let priority = core.config().default_priority;
        Self {
            core,
            arena: None,
            priority,
            isolation: None,
        }
    }

    /// Frame a new task should capture on this thread.
    ///
    /// Inherits the innermost frame when it belongs to `core`, otherwise the
    /// root frame of `core` with the isolation token still carried over.
    pub(crate) fn current_for(core: &Arc<SchedulerCore>) -> Self {
        match current_frame() {
            Some(frame) if Arc::ptr_eq(&frame.core, core) => frame,
            Some(frame) => Self {
                isolation: frame.isolation,
                ..Self::root(core.clone())
            },
            None => Self::root(core.clone()),
        }
    }
}

/// Pops its frame on drop.
pub(crate) struct FrameGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl FrameGuard {
    pub(crate) fn push(frame: Frame) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Innermost frame on this thread.
pub(crate) fn current_frame() -> Option<Frame> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}

/// Isolation token of the innermost frame.
pub fn current_isolation() -> Option<IsolationToken> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .last()
            .and_then(|frame| frame.isolation.clone())
    })
}

/// Priority new work spawned from this thread would get.
pub fn current_priority() -> TaskPriority {
    current_frame()
        .map(|frame| frame.priority)
        .unwrap_or_else(|| current_core().config().default_priority)
}

/// Pool that work spawned from this thread goes to: the innermost frame's,
/// else the pool this thread works for, else the global pool.
pub(crate) fn current_core() -> Arc<SchedulerCore> {
    if let Some(frame) = current_frame() {
        return frame.core;
    }
    if let Some(core) = worker_core() {
        return core;
    }
    FlowScheduler::global().core().clone()
}

pub(crate) fn register_worker(
    core: &Arc<SchedulerCore>,
    index: usize,
) {
    WORKER.with(|worker| *worker.borrow_mut() = Some((core.clone(), index)));
}

pub(crate) fn unregister_worker() {
    WORKER.with(|worker| worker.borrow_mut().take());
    FRAMES.with(|frames| frames.borrow_mut().clear());
}

/// Pool this thread is a worker of.
pub(crate) fn worker_core() -> Option<Arc<SchedulerCore>> {
    WORKER.with(|worker| worker.borrow().as_ref().map(|(core, _)| core.clone()))
}

/// Worker index of this thread inside `core`.
pub(crate) fn worker_index(core: &SchedulerCore) -> Option<usize> {
    WORKER.with(|worker| {
        worker
            .borrow()
            .as_ref()
            .filter(|(owner, _)| owner.id() == core.id())
            .map(|(_, index)| *index)
    })
}

/// Whether any frame on this thread holds a slot of arena `id`.
pub(crate) fn holds_arena(id: usize) -> bool {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .any(|frame| frame.arena.as_ref().is_some_and(|arena| arena.id() == id))
    })
}

/// Outcome of checking a queued task against the claiming thread's context.
pub(crate) enum Admission {
    Denied,
    Granted(Option<ArenaSlot>),
}

/// Snapshot of what the claiming thread may run.
pub(crate) struct Eligibility {
    isolation: Option<IsolationToken>,
    held_arenas: SmallVec<[usize; 4]>,
}

impl Eligibility {
    /// Build from the calling thread's frame stack.
    pub(crate) fn current() -> Self {
        FRAMES.with(|frames| {
            let frames = frames.borrow();
            let isolation = frames.last().and_then(|frame| frame.isolation.clone());
            let held_arenas = frames
                .iter()
                .filter_map(|frame| frame.arena.as_ref().map(|arena| arena.id()))
                .collect();
            Self {
                isolation,
                held_arenas,
            }
        })
    }

    /// Decide whether `task` may run here, acquiring an arena slot if needed.
    pub(crate) fn admit(
        &self,
        task: &Task,
    ) -> Admission {
        let frame = task.frame();
        if let Some(region) = &self.isolation {
            let inside = frame
                .isolation
                .as_ref()
                .is_some_and(|token| token.descends_from(region));
            if !inside {
                return Admission::Denied;
            }
        }

        match &frame.arena {
            None => Admission::Granted(None),
            Some(arena) if self.held_arenas.contains(&arena.id()) => Admission::Granted(None),
            Some(arena) => match ArenaSlot::try_acquire(arena) {
                Some(slot) => Admission::Granted(Some(slot)),
                None => Admission::Denied,
            },
        }
    }
}
