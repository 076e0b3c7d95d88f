//! Executable task graph.
//!
//! A [`FlowGraph`] owns its nodes and their bodies. Delivering an item to a
//! node either buffers it or schedules an invocation on the worker pool at
//! the node's priority, under the execution context of the delivering thread
//! (so a graph activated inside an arena runs inside that arena). Completed
//! invocations deliver their output to every successor right away.
//!
//! The graph keeps one [`CountLatch`] holding a count per scheduled
//! invocation; the graph is quiescent when it reaches zero.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::runtime::scheduler::context::{self, Frame};
use crate::runtime::scheduler::{
    CountLatch, FlowScheduler, SchedulerCore, TaskError, TaskPriority,
};

use super::graph::{ComputationDAG, GraphError};
use super::join::{assemble_erased, Assemble, JoinBuffer, JoinTuple};
use super::node::{
    DAGNodeKind, EdgeKind, InvocationPolicy, NodeState, Payload, PortType, Signal,
};
use super::node_id::NodeId;

type ContinueBody = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;
type FunctionBody = Box<dyn Fn(&Payload) -> anyhow::Result<Payload> + Send + Sync>;

/// Input port of a node, the destination of an edge.
///
/// A bare [`NodeId`] converts to port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub node: NodeId,
    pub port: usize,
}

impl From<NodeId> for PortRef {
    fn from(node: NodeId) -> Self {
        PortRef { node, port: 0 }
    }
}

impl From<(NodeId, usize)> for PortRef {
    fn from((node, port): (NodeId, usize)) -> Self {
        PortRef { node, port }
    }
}

#[derive(Default)]
struct Inbox {
    pending: VecDeque<Payload>,
    running: usize,
}

enum Behavior {
    Continue {
        body: ContinueBody,
        /// Predecessors whose signal arrived since the last reset.
        signalled: Mutex<SmallVec<[NodeId; 4]>>,
    },
    Function {
        body: FunctionBody,
        policy: InvocationPolicy,
        inbox: Mutex<Inbox>,
    },
    Join {
        buffer: Mutex<JoinBuffer>,
        assemble: Assemble,
    },
}

struct NodeRuntime {
    id: NodeId,
    name: String,
    priority: TaskPriority,
    state: AtomicU8,
    behavior: Behavior,
}

impl NodeRuntime {
    #[inline]
    fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(
        &self,
        state: NodeState,
    ) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition(
        &self,
        from: NodeState,
        to: NodeState,
    ) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn reset(&self) {
        match &self.behavior {
            Behavior::Continue { signalled, .. } => signalled.lock().clear(),
            Behavior::Function { inbox, .. } => *inbox.lock() = Inbox::default(),
            Behavior::Join { buffer, .. } => buffer.lock().clear(),
        }
        self.set_state(NodeState::Idle);
    }
}

/// Releases one latch count when a node task ends.
struct PendingRun<'a>(&'a CountLatch);

impl Drop for PendingRun<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

struct GraphShared {
    core: Arc<SchedulerCore>,
    dag: RwLock<ComputationDAG>,
    nodes: RwLock<Vec<Arc<NodeRuntime>>>,
    latch: CountLatch,
    failures: Mutex<Vec<TaskError>>,
}

impl GraphShared {
    fn node(
        &self,
        id: NodeId,
    ) -> Option<Arc<NodeRuntime>> {
        self.nodes.read().get(id.value()).cloned()
    }

    fn record_failure(
        &self,
        error: TaskError,
    ) {
        warn!("{}", error);
        self.failures.lock().push(error);
    }

    /// Hand `item` to input `port` of `node`.
    ///
    /// `source` is the emitting predecessor, or `None` for an activation
    /// from outside the graph.
    fn deliver(
        self: &Arc<Self>,
        node: &Arc<NodeRuntime>,
        port: usize,
        item: Payload,
        source: Option<NodeId>,
    ) {
        match &node.behavior {
            Behavior::Continue { signalled, .. } => {
                if node.state() != NodeState::Idle {
                    warn!(node = %node.name, "signal after the node fired, ignored");
                    return;
                }
                let predecessors: SmallVec<[NodeId; 4]> = self
                    .dag
                    .read()
                    .get_node(node.id)
                    .map(|dag_node| dag_node.dependencies().iter().copied().collect())
                    .unwrap_or_default();

                let ready = match source {
                    None if predecessors.is_empty() => true,
                    None => {
                        warn!(node = %node.name, "external signal on a node with predecessors, ignored");
                        return;
                    },
                    Some(from) => {
                        let mut signalled = signalled.lock();
                        if signalled.contains(&from) {
                            trace!(node = %node.name, from = %from, "repeated signal, ignored");
                            return;
                        }
                        signalled.push(from);
                        predecessors.iter().all(|id| signalled.contains(id))
                    },
                };
                if ready && node.transition(NodeState::Idle, NodeState::Ready) {
                    self.schedule(node, |graph, node| graph.run_continue(node));
                } else if ready {
                    warn!(node = %node.name, "signal after the node fired, ignored");
                }
            },
            Behavior::Function { policy, inbox, .. } => {
                let mut inbox = inbox.lock();
                match policy {
                    InvocationPolicy::Serial => {
                        inbox.pending.push_back(item);
                        if inbox.running == 0 {
                            inbox.running = 1;
                            node.set_state(NodeState::Ready);
                            drop(inbox);
                            self.schedule(node, |graph, node| graph.drain_serial(node));
                        }
                    },
                    InvocationPolicy::Concurrent => {
                        inbox.running += 1;
                        if node.state() != NodeState::Running {
                            node.set_state(NodeState::Ready);
                        }
                        drop(inbox);
                        self.schedule(node, move |graph, node| graph.run_concurrent(node, item));
                    },
                }
            },
            Behavior::Join { buffer, assemble } => {
                // Emission stays under the buffer lock so tuples leave in the
                // order their items arrived.
                let mut buffer = buffer.lock();
                buffer.push(port, item);
                while let Some(items) = buffer.pop_complete() {
                    match assemble(items) {
                        Some(tuple) => {
                            node.set_state(NodeState::Running);
                            self.emit(node, tuple);
                            node.set_state(NodeState::Done);
                        },
                        None => self.record_failure(TaskError::body_failed(
                            node.name.clone(),
                            anyhow!("join received an item of the wrong type"),
                        )),
                    }
                }
            },
        }
    }

    /// Submit one invocation of `node` to the pool.
    fn schedule<F>(
        self: &Arc<Self>,
        node: &Arc<NodeRuntime>,
        run: F,
    ) where
        F: FnOnce(&Arc<GraphShared>, &Arc<NodeRuntime>) + Send + 'static,
    {
        self.latch.increment();
        let frame = Frame {
            priority: node.priority,
            ..Frame::current_for(&self.core)
        };

        let graph = self.clone();
        let target = node.clone();
        let job = Box::new(move || {
            let _pending = PendingRun(&graph.latch);
            run(&graph, &target);
        });

        trace!(node = %node.name, priority = %node.priority, "node scheduled");
        if let Err(err) = self
            .core
            .submit(node.name.clone(), node.priority, frame, job)
        {
            self.record_failure(TaskError::from(err));
            node.set_state(NodeState::Done);
            self.latch.decrement();
        }
    }

    /// Run a body, capturing errors and panics as failures of `node`.
    fn invoke<T>(
        &self,
        node: &NodeRuntime,
        body: impl FnOnce() -> anyhow::Result<T>,
    ) -> Option<T> {
        let error = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => TaskError::body_failed(node.name.clone(), err),
            Err(panic) => TaskError::from_panic(node.name.clone(), panic),
        };
        self.record_failure(error);
        None
    }

    /// Deliver `output` along every outgoing edge of `node`.
    fn emit(
        self: &Arc<Self>,
        node: &NodeRuntime,
        output: Payload,
    ) {
        let edges = self.dag.read().edges_from(node.id);
        debug!(node = %node.name, successors = edges.len(), "node completed");

        for edge in edges {
            let Some(target) = self.node(edge.to) else {
                continue;
            };
            let item = match edge.kind {
                EdgeKind::Data => output.clone(),
                EdgeKind::Signal => Arc::new(Signal),
            };
            self.deliver(&target, edge.port, item, Some(node.id));
        }
    }

    fn run_continue(
        self: &Arc<Self>,
        node: &Arc<NodeRuntime>,
    ) {
        let Behavior::Continue { body, .. } = &node.behavior else {
            return;
        };
        node.set_state(NodeState::Running);
        if self.invoke(node, body).is_some() {
            self.emit(node, Arc::new(Signal));
        }
        node.set_state(NodeState::Done);
    }

    fn drain_serial(
        self: &Arc<Self>,
        node: &Arc<NodeRuntime>,
    ) {
        let Behavior::Function { body, inbox, .. } = &node.behavior else {
            return;
        };
        loop {
            let item = {
                let mut inbox = inbox.lock();
                match inbox.pending.pop_front() {
                    Some(item) => {
                        node.set_state(NodeState::Running);
                        item
                    },
                    None => {
                        inbox.running = 0;
                        node.set_state(NodeState::Done);
                        return;
                    },
                }
            };
            if let Some(output) = self.invoke(node, || body(&item)) {
                self.emit(node, output);
            }
        }
    }

    fn run_concurrent(
        self: &Arc<Self>,
        node: &Arc<NodeRuntime>,
        item: Payload,
    ) {
        let Behavior::Function { body, inbox, .. } = &node.behavior else {
            return;
        };
        {
            let _inbox = inbox.lock();
            node.set_state(NodeState::Running);
        }
        if let Some(output) = self.invoke(node, || body(&item)) {
            self.emit(node, output);
        }

        let mut inbox = inbox.lock();
        inbox.running = inbox.running.saturating_sub(1);
        if inbox.running == 0 {
            node.set_state(NodeState::Done);
        }
    }
}

/// A graph of continue, function and join nodes run on a worker pool.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// use yaoxiang_flow::runtime::dag::{EdgeKind, FlowGraph, InvocationPolicy, Signal};
/// use yaoxiang_flow::runtime::scheduler::TaskPriority;
///
/// let total = Arc::new(AtomicUsize::new(0));
/// let mut graph = FlowGraph::new();
///
/// let produce = graph.add_function(
///     "produce",
///     TaskPriority::Medium,
///     InvocationPolicy::Serial,
///     |_: &Signal| Ok((1..=10).collect::<Vec<usize>>()),
/// );
/// let sum = {
///     let total = total.clone();
///     graph.add_function(
///         "sum",
///         TaskPriority::Medium,
///         InvocationPolicy::Serial,
///         move |items: &Vec<usize>| {
///             total.store(items.iter().sum(), Ordering::SeqCst);
///             Ok(Signal)
///         },
///     )
/// };
/// graph.add_edge(produce, sum, EdgeKind::Data).unwrap();
///
/// graph.activate(produce, Signal).unwrap();
/// graph.wait_for_all().unwrap();
/// assert_eq!(total.load(Ordering::SeqCst), 55);
/// ```
pub struct FlowGraph {
    shared: Arc<GraphShared>,
}

impl FlowGraph {
    /// Empty graph on the pool of the calling context (the enclosing arena's
    /// pool, the pool this thread works for, else the global pool).
    ///
    /// # Panics
    ///
    /// Panics if the global pool is needed and cannot be started. Build the
    /// graph with [`with_scheduler`](Self::with_scheduler) on
    /// [`FlowScheduler::try_global`] to handle that case.
    pub fn new() -> Self {
        Self::on_core(context::current_core())
    }

    /// Empty graph on an explicit pool.
    pub fn with_scheduler(scheduler: &FlowScheduler) -> Self {
        Self::on_core(scheduler.core().clone())
    }

    fn on_core(core: Arc<SchedulerCore>) -> Self {
        Self {
            shared: Arc::new(GraphShared {
                core,
                dag: RwLock::new(ComputationDAG::new()),
                nodes: RwLock::new(Vec::new()),
                latch: CountLatch::new(0),
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    fn add_node(
        &mut self,
        name: String,
        priority: TaskPriority,
        kind: DAGNodeKind,
        behavior: Behavior,
    ) -> NodeId {
        let id = self.shared.dag.write().add_node(name.clone(), kind, priority);
        self.shared.nodes.write().push(Arc::new(NodeRuntime {
            id,
            name,
            priority,
            state: AtomicU8::new(NodeState::Idle.as_u8()),
            behavior,
        }));
        id
    }

    /// Add a node that runs `body` once every predecessor has signalled.
    ///
    /// Repeated signals from one predecessor count once. A node with
    /// predecessors ignores [`signal`](Self::signal) from outside the graph;
    /// a node without any fires on its first one.
    pub fn add_continue<F>(
        &mut self,
        name: impl Into<String>,
        priority: TaskPriority,
        body: F,
    ) -> NodeId
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_node(
            name.into(),
            priority,
            DAGNodeKind::Continue,
            Behavior::Continue {
                body: Box::new(body),
                signalled: Mutex::new(SmallVec::new()),
            },
        )
    }

    /// Add a node that maps every `I` it receives to an `O`.
    ///
    /// Use [`Signal`] as `I` for a node triggered by signal edges.
    pub fn add_function<I, O, F>(
        &mut self,
        name: impl Into<String>,
        priority: TaskPriority,
        policy: InvocationPolicy,
        body: F,
    ) -> NodeId
    where
        I: Send + Sync + 'static,
        O: Send + Sync + 'static,
        F: Fn(&I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let erased: FunctionBody = Box::new(move |input: &Payload| {
            let input = input
                .downcast_ref::<I>()
                .ok_or_else(|| anyhow!("unexpected input type"))?;
            Ok(Arc::new(body(input)?) as Payload)
        });
        self.add_node(
            name.into(),
            priority,
            DAGNodeKind::Function {
                policy,
                input: PortType::of::<I>(),
                output: PortType::of::<O>(),
            },
            Behavior::Function {
                body: erased,
                policy,
                inbox: Mutex::new(Inbox::default()),
            },
        )
    }

    /// Add a join over the tuple type `J`, e.g. `(Vec<u64>, Signal)`.
    ///
    /// Emits `(Arc<A>, Arc<B>, ..)` on data edges. Tuples are emitted on the
    /// thread that delivered the completing item, so `priority` is recorded
    /// on the node but never affects dispatch.
    pub fn add_join<J: JoinTuple>(
        &mut self,
        name: impl Into<String>,
        priority: TaskPriority,
    ) -> NodeId {
        self.add_node(
            name.into(),
            priority,
            DAGNodeKind::Join {
                ports: J::port_types(),
                output: PortType::of::<J::Output>(),
            },
            Behavior::Join {
                buffer: Mutex::new(JoinBuffer::new(J::ARITY)),
                assemble: assemble_erased::<J>,
            },
        )
    }

    /// Wire the output of `from` to an input port of `to`.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: impl Into<PortRef>,
        kind: EdgeKind,
    ) -> Result<(), GraphError> {
        let to = to.into();
        self.shared.dag.write().add_edge(from, to.node, to.port, kind)
    }

    /// Inject `payload` on port 0 of `node`.
    pub fn activate<T>(
        &self,
        node: NodeId,
        payload: T,
    ) -> Result<(), GraphError>
    where
        T: Send + Sync + 'static,
    {
        self.activate_port(node, 0, payload)
    }

    /// Inject a [`Signal`] on port 0 of `node`.
    pub fn signal(
        &self,
        node: NodeId,
    ) -> Result<(), GraphError> {
        self.activate(node, Signal)
    }

    /// Inject `payload` on input `port` of `node`.
    pub fn activate_port<T>(
        &self,
        node: NodeId,
        port: usize,
        payload: T,
    ) -> Result<(), GraphError>
    where
        T: Send + Sync + 'static,
    {
        let expected = {
            let dag = self.shared.dag.read();
            let kind = dag
                .get_node(node)
                .ok_or(GraphError::NodeNotFound(node))?
                .kind();
            kind.input_type(port)
                .ok_or(GraphError::PortArityMismatch {
                    node,
                    port,
                    arity: kind.arity(),
                })?
        };
        let found = PortType::of::<T>();
        if expected != found {
            return Err(GraphError::PortTypeMismatch {
                node,
                port,
                expected: expected.name(),
                found: found.name(),
            });
        }

        let target = self
            .shared
            .node(node)
            .ok_or(GraphError::NodeNotFound(node))?;
        debug!(node = %target.name, port, "activate");
        self.shared.deliver(&target, port, Arc::new(payload), None);
        Ok(())
    }

    /// Block until the graph is quiescent, then report the first failure.
    ///
    /// A worker of the graph's pool keeps running tasks while it waits.
    pub fn wait_for_all(&self) -> Result<(), TaskError> {
        self.shared.core.wait_until(&self.shared.latch);
        match self.shared.failures.lock().first() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Every failure captured since the last reset.
    pub fn failures(&self) -> Vec<TaskError> {
        self.shared.failures.lock().clone()
    }

    /// Return every node to `Idle` and drop buffered items and failures.
    ///
    /// Refused with [`GraphError::Busy`] while work is in flight.
    pub fn reset(&self) -> Result<(), GraphError> {
        if !self.is_quiescent() {
            return Err(GraphError::Busy);
        }
        for node in self.shared.nodes.read().iter() {
            node.reset();
        }
        self.shared.failures.lock().clear();
        debug!(nodes = self.node_count(), "graph reset");
        Ok(())
    }

    /// Whether no invocation is queued or running.
    #[inline]
    pub fn is_quiescent(&self) -> bool {
        self.shared.latch.probe()
    }

    pub fn node_state(
        &self,
        node: NodeId,
    ) -> Option<NodeState> {
        self.shared.node(node).map(|node| node.state())
    }

    pub fn node_name(
        &self,
        node: NodeId,
    ) -> Option<String> {
        self.shared.node(node).map(|node| node.name.clone())
    }

    /// Items buffered on a join port and not yet emitted.
    pub fn pending(
        &self,
        node: NodeId,
        port: usize,
    ) -> usize {
        match self.shared.node(node).as_deref() {
            Some(NodeRuntime {
                behavior: Behavior::Join { buffer, .. },
                ..
            }) => buffer.lock().pending(port),
            Some(NodeRuntime {
                behavior: Behavior::Function { inbox, .. },
                ..
            }) => inbox.lock().pending.len(),
            _ => 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.shared.dag.read().num_nodes()
    }

    pub fn edge_count(&self) -> usize {
        self.shared.dag.read().num_edges()
    }

    pub fn topological_order(&self) -> Vec<NodeId> {
        self.shared.dag.read().topological_sort()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.shared.dag.read().roots()
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.shared.dag.read().leaves()
    }

    /// Run `f` against the graph structure.
    pub fn with_dag<R>(
        &self,
        f: impl FnOnce(&ComputationDAG) -> R,
    ) -> R {
        f(&self.shared.dag.read())
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FlowGraph {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("FlowGraph")
            .field("pool", &self.shared.core.id())
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("quiescent", &self.is_quiescent())
            .finish()
    }
}
