//! Graph nodes, ports and edge kinds.

use std::any::{self, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::runtime::scheduler::TaskPriority;

use super::node_id::NodeId;

/// A shared, read-only data item travelling along an edge.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The unit item carried by signal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signal;

/// Lifecycle of a node during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Waiting for input.
    Idle = 0,
    /// Has an invocation queued on the pool.
    Ready = 1,
    /// An invocation is executing.
    Running = 2,
    /// Finished its last invocation.
    Done = 3,
}

impl NodeState {
    #[inline]
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Ready,
            2 => NodeState::Running,
            3 => NodeState::Done,
            _ => NodeState::Idle,
        }
    }

    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

/// How a function node handles inputs arriving while it is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationPolicy {
    /// One invocation at a time; later inputs wait in arrival order.
    #[default]
    Serial,
    /// One task per input.
    Concurrent,
}

/// What an edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Completion only; the destination port must accept [`Signal`].
    Signal,
    /// The source's output value, shared between all consumers.
    Data,
}

/// Runtime type of a port.
#[derive(Clone, Copy)]
pub struct PortType {
    id: TypeId,
    name: &'static str,
}

impl PortType {
    /// Port type of `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    /// Port type of [`Signal`].
    #[inline]
    pub fn signal() -> Self {
        Self::of::<Signal>()
    }

    #[inline]
    pub fn is_signal(&self) -> bool {
        self.id == TypeId::of::<Signal>()
    }

    /// Type name, for error messages.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `payload` holds a value of this type.
    #[inline]
    pub fn accepts(
        &self,
        payload: &Payload,
    ) -> bool {
        (**payload).type_id() == self.id
    }
}

impl PartialEq for PortType {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for PortType {}

impl fmt::Debug for PortType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Kind of a node, with its port layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DAGNodeKind {
    /// Runs a body once per run after one signal per incoming edge.
    Continue,

    /// Maps each input item to one output item.
    Function {
        policy: InvocationPolicy,
        input: PortType,
        output: PortType,
    },

    /// Pairs up items from several ports into tuples.
    Join {
        ports: Vec<PortType>,
        output: PortType,
    },
}

impl DAGNodeKind {
    /// Number of input ports.
    pub fn arity(&self) -> usize {
        match self {
            DAGNodeKind::Continue | DAGNodeKind::Function { .. } => 1,
            DAGNodeKind::Join { ports, .. } => ports.len(),
        }
    }

    /// Type accepted on `port`.
    pub fn input_type(
        &self,
        port: usize,
    ) -> Option<PortType> {
        match self {
            DAGNodeKind::Continue => (port == 0).then(PortType::signal),
            DAGNodeKind::Function { input, .. } => (port == 0).then_some(*input),
            DAGNodeKind::Join { ports, .. } => ports.get(port).copied(),
        }
    }

    /// Type of the value emitted on data edges.
    pub fn output_type(&self) -> PortType {
        match self {
            DAGNodeKind::Continue => PortType::signal(),
            DAGNodeKind::Function { output, .. } | DAGNodeKind::Join { output, .. } => *output,
        }
    }

    #[inline]
    pub fn is_join(&self) -> bool {
        matches!(self, DAGNodeKind::Join { .. })
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            DAGNodeKind::Continue => "continue",
            DAGNodeKind::Function { .. } => "function",
            DAGNodeKind::Join { .. } => "join",
        }
    }
}

/// Structural record of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct DAGNode {
    id: NodeId,
    name: String,
    kind: DAGNodeKind,
    priority: TaskPriority,
    /// Sources of incoming edges, one entry per edge.
    dependencies: Vec<NodeId>,
    /// Destinations of outgoing edges, one entry per edge.
    dependents: Vec<NodeId>,
}

impl DAGNode {
    /// Create a new node with no edges.
    #[inline]
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        kind: DAGNodeKind,
        priority: TaskPriority,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            priority,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &DAGNodeKind {
        &self.kind
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Get the list of nodes this node depends on.
    #[inline]
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Get the list of nodes that depend on this node.
    #[inline]
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    #[inline]
    pub(crate) fn add_dependency(
        &mut self,
        dependency: NodeId,
    ) {
        self.dependencies.push(dependency);
    }

    #[inline]
    pub(crate) fn add_dependent(
        &mut self,
        dependent: NodeId,
    ) {
        self.dependents.push(dependent);
    }

    /// Check if this node depends on the given node.
    #[inline]
    pub fn depends_on(
        &self,
        node_id: NodeId,
    ) -> bool {
        self.dependencies.contains(&node_id)
    }

    /// Number of incoming edges.
    #[inline]
    pub fn in_degree(&self) -> usize {
        self.dependencies.len()
    }

    /// Number of outgoing edges.
    #[inline]
    pub fn out_degree(&self) -> usize {
        self.dependents.len()
    }

    /// Check if this node is a leaf (no dependents).
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.dependents.is_empty()
    }

    /// Check if this node is a root (no dependencies).
    #[inline]
    pub fn is_root(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl fmt::Display for DAGNode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.id, self.name, self.kind.label())
    }
}
