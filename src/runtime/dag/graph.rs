//! Static graph structure and edge validation.
//!
//! [`ComputationDAG`] only records nodes and edges; it never runs anything.
//! Every edge is checked when it is added, so the structure is acyclic and
//! well-typed at all times.

use std::collections::VecDeque;

use smallvec::SmallVec;
use thiserror::Error;

use crate::runtime::scheduler::TaskPriority;

use super::node::{DAGNode, DAGNodeKind, EdgeKind, PortType};
use super::node_id::{NodeId, NodeIdGenerator};

/// Errors raised while building or driving a graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The edge would close a cycle.
    #[error("Edge {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    /// The port index is outside of the node's ports.
    #[error("{node} has {arity} input port(s), port {port} does not exist")]
    PortArityMismatch {
        node: NodeId,
        port: usize,
        arity: usize,
    },

    /// The item or edge type does not match the port.
    #[error("{node} port {port} expects {expected}, found {found}")]
    PortTypeMismatch {
        node: NodeId,
        port: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// No node with this id exists in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The same source is already wired to this port.
    #[error("Duplicate edge {from} -> {to} (port {port})")]
    DuplicateEdge {
        from: NodeId,
        to: NodeId,
        port: usize,
    },

    /// The graph still has work in flight.
    #[error("Graph is still running")]
    Busy,
}

/// One edge: the source's output to one input port of the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub port: usize,
    pub kind: EdgeKind,
}

/// Nodes and validated edges of a task graph.
#[derive(Debug, Default)]
pub struct ComputationDAG {
    nodes: Vec<DAGNode>,
    edges: Vec<Edge>,
    ids: NodeIdGenerator,
}

impl ComputationDAG {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Add a node and return its id.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: DAGNodeKind,
        priority: TaskPriority,
    ) -> NodeId {
        let id = self.ids.generate();
        self.nodes.push(DAGNode::new(id, name, kind, priority));
        id
    }

    #[inline]
    pub fn contains_node(
        &self,
        id: NodeId,
    ) -> bool {
        id.value() < self.nodes.len()
    }

    #[inline]
    pub fn get_node(
        &self,
        id: NodeId,
    ) -> Option<&DAGNode> {
        self.nodes.get(id.value())
    }

    fn node(
        &self,
        id: NodeId,
    ) -> Result<&DAGNode, GraphError> {
        self.get_node(id).ok_or(GraphError::NodeNotFound(id))
    }

    /// All nodes, in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &DAGNode> {
        self.nodes.iter()
    }

    /// All edges, in insertion order.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges of `id`, in insertion order.
    pub fn edges_from(
        &self,
        id: NodeId,
    ) -> SmallVec<[Edge; 4]> {
        self.edges.iter().filter(|edge| edge.from == id).copied().collect()
    }

    /// Whether some edge goes from `from` to `to`.
    pub fn has_edge(
        &self,
        from: NodeId,
        to: NodeId,
    ) -> bool {
        self.get_node(from).is_some_and(|node| node.dependents().contains(&to))
    }

    /// Number of incoming edges of `id`.
    pub fn in_degree(
        &self,
        id: NodeId,
    ) -> usize {
        self.get_node(id).map_or(0, DAGNode::in_degree)
    }

    /// Add an edge from the output of `from` to input `port` of `to`.
    ///
    /// Rejects unknown nodes, out-of-range ports, data edges whose types do
    /// not line up, signal edges into non-signal ports, duplicates and
    /// cycles. A rejected edge leaves the graph unchanged.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        port: usize,
        kind: EdgeKind,
    ) -> Result<(), GraphError> {
        let source = self.node(from)?;
        let target = self.node(to)?;

        let arity = target.kind().arity();
        let expected = target
            .kind()
            .input_type(port)
            .ok_or(GraphError::PortArityMismatch {
                node: to,
                port,
                arity,
            })?;
        let found = match kind {
            EdgeKind::Signal => PortType::signal(),
            EdgeKind::Data => source.kind().output_type(),
        };
        if expected != found {
            return Err(GraphError::PortTypeMismatch {
                node: to,
                port,
                expected: expected.name(),
                found: found.name(),
            });
        }

        if self
            .edges
            .iter()
            .any(|edge| edge.from == from && edge.to == to && edge.port == port)
        {
            return Err(GraphError::DuplicateEdge { from, to, port });
        }
        if from == to || self.reaches(to, from) {
            return Err(GraphError::CycleDetected { from, to });
        }

        self.edges.push(Edge {
            from,
            to,
            port,
            kind,
        });
        self.nodes[from.value()].add_dependent(to);
        self.nodes[to.value()].add_dependency(from);
        Ok(())
    }

    /// Whether `target` is reachable from `start` along existing edges.
    fn reaches(
        &self,
        start: NodeId,
        target: NodeId,
    ) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut visited[id.value()], true) {
                continue;
            }
            stack.extend(self.nodes[id.value()].dependents().iter().copied());
        }
        false
    }

    /// Nodes without incoming edges.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.is_root())
            .map(DAGNode::id)
            .collect()
    }

    /// Nodes without outgoing edges.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(DAGNode::id)
            .collect()
    }

    /// Nodes grouped by depth: every node comes after all of its sources.
    pub fn levels(&self) -> Vec<Vec<NodeId>> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(DAGNode::in_degree).collect();
        let mut current: Vec<NodeId> = self.roots();
        let mut levels = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for id in &current {
                for dependent in self.nodes[id.value()].dependents() {
                    let count = &mut remaining[dependent.value()];
                    *count -= 1;
                    if *count == 0 {
                        next.push(*dependent);
                    }
                }
            }
            levels.push(std::mem::replace(&mut current, next));
        }
        levels
    }

    /// Kahn order over the whole graph; ties are broken by node id.
    pub fn topological_sort(&self) -> Vec<NodeId> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(DAGNode::in_degree).collect();
        let mut queue: VecDeque<NodeId> = self.roots().into();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for dependent in self.nodes[id.value()].dependents() {
                let count = &mut remaining[dependent.value()];
                *count -= 1;
                if *count == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
        order
    }

    /// Width of the widest level.
    pub fn max_parallelism(&self) -> usize {
        self.levels().iter().map(Vec::len).max().unwrap_or(0)
    }
}
