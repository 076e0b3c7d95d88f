//! Task graphs
//!
//! Continue, function and join nodes wired by typed edges and executed on a
//! [`FlowScheduler`](crate::runtime::scheduler::FlowScheduler).
//!
//! # Architecture
//!
//! - [`NodeId`](node_id::NodeId) - Identifier of a node inside one graph
//! - [`DAGNode`](node::DAGNode) / [`DAGNodeKind`](node::DAGNodeKind) - Structural node record and port layout
//! - [`ComputationDAG`](graph::ComputationDAG) - Validated graph structure
//! - [`JoinTuple`](join::JoinTuple) - Tuple types a join node pairs up
//! - [`FlowGraph`](flow::FlowGraph) - The executable graph

pub mod flow;
pub mod graph;
pub mod join;
pub mod node;
pub mod node_id;

pub use flow::{FlowGraph, PortRef};
pub use graph::{ComputationDAG, Edge, GraphError};
pub use join::JoinTuple;
pub use node::{DAGNode, DAGNodeKind, EdgeKind, InvocationPolicy, NodeState, Payload, PortType, Signal};
pub use node_id::{NodeId, NodeIdGenerator};

#[cfg(test)]
mod tests;
