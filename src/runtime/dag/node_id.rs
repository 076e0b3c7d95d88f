//! Node ID for the task graph
//!
//! Represents a unique identifier for each node of a graph.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identifier of a node inside one graph.
///
/// Ids are dense: the n-th node added to a graph gets `NodeId(n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Create a new NodeId with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use yaoxiang_flow::runtime::dag::NodeId;
    ///
    /// let id = NodeId::new(42);
    /// assert_eq!(id.value(), 42);
    /// ```
    #[inline]
    pub fn new(value: usize) -> Self {
        NodeId(value)
    }

    /// Returns the inner value of the node ID.
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Generator for graph-local node IDs.
///
/// # Examples
///
/// ```
/// use yaoxiang_flow::runtime::dag::NodeIdGenerator;
///
/// let generator = NodeIdGenerator::new();
/// assert_eq!(generator.generate().value(), 0);
/// assert_eq!(generator.generate().value(), 1);
/// ```
#[derive(Debug, Default)]
pub struct NodeIdGenerator {
    next_id: AtomicUsize,
}

impl NodeIdGenerator {
    /// Create a new node ID generator starting at zero.
    #[inline]
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate a new unique node ID.
    #[inline]
    pub fn generate(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far.
    #[inline]
    pub fn issued(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}
