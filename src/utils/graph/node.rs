//! Node identifier for index-based graphs.
//!
//! This module provides the [`NodeId`] type, a strongly-typed index for nodes within a
//! graph. The newtype wrapper prevents accidental confusion between node indices and other
//! integer values.

use std::fmt;

/// A strongly-typed identifier for nodes within a graph.
///
/// Node IDs are dense, assigned sequentially starting from 0, and can be used directly to
/// index per-node vectors.
///
/// # Examples
///
/// ```rust,ignore
/// use flowscope::utils::graph::NodeId;
///
/// let node = NodeId::new(5);
/// assert_eq!(node.index(), 5);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new(3), NodeId::new(1), NodeId::new(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_node_id_hash() {
        let mut set: HashSet<NodeId> = HashSet::new();
        set.insert(NodeId::new(1));
        set.insert(NodeId::new(2));
        set.insert(NodeId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_node_id_conversions() {
        let node: NodeId = 7usize.into();
        assert_eq!(usize::from(node), 7);
        assert_eq!(format!("{node}"), "n7");
        assert_eq!(format!("{node:?}"), "NodeId(7)");
    }
}
