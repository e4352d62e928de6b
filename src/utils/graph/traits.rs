//! Graph abstraction traits.
//!
//! The algorithms in [`crate::utils::graph::algorithms`] are written against these traits
//! instead of a concrete graph type, so they can run over any structure that can enumerate
//! its nodes and edges by [`NodeId`].

use crate::utils::graph::NodeId;

/// Basic node enumeration.
pub trait GraphBase {
    /// Number of nodes. Node ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Iterates over all node ids.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Forward edges.
pub trait Successors: GraphBase {
    /// Direct successors of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward edges.
pub trait Predecessors: GraphBase {
    /// Direct predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with a distinguished entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// The entry node.
    fn entry(&self) -> NodeId;
}
