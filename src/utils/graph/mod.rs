//! Generic directed-graph infrastructure.
//!
//! Graph algorithms are written against the traits in [`traits`] and operate on dense
//! [`NodeId`] indices. [`IndexedGraph`] bridges domain keys such as block tags to those
//! indices.

pub mod algorithms;
mod indexed;
mod node;
mod traits;

pub use indexed::IndexedGraph;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
