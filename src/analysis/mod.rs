//! Cached analyses over flow graphs.
//!
//! Every analysis is a pure function of one [`FlowGraph`] instance. Results are requested
//! through [`FlowGraph::get_analysis`], computed on first use and memoized in a side table
//! owned by the graph. A graph produced by a builder starts with an empty table, so a result
//! can never outlive the graph it describes and no invalidation logic exists anywhere.
//!
//! # Architecture
//!
//! Each analysis is split into a zero-sized marker implementing [`FlowGraphAnalysis`] and
//! the result type it produces:
//!
//! - [`DominatorTreeAnalysis`] - dominance between blocks and values
//! - [`BasicBlockPredecessorsAnalysis`] - predecessor lists
//! - [`BlockReachabilityAnalysis`] - strict block-to-block reachability
//! - [`ValueUsesAnalysis`] - instruction and flow users of every value
//! - [`EffectfulInstructionsAnalysis`] - instructions that write memory or may throw
//! - [`AliasAnalysis`] - must/no/may alias classification of pointer pairs
//! - [`MemorySsaAnalysis`] - known pointer contents at every program point
//! - [`DependencyOrderingAnalysis`] - the must-run-before relation inside a block
//! - [`ValueNumberingAnalysis`] - structural equivalence classes of values
//!
//! The [`dataflow`] module holds the two generic solvers the analyses and transforms
//! build on: a sparse lattice solver over SSA values and a block-level fixpoint solver.
//!
//! # Usage
//!
//! ```rust
//! use flowscope::analysis::DominatorTreeAnalysis;
//! use flowscope::ir::FlowGraphBuilder;
//!
//! let graph = FlowGraphBuilder::new().to_immutable();
//! let tree = graph.get_analysis::<DominatorTreeAnalysis>();
//! assert!(tree.is_dominated_by(graph.entry_point(), graph.entry_point()));
//! ```
//!
//! [`FlowGraph`]: crate::ir::FlowGraph
//! [`FlowGraph::get_analysis`]: crate::ir::FlowGraph::get_analysis

pub mod dataflow;

mod alias;
mod cache;
mod dominators;
mod effects;
mod memory;
mod numbering;
mod ordering;
mod predecessors;
mod reachability;
mod uses;

pub use alias::{Alias, AliasAnalysis, AliasInfo};
pub(crate) use cache::AnalysisCache;
pub use cache::FlowGraphAnalysis;
pub use dominators::{DominatorTree, DominatorTreeAnalysis};
pub use effects::{EffectfulInstructions, EffectfulInstructionsAnalysis};
pub use memory::{MemoryState, MemorySsa, MemorySsaAnalysis};
pub use numbering::{ValueNumbering, ValueNumberingAnalysis};
pub use ordering::{DependencyOrdering, DependencyOrderingAnalysis};
pub use predecessors::{BasicBlockPredecessors, BasicBlockPredecessorsAnalysis};
pub use reachability::{BlockReachability, BlockReachabilityAnalysis};
pub use uses::{ValueUses, ValueUsesAnalysis};

use crate::{
    ir::{BasicBlockTag, GraphStore},
    utils::graph::IndexedGraph,
};

/// Projects the block structure of a graph onto the generic graph representation.
///
/// Nodes are added in block order, so node ids follow [`GraphStore::block_tags`].
pub(crate) fn block_graph(graph: &GraphStore) -> IndexedGraph<BasicBlockTag> {
    let mut indexed = IndexedGraph::new();
    for tag in graph.block_tags() {
        indexed.add_node(tag.clone());
    }
    for block in graph.blocks() {
        for target in block.flow().successors() {
            if graph.contains_block(&target) {
                indexed.add_edge(block.tag().clone(), target);
            }
        }
    }
    indexed.set_entry(graph.entry_point().clone());
    indexed
}
