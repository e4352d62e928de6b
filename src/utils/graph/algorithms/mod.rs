//! Graph algorithms for program analysis.
//!
//! # Available Algorithms
//!
//! ## Traversal
//!
//! - [`dfs`] - Depth-first search traversal
//! - [`postorder`] - Postorder traversal
//! - [`reverse_postorder`] - Reverse postorder traversal (useful for data flow)
//!
//! ## Dominator Analysis
//!
//! - [`compute_dominators`] - Compute the dominator tree using Lengauer-Tarjan
//! - [`DominatorTree`] - Result of dominator computation
//!
//! ## Strongly Connected Components
//!
//! - [`strongly_connected_components`] - Tarjan's SCC algorithm
//!
//! # Algorithm Selection
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | DFS | O(V + E) | Reachability |
//! | Dominators | O(E α(V)) | SSA validation, materialization points |
//! | SCC | O(V + E) | Phi elimination, loop detection |

mod dominators;
mod scc;
mod traversal;

pub use dominators::{compute_dominators, DominatorIterator, DominatorTree};
pub use scc::strongly_connected_components;
pub use traversal::{dfs, postorder, reverse_postorder, DfsIterator};
