//! Strict reachability between blocks.
//!
//! Block `b` is *strictly* reachable from `a` if there is a path of at least one edge from
//! `a` to `b`. In particular a block is strictly reachable from itself only if it lies on a
//! cycle.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{block_graph, FlowGraphAnalysis},
    ir::{BasicBlockTag, FlowGraph},
    utils::graph::{algorithms, Successors},
};

/// Computes [`BlockReachability`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockReachabilityAnalysis;

impl FlowGraphAnalysis for BlockReachabilityAnalysis {
    type Output = BlockReachability;

    fn analyze(&self, graph: &FlowGraph) -> BlockReachability {
        let indexed = block_graph(graph);
        let mut reachable = HashMap::new();
        for tag in graph.block_tags() {
            let Some(node) = indexed.node_id(tag) else {
                continue;
            };
            let mut set = HashSet::new();
            for successor in indexed.successors(node) {
                for reached in algorithms::dfs(&indexed, successor) {
                    set.insert(indexed.key(reached).clone());
                }
            }
            reachable.insert(tag.clone(), set);
        }
        BlockReachability { reachable }
    }
}

/// For every block, the set of blocks strictly reachable from it.
#[derive(Debug, Clone)]
pub struct BlockReachability {
    reachable: HashMap<BasicBlockTag, HashSet<BasicBlockTag>>,
}

impl BlockReachability {
    /// True if a path of one or more edges leads from `from` to `to`.
    #[must_use]
    pub fn is_strictly_reachable(&self, from: &BasicBlockTag, to: &BasicBlockTag) -> bool {
        self.reachable.get(from).is_some_and(|set| set.contains(to))
    }

    /// Blocks strictly reachable from `from`.
    #[must_use]
    pub fn reachable_from(&self, from: &BasicBlockTag) -> Option<&HashSet<BasicBlockTag>> {
        self.reachable.get(from)
    }

    /// True if `block` lies on a cycle.
    #[must_use]
    pub fn is_in_cycle(&self, block: &BasicBlockTag) -> bool {
        self.is_strictly_reachable(block, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockFlow, FlowGraphBuilder};

    #[test]
    fn test_cycle_detection() {
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let header = builder.add_block("header");
        let orphan = builder.add_block("orphan");
        builder.set_flow(&entry, BlockFlow::jump(header.clone(), Vec::new()));
        builder.set_flow(&header, BlockFlow::jump(header.clone(), Vec::new()));
        let graph = builder.to_immutable();

        let reach = graph.get_analysis::<BlockReachabilityAnalysis>();
        assert!(reach.is_strictly_reachable(&entry, &header));
        assert!(!reach.is_strictly_reachable(&entry, &entry));
        assert!(!reach.is_in_cycle(&entry));
        assert!(reach.is_in_cycle(&header));
        assert!(!reach.is_strictly_reachable(&entry, &orphan));
    }
}
