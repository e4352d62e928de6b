//! Dominator tree over the blocks of a flow graph.

use std::collections::HashSet;

use crate::{
    analysis::{block_graph, FlowGraphAnalysis},
    ir::{BasicBlockTag, FlowGraph, GraphStore, ValueTag},
    utils::graph::{algorithms, IndexedGraph, NodeId, RootedGraph},
};

/// Computes the [`DominatorTree`] of a graph.
#[derive(Debug, Default, Clone, Copy)]
pub struct DominatorTreeAnalysis;

impl FlowGraphAnalysis for DominatorTreeAnalysis {
    type Output = DominatorTree;

    fn analyze(&self, graph: &FlowGraph) -> DominatorTree {
        DominatorTree::compute(graph)
    }
}

/// Dominance relation between the blocks of a graph.
///
/// Blocks unreachable from the entry point are outside the tree: they dominate nothing and
/// are dominated by nothing.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    graph: IndexedGraph<BasicBlockTag>,
    tree: algorithms::DominatorTree,
}

impl DominatorTree {
    /// Builds the dominator tree of `graph`.
    #[must_use]
    pub fn compute(graph: &GraphStore) -> Self {
        let graph = block_graph(graph);
        let tree = algorithms::compute_dominators(&graph);
        Self { graph, tree }
    }

    fn node(&self, block: &BasicBlockTag) -> Option<NodeId> {
        self.graph.node_id(block)
    }

    /// True if `block` is reachable from the entry point.
    #[must_use]
    pub fn is_reachable(&self, block: &BasicBlockTag) -> bool {
        self.node(block).is_some_and(|node| self.tree.is_reachable(node))
    }

    /// True if every path from the entry to `block` passes through `dominator`.
    /// A reachable block dominates itself.
    #[must_use]
    pub fn is_dominated_by(&self, block: &BasicBlockTag, dominator: &BasicBlockTag) -> bool {
        match (self.node(block), self.node(dominator)) {
            (Some(block), Some(dominator)) => self.tree.dominates(dominator, block),
            _ => false,
        }
    }

    /// Like [`DominatorTree::is_dominated_by`], excluding `block == dominator`.
    #[must_use]
    pub fn is_strictly_dominated_by(&self, block: &BasicBlockTag, dominator: &BasicBlockTag) -> bool {
        block != dominator && self.is_dominated_by(block, dominator)
    }

    /// The immediate dominator of a block.
    #[must_use]
    pub fn immediate_dominator(&self, block: &BasicBlockTag) -> Option<&BasicBlockTag> {
        let node = self.node(block)?;
        self.tree
            .immediate_dominator(node)
            .map(|idom| self.graph.key(idom))
    }

    /// Blocks immediately dominated by `block`.
    #[must_use]
    pub fn children(&self, block: &BasicBlockTag) -> Vec<BasicBlockTag> {
        self.node(block)
            .map(|node| self.graph.resolve(&self.tree.children(node)))
            .unwrap_or_default()
    }

    /// The dominators of `block`, from the block itself up to the entry.
    #[must_use]
    pub fn dominators(&self, block: &BasicBlockTag) -> Vec<BasicBlockTag> {
        self.node(block)
            .map(|node| {
                self.tree
                    .dominators(node)
                    .map(|d| self.graph.key(d).clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The nearest block that dominates every block in `blocks`.
    ///
    /// Returns `None` if `blocks` is empty or contains an unreachable block.
    #[must_use]
    pub fn try_find_common_dominator<'a>(
        &self,
        blocks: impl IntoIterator<Item = &'a BasicBlockTag>,
    ) -> Option<BasicBlockTag> {
        let mut common: Option<BasicBlockTag> = None;
        for block in blocks {
            if !self.is_reachable(block) {
                return None;
            }
            common = Some(match common {
                None => block.clone(),
                Some(current) => {
                    let chain: HashSet<BasicBlockTag> =
                        self.dominators(&current).into_iter().collect();
                    self.dominators(block)
                        .into_iter()
                        .find(|d| chain.contains(d))?
                }
            });
        }
        common
    }

    /// Reachable blocks in reverse postorder of the control-flow graph.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BasicBlockTag> {
        if self.graph.keys().is_empty() {
            return Vec::new();
        }
        self.graph
            .resolve(&algorithms::reverse_postorder(&self.graph, self.graph.entry()))
    }

    /// True if `value`, as defined in `graph`, is available at position `index` of `block`
    /// (`None` meaning the block's flow).
    ///
    /// Block parameters are available throughout their block and every block it dominates;
    /// instructions are available after their position in the defining block and in every
    /// block strictly dominated by it.
    #[must_use]
    pub fn dominates_value(
        &self,
        graph: &GraphStore,
        value: &ValueTag,
        block: &BasicBlockTag,
        index: Option<usize>,
    ) -> bool {
        if graph.is_parameter(value) {
            return graph
                .defining_block(value)
                .is_some_and(|def| self.is_dominated_by(block, def));
        }
        let Some(named) = graph.instruction(value) else {
            return false;
        };
        if named.block() == block {
            let Some(position) = graph.block(block).and_then(|b| b.instruction_index(value)) else {
                return false;
            };
            return index.map_or(true, |use_index| position < use_index);
        }
        self.is_strictly_dominated_by(block, named.block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockFlow, Branch, FlowGraphBuilder, SwitchFlow, Type};

    #[test]
    fn test_diamond_common_dominator() {
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let cond = builder.append_parameter(&entry, Type::Bool, "cond");
        let left = builder.add_block("left");
        let right = builder.add_block("right");
        let join = builder.add_block("join");
        let dead = builder.add_block("dead");
        builder.set_flow(
            &entry,
            BlockFlow::Switch(SwitchFlow::if_else(cond, Branch::to(left.clone()), Branch::to(right.clone()))),
        );
        builder.set_flow(&left, BlockFlow::jump(join.clone(), Vec::new()));
        builder.set_flow(&right, BlockFlow::jump(join.clone(), Vec::new()));
        builder.set_flow(&dead, BlockFlow::jump(join.clone(), Vec::new()));
        let graph = builder.to_immutable();

        let tree = graph.get_analysis::<DominatorTreeAnalysis>();
        assert!(tree.is_dominated_by(&join, &entry));
        assert!(!tree.is_dominated_by(&join, &left));
        assert!(tree.is_strictly_dominated_by(&left, &entry));
        assert!(!tree.is_strictly_dominated_by(&left, &left));
        assert_eq!(tree.immediate_dominator(&join), Some(&entry));
        assert_eq!(tree.try_find_common_dominator([&left, &right]), Some(entry.clone()));
        assert_eq!(tree.try_find_common_dominator([&join]), Some(join.clone()));
        assert_eq!(tree.try_find_common_dominator([&left, &dead]), None);
        assert!(!tree.is_reachable(&dead));
        assert_eq!(tree.reverse_postorder().first(), Some(&entry));
        assert_eq!(tree.reverse_postorder().len(), 4);
    }
}
