//! Predecessor map of the block graph.

use std::collections::HashMap;

use crate::{
    analysis::FlowGraphAnalysis,
    ir::{BasicBlockTag, FlowGraph},
};

/// Computes [`BasicBlockPredecessors`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicBlockPredecessorsAnalysis;

impl FlowGraphAnalysis for BasicBlockPredecessorsAnalysis {
    type Output = BasicBlockPredecessors;

    fn analyze(&self, graph: &FlowGraph) -> BasicBlockPredecessors {
        let mut predecessors: HashMap<BasicBlockTag, Vec<BasicBlockTag>> = graph
            .block_tags()
            .iter()
            .map(|tag| (tag.clone(), Vec::new()))
            .collect();
        for block in graph.blocks() {
            for target in block.flow().successors() {
                let list = predecessors.entry(target).or_default();
                if !list.contains(block.tag()) {
                    list.push(block.tag().clone());
                }
            }
        }
        BasicBlockPredecessors { predecessors }
    }
}

/// The distinct predecessors of every block, in block order.
#[derive(Debug, Clone)]
pub struct BasicBlockPredecessors {
    predecessors: HashMap<BasicBlockTag, Vec<BasicBlockTag>>,
}

impl BasicBlockPredecessors {
    /// Blocks with at least one branch to `block`.
    #[must_use]
    pub fn predecessors(&self, block: &BasicBlockTag) -> &[BasicBlockTag] {
        self.predecessors.get(block).map_or(&[], Vec::as_slice)
    }

    /// True if `block` has exactly one predecessor and it is `source`.
    #[must_use]
    pub fn is_only_predecessor(&self, block: &BasicBlockTag, source: &BasicBlockTag) -> bool {
        matches!(self.predecessors(block), [only] if only == source)
    }
}
