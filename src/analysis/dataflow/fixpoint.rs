//! Block-level forward fixpoint analyses.
//!
//! A [`BlockFixpointAnalysis`] propagates one state per basic block: the input of a block is
//! the meet of the states flowing along its incoming edges, and its output is computed by a
//! transfer function over the whole block. This is coarser than the sparse
//! [`LatticeSolver`](crate::analysis::dataflow::LatticeSolver) and suits facts about memory
//! rather than about individual values.
//!
//! Only blocks reachable from the entry are visited. Incoming edges whose source has not
//! been visited yet are ignored (they act as Top), which makes the solver optimistic around
//! loops: a loop header is first solved from its preheader alone and lowered once the back
//! edge is known.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    analysis::{dataflow::MeetSemiLattice, DominatorTreeAnalysis},
    ir::{BasicBlock, BasicBlockTag, FlowGraph},
};

/// A forward analysis with one state per basic block.
pub trait BlockFixpointAnalysis {
    /// The propagated state.
    type State: MeetSemiLattice;

    /// The state on entry to the entry block.
    fn entry_state(&self, graph: &FlowGraph) -> Self::State;

    /// Computes a block's output from its input.
    fn transfer(&self, block: &BasicBlock, input: &Self::State, graph: &FlowGraph) -> Self::State;

    /// The state flowing along branch `index` of `block`. Defaults to the block's output.
    fn edge(
        &self,
        _block: &BasicBlock,
        _index: usize,
        output: &Self::State,
        _graph: &FlowGraph,
    ) -> Self::State {
        output.clone()
    }
}

/// Per-block input and output states at the fixpoint.
#[derive(Debug, Clone)]
pub struct BlockFixpointResult<S> {
    inputs: HashMap<BasicBlockTag, S>,
    outputs: HashMap<BasicBlockTag, S>,
}

impl<S> BlockFixpointResult<S> {
    /// State on entry to a block; `None` for unreachable blocks.
    #[must_use]
    pub fn input(&self, block: &BasicBlockTag) -> Option<&S> {
        self.inputs.get(block)
    }

    /// State at the end of a block; `None` for unreachable blocks.
    #[must_use]
    pub fn output(&self, block: &BasicBlockTag) -> Option<&S> {
        self.outputs.get(block)
    }
}

/// Solves `analysis` over `graph`.
pub fn solve_block_fixpoint<A>(analysis: &A, graph: &FlowGraph) -> BlockFixpointResult<A::State>
where
    A: BlockFixpointAnalysis,
{
    let dominators = graph.get_analysis::<DominatorTreeAnalysis>();
    let order = dominators.reverse_postorder();

    // (source, branch index) pairs feeding each block
    let mut incoming: HashMap<BasicBlockTag, Vec<(BasicBlockTag, usize)>> = HashMap::new();
    for block in graph.blocks() {
        for (index, branch) in block.flow().branches().into_iter().enumerate() {
            incoming
                .entry(branch.target().clone())
                .or_default()
                .push((block.tag().clone(), index));
        }
    }

    let entry = graph.entry_point().clone();
    let entry_state = analysis.entry_state(graph);
    let mut edges: HashMap<(BasicBlockTag, usize), A::State> = HashMap::new();
    let mut inputs: HashMap<BasicBlockTag, A::State> = HashMap::new();
    let mut outputs: HashMap<BasicBlockTag, A::State> = HashMap::new();

    let mut worklist: VecDeque<BasicBlockTag> = order.iter().cloned().collect();
    let mut queued: HashSet<BasicBlockTag> = order.iter().cloned().collect();

    while let Some(tag) = worklist.pop_front() {
        queued.remove(&tag);
        let Some(block) = graph.block(&tag) else {
            continue;
        };

        let mut input: Option<A::State> = (tag == entry).then(|| entry_state.clone());
        for source in incoming.get(&tag).into_iter().flatten() {
            if let Some(state) = edges.get(source) {
                input = Some(match input {
                    Some(acc) => acc.meet(state),
                    None => state.clone(),
                });
            }
        }
        let Some(input) = input else {
            continue;
        };

        let output = analysis.transfer(block, &input, graph);
        inputs.insert(tag.clone(), input);
        if outputs.get(&tag) == Some(&output) {
            continue;
        }

        for (index, branch) in block.flow().branches().into_iter().enumerate() {
            let state = analysis.edge(block, index, &output, graph);
            let key = (tag.clone(), index);
            if edges.get(&key) != Some(&state) {
                edges.insert(key, state);
                let target = branch.target();
                if dominators.is_reachable(target) && queued.insert(target.clone()) {
                    worklist.push_back(target.clone());
                }
            }
        }
        outputs.insert(tag, output);
    }

    BlockFixpointResult { inputs, outputs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockFlow, Constant, FlowGraphBuilder, Instruction, IntegerSpec, Type};

    /// Collects the names of blocks visited on some path.
    struct Visited;

    impl BlockFixpointAnalysis for Visited {
        type State = HashSet<String>;

        fn entry_state(&self, _: &FlowGraph) -> Self::State {
            HashSet::new()
        }

        fn transfer(&self, block: &BasicBlock, input: &Self::State, _: &FlowGraph) -> Self::State {
            let mut output = input.clone();
            output.insert(block.tag().name().to_string());
            output
        }
    }

    #[test]
    fn test_loop_reaches_fixpoint() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let header = builder.add_block("header");
        let body = builder.add_block("body");
        let exit = builder.add_block("exit");
        let flag = builder.append_parameter(&entry, Type::Bool, "flag");
        builder.set_flow(&entry, BlockFlow::jump(header.clone(), Vec::new()));
        builder.set_flow(
            &header,
            BlockFlow::Switch(crate::ir::SwitchFlow::if_else(
                flag,
                crate::ir::Branch::to(body.clone()),
                crate::ir::Branch::to(exit.clone()),
            )),
        );
        builder.set_flow(&body, BlockFlow::jump(header.clone(), Vec::new()));
        let zero = builder.append_instruction(&exit, Instruction::constant(Constant::i32(0), int.clone()), "zero");
        builder.set_flow(&exit, BlockFlow::return_value(int, zero));
        let graph = builder.to_immutable();

        let result = solve_block_fixpoint(&Visited, &graph);
        let at_header = result.input(&header).unwrap();
        assert!(at_header.contains("body"));
        assert!(at_header.contains("entry"));
        assert_eq!(result.output(&exit).unwrap().len(), 4);
    }
}
