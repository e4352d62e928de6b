//! A lightweight memory SSA: what is known about memory contents at every program point.
//!
//! The state at a program point maps pointers to the SSA value they are known to hold. It
//! is computed by a forward [`BlockFixpointAnalysis`] whose meet keeps only the entries on
//! which all incoming edges agree:
//!
//! - `store p, v` kills every entry whose pointer may alias `p`, then records `p -> v`
//! - `load p` records `p -> load` when nothing is known about `p` yet
//! - any other instruction that writes memory (calls, constructors) forgets everything
//!
//! Pointers are keyed by their copy-resolved value, see [`GraphStore::resolve_copies`].
//!
//! [`GraphStore::resolve_copies`]: crate::ir::GraphStore::resolve_copies

use std::{collections::HashMap, sync::Arc};

use crate::{
    analysis::{
        dataflow::{solve_block_fixpoint, BlockFixpointAnalysis, MeetSemiLattice},
        AliasAnalysis, AliasInfo, FlowGraphAnalysis,
    },
    ir::{BasicBlock, BasicBlockTag, BlockFlow, EffectFlags, FlowGraph, GraphStore, Instruction, ValueTag},
};

/// Known pointer contents at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    known: HashMap<ValueTag, ValueTag>,
}

impl MemoryState {
    /// The value most recently stored to (or loaded from) `pointer`, if it is known.
    ///
    /// `pointer` must already be copy-resolved.
    #[must_use]
    pub fn try_get_value_at(&self, pointer: &ValueTag) -> Option<&ValueTag> {
        self.known.get(pointer)
    }

    /// Number of pointers with known contents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True if nothing is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    fn apply(
        &mut self,
        defined: Option<&ValueTag>,
        instruction: &Instruction,
        alias: &AliasInfo,
        graph: &GraphStore,
    ) {
        if let (Some(pointer), Some(value)) = (instruction.store_pointer(), instruction.store_value()) {
            let pointer = graph.resolve_copies(pointer);
            self.known.retain(|key, _| !alias.may_alias(key, pointer));
            self.known.insert(pointer.clone(), value.clone());
            return;
        }
        if let Some(pointer) = instruction.load_pointer() {
            if let Some(defined) = defined {
                let pointer = graph.resolve_copies(pointer);
                self.known
                    .entry(pointer.clone())
                    .or_insert_with(|| defined.clone());
            }
            return;
        }
        if instruction
            .prototype()
            .effects()
            .contains(EffectFlags::WRITES_MEMORY)
        {
            self.known.clear();
        }
    }
}

impl MeetSemiLattice for MemoryState {
    fn meet(&self, other: &Self) -> Self {
        let known = self
            .known
            .iter()
            .filter(|(pointer, value)| other.known.get(*pointer) == Some(*value))
            .map(|(pointer, value)| (pointer.clone(), value.clone()))
            .collect();
        MemoryState { known }
    }

    fn is_bottom(&self) -> bool {
        self.known.is_empty()
    }
}

struct MemoryTransfer {
    alias: Arc<AliasInfo>,
}

impl MemoryTransfer {
    fn run_block(
        &self,
        block: &BasicBlock,
        input: &MemoryState,
        graph: &FlowGraph,
        mut record: impl FnMut(&ValueTag, &MemoryState),
    ) -> MemoryState {
        let mut state = input.clone();
        for tag in block.instructions() {
            let Some(named) = graph.instruction(tag) else {
                continue;
            };
            record(tag, &state);
            state.apply(Some(tag), named.instruction(), &self.alias, graph);
        }
        if let BlockFlow::Try(flow) = block.flow() {
            state.apply(None, flow.instruction(), &self.alias, graph);
        }
        state
    }
}

impl BlockFixpointAnalysis for MemoryTransfer {
    type State = MemoryState;

    fn entry_state(&self, _graph: &FlowGraph) -> MemoryState {
        MemoryState::default()
    }

    fn transfer(&self, block: &BasicBlock, input: &MemoryState, graph: &FlowGraph) -> MemoryState {
        self.run_block(block, input, graph, |_, _| {})
    }
}

/// Computes [`MemorySsa`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySsaAnalysis;

impl FlowGraphAnalysis for MemorySsaAnalysis {
    type Output = MemorySsa;

    fn analyze(&self, graph: &FlowGraph) -> MemorySsa {
        let transfer = MemoryTransfer {
            alias: graph.get_analysis::<AliasAnalysis>(),
        };
        let fixpoint = solve_block_fixpoint(&transfer, graph);

        let mut result = MemorySsa::default();
        for block in graph.blocks() {
            let Some(input) = fixpoint.input(block.tag()) else {
                continue;
            };
            let output = transfer.run_block(block, input, graph, |tag, state| {
                result.before.insert(tag.clone(), state.clone());
            });
            result.entry.insert(block.tag().clone(), input.clone());
            result.exit.insert(block.tag().clone(), output);
        }
        result
    }
}

/// Memory states before every named instruction and at block boundaries.
///
/// Unreachable blocks have no states.
#[derive(Debug, Clone, Default)]
pub struct MemorySsa {
    before: HashMap<ValueTag, MemoryState>,
    entry: HashMap<BasicBlockTag, MemoryState>,
    exit: HashMap<BasicBlockTag, MemoryState>,
}

impl MemorySsa {
    /// State immediately before a named instruction executes.
    #[must_use]
    pub fn state_before(&self, instruction: &ValueTag) -> Option<&MemoryState> {
        self.before.get(instruction)
    }

    /// State on entry to a block.
    #[must_use]
    pub fn state_at_entry(&self, block: &BasicBlockTag) -> Option<&MemoryState> {
        self.entry.get(block)
    }

    /// State after a block's instructions and the guarded instruction of a try flow.
    #[must_use]
    pub fn state_at_exit(&self, block: &BasicBlockTag) -> Option<&MemoryState> {
        self.exit.get(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BlockFlow, Branch, Constant, FlowGraphBuilder, IntegerSpec, MethodDef, SwitchFlow, Type,
    };

    #[test]
    fn test_store_then_load_is_known() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let slot = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "slot");
        let one = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int.clone()), "one");
        builder.append_instruction(&entry, Instruction::store(int.clone(), slot.clone(), one.clone()), "st");
        let load = builder.append_instruction(&entry, Instruction::load(int.clone(), slot.clone()), "ld");
        builder.set_flow(&entry, BlockFlow::return_value(int, load.clone()));
        let graph = builder.to_immutable();

        let memory = graph.get_analysis::<MemorySsaAnalysis>();
        let state = memory.state_before(&load).unwrap();
        assert_eq!(state.try_get_value_at(&slot), Some(&one));
    }

    #[test]
    fn test_join_keeps_agreeing_entries_only() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let cond = builder.append_parameter(&entry, Type::Bool, "cond");
        let a = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "a");
        let b = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "b");
        let one = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int.clone()), "one");
        let two = builder.append_instruction(&entry, Instruction::constant(Constant::i32(2), int.clone()), "two");
        builder.append_instruction(&entry, Instruction::store(int.clone(), a.clone(), one.clone()), "sa");
        let left = builder.add_block("left");
        let right = builder.add_block("right");
        let join = builder.add_block("join");
        builder.set_flow(
            &entry,
            BlockFlow::Switch(SwitchFlow::if_else(cond, Branch::to(left.clone()), Branch::to(right.clone()))),
        );
        builder.append_instruction(&left, Instruction::store(int.clone(), b.clone(), one.clone()), "sb1");
        builder.set_flow(&left, BlockFlow::jump(join.clone(), Vec::new()));
        builder.append_instruction(&right, Instruction::store(int.clone(), b.clone(), two), "sb2");
        builder.set_flow(&right, BlockFlow::jump(join.clone(), Vec::new()));
        let callee = MethodDef::new("opaque", "app", Vec::new(), Type::Void).into_ref();
        let call = builder.append_instruction(&join, Instruction::call(callee, Vec::new()), "call");
        builder.set_flow(&join, BlockFlow::return_value(int, one.clone()));
        let graph = builder.to_immutable();

        let memory = graph.get_analysis::<MemorySsaAnalysis>();
        let at_join = memory.state_at_entry(&join).unwrap();
        assert_eq!(at_join.try_get_value_at(&a), Some(&one));
        assert_eq!(at_join.try_get_value_at(&b), None);
        assert_eq!(memory.state_before(&call).unwrap().len(), 1);
        assert!(memory.state_at_exit(&join).unwrap().is_empty());
    }
}
