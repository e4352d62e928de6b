//! Memory access elimination.
//!
//! Uses [`MemorySsaAnalysis`] to remove memory traffic whose outcome is already known:
//!
//! 1. **Load forwarding**: a load from a pointer whose contents are known becomes a copy
//!    of the known value
//! 2. **Redundant stores**: a store writing the value the pointer already holds is removed
//! 3. **Store coalescing**: a store overwritten later in the same block, with nothing in
//!    between that could observe it, is removed
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x, y):
//!   p = alloca i32
//!   store p, x
//!   store p, y
//!   v = load p
//!   return v
//! ```
//!
//! After:
//! ```text
//! entry(x, y):
//!   p = alloca i32
//!   store p, y
//!   v = copy y
//!   return v
//! ```
//!
//! A removed store's own result is a copy of the stored value, so its uses are redirected
//! there first.

use std::collections::HashSet;

use crate::{
    analysis::{AliasAnalysis, DominatorTreeAnalysis, MemorySsaAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{BasicBlock, EffectFlags, ExceptionSpec, FlowGraph, Instruction, ValueTag},
};

/// Forwards known loads and removes redundant or overwritten stores.
pub struct MemoryAccessElimination;

impl Default for MemoryAccessElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccessElimination {
    /// Creates a new memory access elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Stores in `block` that a later store to the same pointer overwrites before anything
    /// can observe them.
    fn overwritten_stores(
        graph: &FlowGraph,
        block: &BasicBlock,
        removed: &HashSet<ValueTag>,
        forwarded: &HashSet<ValueTag>,
    ) -> Vec<ValueTag> {
        let alias = graph.get_analysis::<AliasAnalysis>();
        let mut dead = Vec::new();
        let instructions = block.instructions();
        for (index, tag) in instructions.iter().enumerate() {
            if removed.contains(tag) {
                continue;
            }
            let Some(pointer) = graph
                .instruction(tag)
                .and_then(|named| named.instruction().store_pointer())
            else {
                continue;
            };
            let pointer = graph.resolve_copies(pointer);

            for later in &instructions[index + 1..] {
                if removed.contains(later) || forwarded.contains(later) {
                    continue;
                }
                let Some(named) = graph.instruction(later) else {
                    continue;
                };
                let instruction = named.instruction();
                if let Some(target) = instruction.store_pointer() {
                    if graph.resolve_copies(target) == pointer {
                        dead.push(tag.clone());
                        break;
                    }
                    continue;
                }
                if let Some(source) = instruction.load_pointer() {
                    if alias.may_alias(graph.resolve_copies(source), pointer) {
                        break;
                    }
                    continue;
                }
                let prototype = instruction.prototype();
                if prototype.effects().contains(EffectFlags::READS_MEMORY)
                    || prototype.exception_spec() != ExceptionSpec::NoThrow
                {
                    break;
                }
            }
        }
        dead
    }
}

impl IntraproceduralOptimization for MemoryAccessElimination {
    fn name(&self) -> &'static str {
        "memory-access-elimination"
    }

    fn description(&self) -> &'static str {
        "Forwards loads with known values and removes redundant stores"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let memory = graph.get_analysis::<MemorySsaAnalysis>();
        let dominators = graph.get_analysis::<DominatorTreeAnalysis>();

        let mut builder = graph.to_builder();
        let mut forwarded: HashSet<ValueTag> = HashSet::new();
        let mut removed: HashSet<ValueTag> = HashSet::new();
        for block in graph.blocks() {
            for (index, tag) in block.instructions().iter().enumerate() {
                let Some(named) = graph.instruction(tag) else {
                    continue;
                };
                let instruction = named.instruction();
                let Some(state) = memory.state_before(tag) else {
                    continue;
                };

                if let Some(pointer) = instruction.load_pointer() {
                    let Some(known) = state.try_get_value_at(graph.resolve_copies(pointer)) else {
                        continue;
                    };
                    let ty = instruction.result_type();
                    if known == tag
                        || graph.value_type(known).as_ref() != Some(&ty)
                        || !dominators.dominates_value(graph, known, block.tag(), Some(index))
                    {
                        continue;
                    }
                    builder.replace_instruction(tag, Instruction::copy(ty, known.clone()));
                    forwarded.insert(tag.clone());
                    log.record(EventKind::LoadEliminated)
                        .block(block.tag())
                        .value(tag)
                        .message(format!("load of {pointer} is {known}"))
                        .pass(self.name());
                    continue;
                }

                if let (Some(pointer), Some(value)) =
                    (instruction.store_pointer(), instruction.store_value())
                {
                    let known = state.try_get_value_at(graph.resolve_copies(pointer));
                    if known.is_some_and(|known| {
                        graph.resolve_copies(known) == graph.resolve_copies(value)
                    }) {
                        builder.replace_all_uses(tag, value);
                        builder.remove_instruction(tag);
                        removed.insert(tag.clone());
                        log.record(EventKind::StoreEliminated)
                            .block(block.tag())
                            .value(tag)
                            .message(format!("{pointer} already holds {value}"))
                            .pass(self.name());
                    }
                }
            }
        }

        for block in graph.blocks() {
            for tag in Self::overwritten_stores(graph, block, &removed, &forwarded) {
                let Some(value) = graph
                    .instruction(&tag)
                    .and_then(|named| named.instruction().store_value())
                else {
                    continue;
                };
                builder.replace_all_uses(&tag, value);
                builder.remove_instruction(&tag);
                removed.insert(tag.clone());
                log.record(EventKind::StoreEliminated)
                    .block(block.tag())
                    .value(&tag)
                    .message("overwritten before being read")
                    .pass(self.name());
            }
        }

        if forwarded.is_empty() && removed.is_empty() {
            return graph.clone();
        }
        builder.to_immutable()
    }
}
