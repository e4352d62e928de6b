//! The must-run-before relation between instructions of a block.
//!
//! Instruction `a` must run before `b` (both in the same block, `a` first) when moving `b`
//! above `a` could change behavior: `b` uses the value of `a`, both are effectful, or one
//! writes memory the other touches. The relation is closed transitively.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{AliasAnalysis, AliasInfo, FlowGraphAnalysis},
    ir::{EffectFlags, FlowGraph, Instruction, ValueTag},
};

/// Computes [`DependencyOrdering`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyOrderingAnalysis;

impl FlowGraphAnalysis for DependencyOrderingAnalysis {
    type Output = DependencyOrdering;

    fn analyze(&self, graph: &FlowGraph) -> DependencyOrdering {
        let alias = graph.get_analysis::<AliasAnalysis>();
        let mut dependencies: HashMap<ValueTag, HashSet<ValueTag>> = HashMap::new();

        for block in graph.blocks() {
            let instructions: Vec<_> = block
                .instructions()
                .iter()
                .filter_map(|tag| graph.instruction(tag))
                .collect();
            for (index, later) in instructions.iter().enumerate() {
                let mut before = HashSet::new();
                for earlier in &instructions[..index] {
                    if before.contains(earlier.tag()) {
                        continue;
                    }
                    if conflicts(earlier.tag(), earlier.instruction(), later.instruction(), &alias) {
                        before.insert(earlier.tag().clone());
                        if let Some(transitive) = dependencies.get(earlier.tag()) {
                            before.extend(transitive.iter().cloned());
                        }
                    }
                }
                dependencies.insert(later.tag().clone(), before);
            }
        }

        DependencyOrdering { dependencies }
    }
}

fn conflicts(earlier_tag: &ValueTag, earlier: &Instruction, later: &Instruction, alias: &AliasInfo) -> bool {
    if later.arguments().contains(earlier_tag) {
        return true;
    }
    let (first, second) = (earlier.prototype(), later.prototype());
    if first.is_effectful() && second.is_effectful() {
        return true;
    }

    let touches = EffectFlags::READS_MEMORY | EffectFlags::WRITES_MEMORY;
    let (a, b) = (first.effects(), second.effects());
    let memory_conflict = (a.contains(EffectFlags::WRITES_MEMORY) && b.intersects(touches))
        || (b.contains(EffectFlags::WRITES_MEMORY) && a.intersects(touches));
    if !memory_conflict {
        return false;
    }
    match (memory_pointer(earlier), memory_pointer(later)) {
        (Some(x), Some(y)) => alias.may_alias(x, y),
        _ => true,
    }
}

fn memory_pointer(instruction: &Instruction) -> Option<&ValueTag> {
    instruction.load_pointer().or(instruction.store_pointer())
}

/// For every named instruction, the earlier instructions of its block it depends on.
#[derive(Debug, Clone)]
pub struct DependencyOrdering {
    dependencies: HashMap<ValueTag, HashSet<ValueTag>>,
}

impl DependencyOrdering {
    /// True if `first` must execute before `second`. Both must be in the same block with
    /// `first` currently earlier.
    #[must_use]
    pub fn must_run_before(&self, first: &ValueTag, second: &ValueTag) -> bool {
        self.dependencies
            .get(second)
            .is_some_and(|deps| deps.contains(first))
    }

    /// The earlier instructions `instruction` depends on.
    #[must_use]
    pub fn dependencies(&self, instruction: &ValueTag) -> Option<&HashSet<ValueTag>> {
        self.dependencies.get(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithOp, BlockFlow, Constant, FlowGraphBuilder, IntegerSpec, Type};

    #[test]
    fn test_memory_and_data_dependencies() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let x = builder.append_parameter(&entry, int.clone(), "x");
        let a = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "a");
        let b = builder.append_instruction(&entry, Instruction::alloca(int.clone()), "b");
        let one = builder.append_instruction(&entry, Instruction::constant(Constant::i32(1), int.clone()), "one");
        let store_a = builder.append_instruction(&entry, Instruction::store(int.clone(), a.clone(), x.clone()), "sa");
        let load_b = builder.append_instruction(&entry, Instruction::load(int.clone(), b.clone()), "lb");
        let load_a = builder.append_instruction(&entry, Instruction::load(int.clone(), a.clone()), "la");
        let sum = builder.append_instruction(
            &entry,
            Instruction::arith(ArithOp::Add, int.clone(), vec![load_a.clone(), one.clone()]),
            "sum",
        );
        builder.set_flow(&entry, BlockFlow::return_value(int, sum.clone()));
        let graph = builder.to_immutable();

        let ordering = graph.get_analysis::<DependencyOrderingAnalysis>();
        assert!(ordering.must_run_before(&a, &store_a));
        assert!(ordering.must_run_before(&store_a, &load_a));
        assert!(!ordering.must_run_before(&store_a, &load_b));
        assert!(ordering.must_run_before(&store_a, &sum));
        assert!(!ordering.must_run_before(&one, &load_a));
        assert!(!ordering.must_run_before(&load_b, &load_a));
    }
}
