//! Def-use information for SSA values.

use std::collections::HashMap;

use crate::{
    analysis::FlowGraphAnalysis,
    ir::{BasicBlockTag, FlowGraph, ValueTag},
};

/// Computes [`ValueUses`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueUsesAnalysis;

impl FlowGraphAnalysis for ValueUsesAnalysis {
    type Output = ValueUses;

    fn analyze(&self, graph: &FlowGraph) -> ValueUses {
        let mut uses = ValueUses::default();
        for named in graph.named_instructions() {
            for argument in named.instruction().arguments() {
                *uses.counts.entry(argument.clone()).or_default() += 1;
                let users = uses.instructions.entry(argument.clone()).or_default();
                if !users.contains(named.tag()) {
                    users.push(named.tag().clone());
                }
            }
        }
        for block in graph.blocks() {
            for value in block.flow().used_values() {
                *uses.counts.entry(value.clone()).or_default() += 1;
                let users = uses.flows.entry(value).or_default();
                if !users.contains(block.tag()) {
                    users.push(block.tag().clone());
                }
            }
        }
        uses
    }
}

/// For every value, the instructions and block flows that reference it.
#[derive(Debug, Clone, Default)]
pub struct ValueUses {
    instructions: HashMap<ValueTag, Vec<ValueTag>>,
    flows: HashMap<ValueTag, Vec<BasicBlockTag>>,
    counts: HashMap<ValueTag, usize>,
}

impl ValueUses {
    /// Named instructions that take `value` as an argument.
    #[must_use]
    pub fn instruction_users(&self, value: &ValueTag) -> &[ValueTag] {
        self.instructions.get(value).map_or(&[], Vec::as_slice)
    }

    /// Blocks whose flow references `value`, including as a branch argument.
    #[must_use]
    pub fn flow_users(&self, value: &ValueTag) -> &[BasicBlockTag] {
        self.flows.get(value).map_or(&[], Vec::as_slice)
    }

    /// Total number of references to `value`, counting repeats.
    #[must_use]
    pub fn use_count(&self, value: &ValueTag) -> usize {
        self.counts.get(value).copied().unwrap_or(0)
    }

    /// True if anything references `value`.
    #[must_use]
    pub fn is_used(&self, value: &ValueTag) -> bool {
        self.use_count(value) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithOp, BlockFlow, FlowGraphBuilder, Instruction, IntegerSpec, Type};

    #[test]
    fn test_counts_repeated_uses() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let x = builder.append_parameter(&entry, int.clone(), "x");
        let sum = builder.append_instruction(
            &entry,
            Instruction::arith(ArithOp::Add, int.clone(), vec![x.clone(), x.clone()]),
            "sum",
        );
        builder.set_flow(&entry, BlockFlow::return_value(int, x.clone()));
        let graph = builder.to_immutable();

        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        assert_eq!(uses.use_count(&x), 3);
        assert_eq!(uses.instruction_users(&x), &[sum.clone()]);
        assert_eq!(uses.flow_users(&x), &[entry]);
        assert!(!uses.is_used(&sum));
    }
}
