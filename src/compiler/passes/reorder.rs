//! Instruction reordering.
//!
//! Schedules the instructions of each block so that values are computed right before they
//! are first needed, shortening live ranges. Blocks are scheduled independently:
//!
//! 1. Instructions no later instruction of the block consumes are the roots, visited in
//!    their original order
//! 2. Visiting an instruction first schedules its same-block arguments in argument order,
//!    then everything else the [`DependencyOrderingAnalysis`] says must run before it,
//!    and finally the instruction itself
//!
//! Every must-run-before pair keeps its relative order, so the rewrite never changes
//! behavior.
//!
//! # Example
//!
//! Before:
//! ```text
//! a = const 1
//! b = const 2
//! c = add x, a
//! d = mul c, b
//! ```
//!
//! After:
//! ```text
//! a = const 1
//! c = add x, a
//! b = const 2
//! d = mul c, b
//! ```

use std::collections::HashSet;

use crate::{
    analysis::{DependencyOrdering, DependencyOrderingAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{BasicBlock, FlowGraph, ValueTag},
};

/// Reschedules instructions within blocks to shorten live ranges.
pub struct InstructionReordering;

impl Default for InstructionReordering {
    fn default() -> Self {
        Self::new()
    }
}

struct Scheduler<'a> {
    graph: &'a FlowGraph,
    block: &'a BasicBlock,
    ordering: &'a DependencyOrdering,
    scheduled: HashSet<ValueTag>,
    order: Vec<ValueTag>,
}

impl Scheduler<'_> {
    fn visit(&mut self, tag: &ValueTag) {
        if !self.scheduled.insert(tag.clone()) {
            return;
        }
        if let Some(named) = self.graph.instruction(tag) {
            for argument in named.instruction().arguments() {
                if self.block.instruction_index(argument).is_some() {
                    self.visit(argument);
                }
            }
        }
        if let Some(dependencies) = self.ordering.dependencies(tag) {
            let earlier: Vec<ValueTag> = self
                .block
                .instructions()
                .iter()
                .filter(|candidate| dependencies.contains(*candidate))
                .cloned()
                .collect();
            for dependency in &earlier {
                self.visit(dependency);
            }
        }
        self.order.push(tag.clone());
    }
}

impl InstructionReordering {
    /// Creates a new instruction reordering pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn schedule(graph: &FlowGraph, block: &BasicBlock, ordering: &DependencyOrdering) -> Vec<ValueTag> {
        let consumed: HashSet<&ValueTag> = block
            .instructions()
            .iter()
            .filter_map(|tag| graph.instruction(tag))
            .flat_map(|named| named.instruction().arguments())
            .filter(|argument| block.instruction_index(argument).is_some())
            .collect();

        let mut scheduler = Scheduler {
            graph,
            block,
            ordering,
            scheduled: HashSet::new(),
            order: Vec::with_capacity(block.instructions().len()),
        };
        for root in block.instructions().iter().filter(|tag| !consumed.contains(tag)) {
            scheduler.visit(root);
        }
        // Anything left over would only be reachable through a use cycle.
        for tag in block.instructions() {
            scheduler.visit(tag);
        }
        scheduler.order
    }
}

impl IntraproceduralOptimization for InstructionReordering {
    fn name(&self) -> &'static str {
        "instruction-reordering"
    }

    fn description(&self) -> &'static str {
        "Schedules instructions close to their first use within each block"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let ordering = graph.get_analysis::<DependencyOrderingAnalysis>();
        let mut builder = graph.to_builder();
        let mut reordered = 0;
        for block in graph.blocks() {
            if block.instructions().len() < 2 {
                continue;
            }
            let order = Self::schedule(graph, block, &ordering);
            if order.as_slice() == block.instructions() {
                continue;
            }
            builder.set_instruction_order(block.tag(), order);
            reordered += 1;
            log.record(EventKind::InstructionsReordered)
                .block(block.tag())
                .pass(self.name());
        }

        if reordered == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{ArithOp, Instruction},
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32},
            interpreter::Value,
        },
    };

    #[test]
    fn test_operands_move_next_to_their_use() {
        let mut names = Vec::new();
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let a = g.i32(&entry, 1);
            let b = g.i32(&entry, 2);
            let c = g.op(&entry, ArithOp::Add, &x, &a);
            let d = g.op(&entry, ArithOp::Mul, &c, &b);
            g.ret_i32(&entry, &d);
            names = vec![a, c, b, d];
        });

        let optimized =
            assert_preserves_semantics(&InstructionReordering::new(), &graph, &[vec![Value::i32(5)]]);
        let entry = optimized.block(optimized.entry_point()).unwrap();
        assert_eq!(entry.instructions(), names.as_slice());
        assert_unchanged(&InstructionReordering::new(), &optimized);
    }

    #[test]
    fn test_memory_order_is_kept() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let y = g.param(&entry, int32(), "y");
            let slot = g.push(&entry, Instruction::alloca(int32()));
            g.push(&entry, Instruction::store(int32(), slot.clone(), x));
            let first = g.push(&entry, Instruction::load(int32(), slot.clone()));
            g.push(&entry, Instruction::store(int32(), slot.clone(), y));
            let second = g.push(&entry, Instruction::load(int32(), slot));
            let sum = g.op(&entry, ArithOp::Sub, &first, &second);
            g.ret_i32(&entry, &sum);
        });

        assert_preserves_semantics(
            &InstructionReordering::new(),
            &graph,
            &[vec![Value::i32(10), Value::i32(3)]],
        );
    }

    #[test]
    fn test_scheduled_block_is_unchanged() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            let one = g.i32(&entry, 1);
            let sum = g.op(&entry, ArithOp::Add, &x, &one);
            g.ret_i32(&entry, &sum);
        });
        assert_unchanged(&InstructionReordering::new(), &graph);
    }
}
