//! Global Value Numbering (GVN) pass.
//!
//! Replaces an instruction by a copy of an equivalent value that is already available
//! where the instruction executes. Equivalence comes from
//! [`ValueNumberingAnalysis`](crate::analysis::ValueNumberingAnalysis), availability from
//! the dominator tree, so redundant computations in sibling branches are left alone while
//! those dominated by an earlier computation are removed.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x, y):
//!   a = add x, y
//!   jump next()
//! next:
//!   b = add y, x
//!   c = mul a, b
//! ```
//!
//! After:
//! ```text
//! entry(x, y):
//!   a = add x, y
//!   jump next()
//! next:
//!   b = copy a
//!   c = mul a, b
//! ```
//!
//! The copies are forwarded and removed by copy propagation and dead value elimination.
//! Literals are never rewritten; constant propagation owns them.

use crate::{
    analysis::{DominatorTreeAnalysis, ValueNumberingAnalysis},
    compiler::{EventKind, EventLog, IntraproceduralOptimization},
    ir::{FlowGraph, Instruction, InstructionPrototype},
};

/// Dominator-based redundancy elimination.
pub struct GlobalValueNumbering;

impl Default for GlobalValueNumbering {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalValueNumbering {
    /// Creates a new GVN pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl IntraproceduralOptimization for GlobalValueNumbering {
    fn name(&self) -> &'static str {
        "global-value-numbering"
    }

    fn description(&self) -> &'static str {
        "Replaces redundant computations with dominating equivalent values"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let numbering = graph.get_analysis::<ValueNumberingAnalysis>();
        let dominators = graph.get_analysis::<DominatorTreeAnalysis>();

        let mut builder = graph.to_builder();
        let mut replaced = 0;
        for block in graph.blocks() {
            for (index, tag) in block.instructions().iter().enumerate() {
                let Some(named) = graph.instruction(tag) else {
                    continue;
                };
                let prototype = named.instruction().prototype();
                if !prototype.is_value_numberable()
                    || matches!(
                        prototype,
                        InstructionPrototype::Copy { .. } | InstructionPrototype::Constant { .. }
                    )
                {
                    continue;
                }

                let leader = numbering.class(tag).iter().find(|candidate| {
                    *candidate != tag
                        && dominators.dominates_value(graph, candidate, block.tag(), Some(index))
                });
                if let Some(leader) = leader {
                    builder.replace_instruction(
                        tag,
                        Instruction::copy(named.instruction().result_type(), leader.clone()),
                    );
                    replaced += 1;
                    log.record(EventKind::ValueNumbered)
                        .block(block.tag())
                        .value(tag)
                        .message(format!("{tag} is {leader}"))
                        .pass(self.name());
                }
            }
        }

        if replaced == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}
