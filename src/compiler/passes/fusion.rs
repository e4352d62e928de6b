//! Block fusion.
//!
//! Merges a block into its predecessor when the predecessor ends in an unconditional jump
//! to it and nothing else branches there. Chains of such blocks collapse into one.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   a = add x, 1
//!   jump next(a)
//! next(p):
//!   b = mul p, 2
//!   return b
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   a = add x, 1
//!   b = mul a, 2
//!   return b
//! ```

use std::collections::HashMap;

use crate::{
    compiler::{passes::utils::flatten, EventKind, EventLog, IntraproceduralOptimization},
    ir::{BasicBlockTag, BlockFlow, FlowGraph, FlowGraphBuilder, ValueTag},
};

/// Merges single-predecessor blocks into the block that jumps to them.
pub struct BlockFusion;

impl Default for BlockFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFusion {
    /// Creates a new block fusion transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The block `source` can absorb, if any.
    fn fusable_successor(
        builder: &FlowGraphBuilder,
        incoming: &HashMap<BasicBlockTag, usize>,
        source: &BasicBlockTag,
    ) -> Option<BasicBlockTag> {
        let BlockFlow::Jump(branch) = builder.block(source)?.flow() else {
            return None;
        };
        let target = branch.target();
        if target == source || target == builder.entry_point() {
            return None;
        }
        if incoming.get(target).copied().unwrap_or(0) != 1 {
            return None;
        }
        branch
            .arguments()
            .iter()
            .all(|argument| argument.as_value().is_some())
            .then(|| target.clone())
    }

    fn fuse(builder: &mut FlowGraphBuilder, source: &BasicBlockTag, target: &BasicBlockTag) {
        let Some(BlockFlow::Jump(branch)) = builder.block(source).map(|b| b.flow().clone()) else {
            return;
        };
        let Some(absorbed) = builder.block(target).cloned() else {
            return;
        };

        let bindings: HashMap<ValueTag, ValueTag> = absorbed
            .parameter_tags()
            .zip(branch.values())
            .filter(|(parameter, value)| parameter != value)
            .map(|(parameter, value)| (parameter.clone(), value.clone()))
            .collect();
        builder.replace_uses(&flatten(&bindings));

        for instruction in absorbed.instructions() {
            builder.move_instruction(instruction, source, usize::MAX);
        }
        let flow = builder
            .block(target)
            .map_or(BlockFlow::Unreachable, |b| b.flow().clone());
        builder.set_flow(source, flow);
        builder.remove_block(target);
    }
}

impl IntraproceduralOptimization for BlockFusion {
    fn name(&self) -> &'static str {
        "block-fusion"
    }

    fn description(&self) -> &'static str {
        "Merges blocks into their only predecessor when it jumps to them unconditionally"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let mut incoming: HashMap<BasicBlockTag, usize> = HashMap::new();
        for block in graph.blocks() {
            for target in block.flow().successors() {
                *incoming.entry(target).or_default() += 1;
            }
        }

        let mut builder = graph.to_builder();
        let mut fused = 0;
        for source in graph.block_tags() {
            while builder.contains_block(source) {
                let Some(target) = Self::fusable_successor(&builder, &incoming, source) else {
                    break;
                };
                Self::fuse(&mut builder, source, &target);
                incoming.remove(&target);
                fused += 1;
                log.record(EventKind::BlocksFused)
                    .block(source)
                    .message(format!("{target} merged into {source}"))
                    .pass(self.name());
            }
        }

        if fused == 0 {
            return graph.clone();
        }
        builder.to_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::ArithOp,
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32},
            interpreter::Value,
        },
    };

    #[test]
    fn test_loop_header_is_kept() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let preheader = g.block("preheader");
            let header = g.block("header");
            let body = g.block("body");
            let exit = g.block("exit");
            let x = g.param(&entry, int32(), "x");
            g.jump(&entry, &preheader, &[]);
            let zero = g.i32(&preheader, 0);
            g.jump(&preheader, &header, &[&zero]);

            let i = g.param(&header, int32(), "i");
            let done = g.op(&header, ArithOp::Ge, &i, &x);
            g.branch(&header, &done, &exit, &body);
            let one = g.i32(&body, 1);
            let next = g.op(&body, ArithOp::Add, &i, &one);
            g.jump(&body, &header, &[&next]);
            g.ret_i32(&exit, &i);
        });

        let log = EventLog::new();
        let optimized = BlockFusion::new().apply(&graph, &log);
        assert!(optimized.validate().is_ok(), "{optimized}");
        // Only the preheader can be absorbed; the header has two predecessors.
        assert_eq!(optimized.block_count(), 4);
        assert_eq!(log.count_kind(EventKind::BlocksFused), 1);
        assert_unchanged(&BlockFusion::new(), &optimized);
        assert_preserves_semantics(&BlockFusion::new(), &graph, &[vec![Value::i32(3)]]);
    }

    #[test]
    fn test_straight_line_blocks_merge_into_entry() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let second = g.block("second");
            let third = g.block("third");
            let x = g.param(&entry, int32(), "x");
            let one = g.i32(&entry, 1);
            let a = g.op(&entry, ArithOp::Add, &x, &one);
            g.jump(&entry, &second, &[&a]);

            let p = g.param(&second, int32(), "p");
            let two = g.i32(&second, 2);
            let b = g.op(&second, ArithOp::Mul, &p, &two);
            g.jump(&second, &third, &[&b]);

            let q = g.param(&third, int32(), "q");
            g.ret_i32(&third, &q);
        });

        let optimized =
            assert_preserves_semantics(&BlockFusion::new(), &graph, &[vec![Value::i32(4)]]);
        assert_eq!(optimized.block_count(), 1);
        assert_eq!(optimized.instruction_count(), 4);
    }

    #[test]
    fn test_join_points_are_kept() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let left = g.block("left");
            let right = g.block("right");
            let join = g.block("join");
            let c = g.param(&entry, crate::ir::Type::Bool, "c");
            g.branch(&entry, &c, &left, &right);
            let one = g.i32(&left, 1);
            g.jump(&left, &join, &[&one]);
            let two = g.i32(&right, 2);
            g.jump(&right, &join, &[&two]);
            let v = g.param(&join, int32(), "v");
            g.ret_i32(&join, &v);
        });
        assert_unchanged(&BlockFusion::new(), &graph);
    }
}
