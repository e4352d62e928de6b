//! Jump threading.
//!
//! Branches into blocks that do nothing but branch again are redirected to their final
//! destination. A block is a threading candidate when it is not the entry, holds no
//! instructions, ends in a jump or switch, and its parameters are only used by its own
//! flow. To make the last condition hold as often as possible the graph is first put in
//! register-forwarding form, and cleaned up afterwards.
//!
//! # Example
//!
//! Before:
//! ```text
//! entry(x):
//!   switch copy x [1 -> a(x)] else -> b
//! a(p):
//!   jump c(p)
//! b:
//!   return 0
//! c(q):
//!   return q
//! ```
//!
//! After:
//! ```text
//! entry(x):
//!   switch copy x [1 -> c(x)] else -> b
//! b:
//!   return 0
//! c(q):
//!   return q
//! ```
//!
//! # Try flows
//!
//! - A guarded instruction that cannot throw, or whose handler only rethrows what it
//!   caught, becomes a plain instruction followed by a jump to the success branch
//! - A guarded `throw`/`rethrow` becomes a jump to the exception branch; a `capture` of
//!   the thrown value is only materialized if the handler consumes it
//!
//! # Switch merging
//!
//! When a switch branches into a candidate whose own switch tests the same value, the
//! second test is decided statically: each case of the first switch is split by where the
//! second switch would send its values, and the default absorbs the second switch's
//! remaining cases.

use std::collections::HashSet;

use crate::{
    analysis::{ValueUses, ValueUsesAnalysis},
    compiler::{
        passes::{
            BlockFusion, CopyPropagation, DeadBlockElimination, DeadValueElimination,
            RegisterForwarding,
        },
        EventKind, EventLog, IntraproceduralOptimization,
    },
    ir::{
        BasicBlock, BasicBlockTag, BlockFlow, Branch, BranchArgument, Constant, ExceptionSpec,
        FlowGraph, FlowGraphBuilder, Instruction, Intrinsic, SwitchCase, SwitchFlow, Type,
        ValueTag,
    },
};

/// Redirects branches through trivial blocks and simplifies try flows.
pub struct JumpThreading;

impl Default for JumpThreading {
    fn default() -> Self {
        Self::new()
    }
}

impl JumpThreading {
    /// Creates a new jump threading transform.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct Threader<'a> {
    graph: &'a FlowGraph,
    uses: &'a ValueUses,
}

impl<'a> Threader<'a> {
    /// The block at `target` if branches into it can be replaced by its own flow.
    fn candidate(&self, target: &BasicBlockTag) -> Option<&'a BasicBlock> {
        let graph: &'a FlowGraph = self.graph;
        if target == graph.entry_point() {
            return None;
        }
        let block = graph.block(target)?;
        if !block.instructions().is_empty()
            || !matches!(block.flow(), BlockFlow::Jump(_) | BlockFlow::Switch(_))
        {
            return None;
        }
        let local = block.parameter_tags().all(|parameter| {
            self.uses.instruction_users(parameter).is_empty()
                && self.uses.flow_users(parameter).iter().all(|user| user == target)
        });
        local.then_some(block)
    }

    /// Rewrites `branch`, a branch out of `block`, as if it were taken after entering
    /// `block` through `via`.
    fn substitute(branch: &Branch, block: &BasicBlock, via: &Branch) -> Branch {
        let arguments = branch
            .arguments()
            .iter()
            .map(|argument| {
                argument
                    .as_value()
                    .and_then(|value| block.parameter_index(value))
                    .and_then(|index| via.arguments().get(index))
                    .unwrap_or(argument)
                    .clone()
            })
            .collect();
        Branch::new(branch.target().clone(), arguments)
    }

    /// `instruction` as seen from a branch entering `block` through `via`, if all of its
    /// arguments can be expressed there.
    fn substitute_instruction(
        instruction: &Instruction,
        block: &BasicBlock,
        via: &Branch,
    ) -> Option<Instruction> {
        let mut arguments = Vec::with_capacity(instruction.arguments().len());
        for argument in instruction.arguments() {
            match block.parameter_index(argument) {
                Some(index) => arguments.push(via.arguments().get(index)?.as_value()?.clone()),
                None => arguments.push(argument.clone()),
            }
        }
        Some(instruction.with_arguments(arguments))
    }

    /// Follows a chain of candidates ending in jumps.
    fn thread_branch(&self, branch: &Branch) -> Branch {
        let mut current = branch.clone();
        let mut visited = HashSet::new();
        while visited.insert(current.target().clone()) {
            let Some(block) = self.candidate(current.target()) else {
                break;
            };
            let BlockFlow::Jump(next) = block.flow() else {
                break;
            };
            current = Self::substitute(next, block, &current);
        }
        current
    }

    fn thread_flow(&self, flow: &BlockFlow) -> BlockFlow {
        match flow {
            BlockFlow::Jump(branch) => {
                let branch = self.thread_branch(branch);
                if let Some(block) = self.candidate(branch.target()) {
                    if let BlockFlow::Switch(switch) = block.flow() {
                        if let Some(inlined) = self.inline_switch(switch, block, &branch) {
                            return BlockFlow::Switch(inlined);
                        }
                    }
                }
                BlockFlow::Jump(branch)
            }
            BlockFlow::Switch(switch) => BlockFlow::Switch(self.thread_switch(switch)),
            BlockFlow::Try(_) => {
                let branches = flow
                    .branches()
                    .into_iter()
                    .map(|branch| self.thread_branch(branch))
                    .collect();
                flow.with_branches(branches)
            }
            BlockFlow::Return(_) | BlockFlow::Unreachable => flow.clone(),
        }
    }

    /// The switch of `block` as entered through `via`.
    fn inline_switch(&self, switch: &SwitchFlow, block: &BasicBlock, via: &Branch) -> Option<SwitchFlow> {
        let value = Self::substitute_instruction(switch.value(), block, via)?;
        let cases = switch
            .cases()
            .iter()
            .map(|case| {
                SwitchCase::new(case.values().to_vec(), Self::substitute(case.branch(), block, via))
            })
            .collect();
        let default_branch = Self::substitute(switch.default_branch(), block, via);
        Some(SwitchFlow::new(value, cases, default_branch))
    }

    /// A candidate switch reached from `branch` that tests the same value as `scrutinee`.
    fn mergeable(&self, scrutinee: &Instruction, branch: &Branch) -> Option<SwitchFlow> {
        if !scrutinee.prototype().is_value_numberable() {
            return None;
        }
        let block = self.candidate(branch.target())?;
        let BlockFlow::Switch(switch) = block.flow() else {
            return None;
        };
        let inlined = self.inline_switch(switch, block, branch)?;
        (inlined.value() == scrutinee).then_some(inlined)
    }

    fn thread_switch(&self, switch: &SwitchFlow) -> SwitchFlow {
        let scrutinee = switch.value();
        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut covered: Vec<Constant> = Vec::new();
        for case in switch.cases() {
            covered.extend(case.values().iter().copied());
            let branch = self.thread_branch(case.branch());
            match self.mergeable(scrutinee, &branch) {
                Some(next) => {
                    let mut groups: Vec<(Branch, Vec<Constant>)> = Vec::new();
                    for value in case.values() {
                        let target = next.branch_for(value);
                        match groups.iter_mut().find(|(branch, _)| branch == target) {
                            Some((_, values)) => values.push(*value),
                            None => groups.push((target.clone(), vec![*value])),
                        }
                    }
                    cases.extend(
                        groups
                            .into_iter()
                            .map(|(branch, values)| SwitchCase::new(values, branch)),
                    );
                }
                None => cases.push(SwitchCase::new(case.values().to_vec(), branch)),
            }
        }

        let default_branch = self.thread_branch(switch.default_branch());
        let default_branch = match self.mergeable(scrutinee, &default_branch) {
            Some(next) => {
                for case in next.cases() {
                    let remaining: Vec<Constant> = case
                        .values()
                        .iter()
                        .filter(|value| !covered.contains(*value))
                        .copied()
                        .collect();
                    if !remaining.is_empty() {
                        cases.push(SwitchCase::new(remaining, case.branch().clone()));
                    }
                }
                next.default_branch().clone()
            }
            None => default_branch,
        };
        SwitchFlow::new(scrutinee.clone(), cases, default_branch)
    }
}

/// How a try flow degrades.
enum TryLowering {
    /// Run the instruction unguarded, then take the success branch.
    Unguarded,
    /// The instruction always throws `thrown`; take the exception branch.
    Throws { thrown: ValueTag, capture: bool },
}

impl JumpThreading {
    /// True if `branch` leads to a handler that only rethrows the caught exception.
    fn is_pure_rethrow(graph: &FlowGraph, branch: &Branch) -> bool {
        let Some(handler) = graph.block(branch.target()) else {
            return false;
        };
        let [only] = handler.instructions() else {
            return false;
        };
        if !matches!(handler.flow(), BlockFlow::Unreachable) {
            return false;
        }
        let Some(named) = graph.instruction(only) else {
            return false;
        };
        let instruction = named.instruction();
        if instruction.prototype().intrinsic() != Some(Intrinsic::Rethrow) {
            return false;
        }
        instruction
            .arguments()
            .first()
            .and_then(|argument| handler.parameter_index(argument))
            .and_then(|index| branch.arguments().get(index))
            .is_some_and(|argument| matches!(argument, BranchArgument::TryException))
    }

    fn try_lowering(graph: &FlowGraph, block: &BasicBlock) -> Option<TryLowering> {
        let BlockFlow::Try(flow) = block.flow() else {
            return None;
        };
        let instruction = flow.instruction();
        let uses_placeholder = |branch: &Branch, placeholder: &BranchArgument| {
            branch.arguments().contains(placeholder)
        };

        match instruction.prototype().exception_spec() {
            ExceptionSpec::AlwaysThrow => {
                let exception = flow.exception_branch();
                if uses_placeholder(exception, &BranchArgument::TryResult) {
                    return None;
                }
                let thrown = instruction.arguments().first()?.clone();
                let capture = instruction.prototype().intrinsic() == Some(Intrinsic::Throw)
                    && uses_placeholder(exception, &BranchArgument::TryException);
                Some(TryLowering::Throws { thrown, capture })
            }
            spec => {
                let success = flow.success_branch();
                if uses_placeholder(success, &BranchArgument::TryException) {
                    return None;
                }
                let unguarded = spec == ExceptionSpec::NoThrow
                    || Self::is_pure_rethrow(graph, flow.exception_branch());
                unguarded.then_some(TryLowering::Unguarded)
            }
        }
    }

    fn lower_try(
        builder: &mut FlowGraphBuilder,
        block: &BasicBlockTag,
        lowering: TryLowering,
    ) -> Option<BlockFlow> {
        let BlockFlow::Try(flow) = builder.block(block)?.flow().clone() else {
            return None;
        };
        let instruction = flow.instruction().clone();
        let (branch, replacement) = match lowering {
            TryLowering::Unguarded => {
                let result = builder.append_instruction(block, instruction, "result");
                (flow.success_branch().clone(), (BranchArgument::TryResult, result))
            }
            TryLowering::Throws { thrown, capture } => {
                let value = if capture {
                    let ty = builder.value_type(&thrown).unwrap_or(Type::Void);
                    builder.append_instruction(
                        block,
                        Instruction::exception(Intrinsic::Capture, ty, thrown),
                        "exception",
                    )
                } else {
                    thrown
                };
                (
                    flow.exception_branch().clone(),
                    (BranchArgument::TryException, value),
                )
            }
        };
        let (placeholder, value) = replacement;
        let arguments = branch
            .arguments()
            .iter()
            .map(|argument| {
                if *argument == placeholder {
                    BranchArgument::Value(value.clone())
                } else {
                    argument.clone()
                }
            })
            .collect();
        Some(BlockFlow::Jump(branch.with_arguments(arguments)))
    }

    /// Threads every flow of `graph`, which must be in register-forwarding form.
    fn thread(&self, graph: &FlowGraph, log: &EventLog) -> Option<FlowGraph> {
        let uses = graph.get_analysis::<ValueUsesAnalysis>();
        let threader = Threader {
            graph,
            uses: &uses,
        };

        let mut builder = graph.to_builder();
        let mut changed = false;
        for block in graph.blocks() {
            let tag = block.tag();
            let mut flow = block.flow().clone();
            if let Some(lowering) = Self::try_lowering(graph, block) {
                if let Some(lowered) = Self::lower_try(&mut builder, tag, lowering) {
                    log.record(EventKind::TryLowered).block(tag).pass(self.name());
                    flow = lowered;
                }
            }

            for _ in 0..=graph.block_count() {
                let next = threader.thread_flow(&flow);
                if next == flow {
                    break;
                }
                flow = next;
            }

            if flow != *block.flow() {
                builder.set_flow(tag, flow);
                changed = true;
                log.record(EventKind::JumpThreaded).block(tag).pass(self.name());
            }
        }
        changed.then(|| builder.to_immutable())
    }
}

impl IntraproceduralOptimization for JumpThreading {
    fn name(&self) -> &'static str {
        "jump-threading"
    }

    fn description(&self) -> &'static str {
        "Redirects branches through trivial blocks and simplifies try flows"
    }

    fn apply(&self, graph: &FlowGraph, log: &EventLog) -> FlowGraph {
        let forwarded = RegisterForwarding::new().apply(graph, &EventLog::new());
        let Some(threaded) = self.thread(&forwarded, log) else {
            return graph.clone();
        };

        let mut result = DeadBlockElimination::new().apply(&threaded, log);
        result = CopyPropagation::new().apply(&result, log);
        result = DeadValueElimination::new().apply(&result, log);
        BlockFusion::new().apply(&result, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{ArithOp, TryFlow},
        test::{
            assert_preserves_semantics, assert_unchanged,
            builders::{build_graph, int32},
            interpreter::Value,
        },
    };

    fn count_tries(graph: &FlowGraph) -> usize {
        graph
            .blocks()
            .filter(|b| matches!(b.flow(), BlockFlow::Try(_)))
            .count()
    }

    #[test]
    fn test_jump_chain_is_shortened() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let hop = g.block("hop");
            let other = g.block("other");
            let done = g.block("done");
            let x = g.param(&entry, int32(), "x");
            let c = g.param(&entry, Type::Bool, "c");
            g.branch(&entry, &c, &hop, &other);
            g.jump(&hop, &done, &[&x]);
            let zero = g.i32(&other, 0);
            g.jump(&other, &done, &[&zero]);
            let r = g.param(&done, int32(), "r");
            g.ret_i32(&done, &r);
        });

        let optimized = assert_preserves_semantics(
            &JumpThreading::new(),
            &graph,
            &[
                vec![Value::i32(5), Value::Bool(true)],
                vec![Value::i32(5), Value::Bool(false)],
            ],
        );
        assert!(optimized.blocks().all(|b| b.tag().name() != "hop"));
        assert_unchanged(&JumpThreading::new(), &optimized);
    }

    #[test]
    fn test_nothing_to_thread() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let x = g.param(&entry, int32(), "x");
            g.ret_i32(&entry, &x);
        });
        assert_unchanged(&JumpThreading::new(), &graph);
    }

    #[test]
    fn test_non_throwing_try_is_lowered() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let ok = g.block("ok");
            let handler = g.block("handler");
            let x = g.param(&entry, int32(), "x");
            let one = g.i32(&entry, 1);
            g.set_flow(
                &entry,
                BlockFlow::Try(TryFlow::new(
                    Instruction::arith(ArithOp::Add, int32(), vec![x, one]),
                    Branch::new(ok.clone(), vec![BranchArgument::TryResult]),
                    Branch::to(handler.clone()),
                )),
            );
            let r = g.param(&ok, int32(), "r");
            g.ret_i32(&ok, &r);
            let zero = g.i32(&handler, 0);
            g.ret_i32(&handler, &zero);
        });

        let log = EventLog::new();
        let optimized = JumpThreading::new().apply(&graph, &log);
        assert!(optimized.validate().is_ok(), "{optimized}");
        assert_eq!(count_tries(&optimized), 0);
        assert!(log.has(EventKind::TryLowered));
        assert_preserves_semantics(&JumpThreading::new(), &graph, &[vec![Value::i32(41)]]);
    }

    #[test]
    fn test_pure_rethrow_handler_is_dropped() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let ok = g.block("ok");
            let handler = g.block("handler");
            let x = g.param(&entry, int32(), "x");
            let y = g.param(&entry, int32(), "y");
            g.set_flow(
                &entry,
                BlockFlow::Try(TryFlow::new(
                    Instruction::arith(ArithOp::Div, int32(), vec![x, y]),
                    Branch::new(ok.clone(), vec![BranchArgument::TryResult]),
                    Branch::new(handler.clone(), vec![BranchArgument::TryException]),
                )),
            );
            let r = g.param(&ok, int32(), "r");
            g.ret_i32(&ok, &r);
            let e = g.param(&handler, int32(), "e");
            g.push(&handler, Instruction::exception(Intrinsic::Rethrow, int32(), e));
        });

        let optimized = assert_preserves_semantics(
            &JumpThreading::new(),
            &graph,
            &[
                vec![Value::i32(8), Value::i32(2)],
                vec![Value::i32(8), Value::i32(0)],
            ],
        );
        assert_eq!(count_tries(&optimized), 0);
    }

    #[test]
    fn test_literal_throw_jumps_to_handler() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let ok = g.block("ok");
            let handler = g.block("handler");
            let x = g.param(&entry, int32(), "x");
            g.set_flow(
                &entry,
                BlockFlow::Try(TryFlow::new(
                    Instruction::exception(Intrinsic::Throw, int32(), x),
                    Branch::to(ok.clone()),
                    Branch::new(handler.clone(), vec![BranchArgument::TryException]),
                )),
            );
            let zero = g.i32(&ok, 0);
            g.ret_i32(&ok, &zero);
            let e = g.param(&handler, int32(), "e");
            let one = g.i32(&handler, 1);
            let r = g.op(&handler, ArithOp::Add, &e, &one);
            g.ret_i32(&handler, &r);
        });

        let optimized =
            assert_preserves_semantics(&JumpThreading::new(), &graph, &[vec![Value::i32(6)]]);
        assert_eq!(count_tries(&optimized), 0);
        assert_eq!(optimized.block_count(), 1);
    }

    #[test]
    fn test_switches_on_the_same_value_merge() {
        let graph = build_graph(|g| {
            let entry = g.entry();
            let second = g.block("second");
            let a = g.block("a");
            let x = g.block("x");
            let y = g.block("y");
            let z = g.block("z");
            let s = g.param(&entry, int32(), "s");
            g.switch_i32(&entry, &s, &[(&[1], &a), (&[2], &second)], &second);
            g.switch_i32(&second, &s, &[(&[2], &x), (&[3], &y)], &z);
            for (block, value) in [(&a, 10), (&x, 20), (&y, 30), (&z, 40)] {
                let v = g.i32(block, value);
                g.ret_i32(block, &v);
            }
        });

        let inputs: Vec<Vec<Value>> = (0..5).map(|s| vec![Value::i32(s)]).collect();
        let optimized = assert_preserves_semantics(&JumpThreading::new(), &graph, &inputs);
        let entry = optimized.block(optimized.entry_point()).unwrap();
        let BlockFlow::Switch(switch) = entry.flow() else {
            panic!("expected a switch:\n{optimized}");
        };
        assert_eq!(switch.cases().len(), 3);
        assert!(optimized.blocks().all(|b| b.tag().name() != "second"));
    }
}
